use super::{ClassNames, DetectError, Detector, PredictRequest, Prediction};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::{Path, PathBuf};
use tracing::info;

/// Ultralytics YOLO hosted in this process through an embedded interpreter.
///
/// Predictions hold the GIL, so concurrent requests queue up behind it.
pub struct YOLOModel {
    model: PyObject,
}

impl YOLOModel {
    pub fn new(weights_path: &Path) -> Result<Self, DetectError> {
        info!("Loading YOLO weights from {} in-process", weights_path.display());
        Python::with_gil(|py| -> PyResult<Self> {
            let ultralytics = py.import("ultralytics")?;
            let model = ultralytics
                .getattr("YOLO")?
                .call1((weights_path.to_string_lossy().into_owned(),))?;
            let names: ClassNames = model.getattr("names")?.extract()?;
            info!("YOLO model ready with {} classes", names.len());

            Ok(YOLOModel { model: model.into() })
        })
        .map_err(python_error)
    }
}

impl Detector for YOLOModel {
    fn predict(&self, request: &PredictRequest) -> Result<Prediction, DetectError> {
        Python::with_gil(|py| -> PyResult<Prediction> {
            let kwargs = PyDict::new(py);
            kwargs.set_item("source", request.source.to_string_lossy().into_owned())?;
            kwargs.set_item("save", true)?;
            kwargs.set_item("project", request.project.to_string_lossy().into_owned())?;
            kwargs.set_item("name", request.name.as_str())?;
            kwargs.set_item("exist_ok", true)?;
            kwargs.set_item("verbose", false)?;

            let results = self
                .model
                .as_ref(py)
                .call_method("predict", (), Some(kwargs))?;
            let first = results.get_item(0)?;

            let save_dir: String = first.getattr("save_dir")?.str()?.extract()?;
            let boxes = first.getattr("boxes")?;
            let class_ids = if boxes.is_none() || !boxes.is_true()? {
                Vec::new()
            } else {
                boxes
                    .getattr("cls")?
                    .call_method0("tolist")?
                    .extract::<Vec<f64>>()?
                    .into_iter()
                    .map(|c| c as i64)
                    .collect()
            };
            let names: ClassNames = first.getattr("names")?.extract()?;

            Ok(Prediction {
                save_dir: PathBuf::from(save_dir),
                class_ids,
                names,
            })
        })
        .map_err(python_error)
    }

    fn name(&self) -> &str {
        "ultralytics-embedded"
    }
}

fn python_error(err: PyErr) -> DetectError {
    DetectError::Engine(err.to_string())
}
