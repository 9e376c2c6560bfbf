use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

mod python_worker;
pub use python_worker::PythonWorker;

#[cfg(feature = "embedded-python")]
mod yolo_pytorch;
#[cfg(feature = "embedded-python")]
pub use yolo_pytorch::YOLOModel;

/// Class index to human readable label, as reported by the model.
pub type ClassNames = BTreeMap<i64, String>;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to start detection worker: {0}")]
    Spawn(#[source] io::Error),
    #[error("detection worker i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("detection worker exited")]
    WorkerExited,
    #[error("malformed worker reply: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("inference failed: {0}")]
    Engine(String),
    #[error("class id {0} is not in the model's class table")]
    UnknownClass(i64),
    #[error("engine saved to {0}, which is not a run directory below the output directory")]
    ForeignSaveDir(PathBuf),
}

/// Where the engine should read the image and write its annotated copy.
#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub source: PathBuf,
    /// Parent directory of the save dir.
    pub project: PathBuf,
    /// Save dir name below `project`; reused if it already exists.
    pub name: String,
}

/// The part of an inference result the service consumes.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Prediction {
    pub save_dir: PathBuf,
    /// One entry per detected box, in the model's box order.
    #[serde(rename = "classes")]
    pub class_ids: Vec<i64>,
    pub names: ClassNames,
}

impl Prediction {
    pub fn labels(&self) -> Result<Vec<String>, DetectError> {
        self.class_ids
            .iter()
            .map(|id| {
                self.names
                    .get(id)
                    .cloned()
                    .ok_or(DetectError::UnknownClass(*id))
            })
            .collect()
    }
}

/// An object detector loaded once and shared by every request.
///
/// `predict` blocks for the whole inference; call it from a blocking context.
pub trait Detector: Send + Sync {
    fn predict(&self, request: &PredictRequest) -> Result<Prediction, DetectError>;

    /// Engine name for logs.
    fn name(&self) -> &str;
}
