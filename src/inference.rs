use crate::detector::{DetectError, Detector, PredictRequest};
use crate::errors::PredictError;
use crate::models::PredictResponse;
use crate::storage::{Run, StoragePaths};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::info;

/// What a finished run hands back to the HTTP layer.
#[derive(Debug, Clone)]
pub struct InferenceOutcome {
    pub response: PredictResponse,
    /// Directory the engine actually wrote into.
    pub save_dir: PathBuf,
}

/// Runs the detector on an already saved upload and resolves its output.
///
/// Blocks for the whole inference.
pub fn run_inference(
    detector: &dyn Detector,
    storage: &StoragePaths,
    run: &Run,
    source: &Path,
) -> Result<InferenceOutcome, PredictError> {
    let request = PredictRequest {
        source: source.to_path_buf(),
        project: storage.output_dir.clone(),
        name: run.name().to_string(),
    };
    let prediction = detector.predict(&request)?;
    let served_dir = served_dir(&storage.output_dir, &prediction.save_dir)?;

    let image = find_output_image(&prediction.save_dir)?.ok_or(PredictError::NoOutputImage)?;
    let scratches = prediction.labels()?;
    let url = output_url(served_dir, &image);
    info!(
        "{} produced {} with {} detections via {}",
        run,
        image,
        scratches.len(),
        detector.name()
    );

    Ok(InferenceOutcome {
        response: PredictResponse {
            output_url: url,
            scratches,
        },
        save_dir: prediction.save_dir,
    })
}

/// Name of the annotated image in `save_dir`.
///
/// Only `*.jpg` files count. When there are several, the lexicographically
/// smallest name wins so the choice does not depend on directory order. A
/// missing directory is treated like an empty one.
pub fn find_output_image(save_dir: &Path) -> io::Result<Option<String>> {
    let entries = match std::fs::read_dir(save_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut best: Option<String> = None;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.ends_with(".jpg") {
            continue;
        }
        if best.as_ref().map_or(true, |current| name < *current) {
            best = Some(name);
        }
    }
    Ok(best)
}

/// `save_dir` relative to the static `/output` mount.
///
/// The engine picks the save dir (it may differ from the requested run name),
/// but it has to be a real subdirectory of `output_dir`: anything else could
/// not be served, and cleanup would delete outside the run.
pub fn served_dir<'a>(output_dir: &Path, save_dir: &'a Path) -> Result<&'a Path, DetectError> {
    let relative = save_dir
        .strip_prefix(output_dir)
        .map_err(|_| DetectError::ForeignSaveDir(save_dir.to_path_buf()))?;
    let mut components = relative.components().peekable();
    if components.peek().is_none() || !components.all(|c| matches!(c, Component::Normal(_))) {
        return Err(DetectError::ForeignSaveDir(save_dir.to_path_buf()));
    }
    Ok(relative)
}

/// `/output/<served dir>/<file>`, every segment percent-encoded.
pub fn output_url(served_dir: &Path, file_name: &str) -> String {
    let mut url = String::from("/output");
    for part in served_dir.iter() {
        url.push('/');
        url.push_str(&urlencoding::encode(&part.to_string_lossy()));
    }
    url.push('/');
    url.push_str(&urlencoding::encode(file_name));
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{ClassNames, Prediction};
    use std::fs;

    struct StubDetector {
        files: Vec<&'static str>,
        class_ids: Vec<i64>,
        /// Where to write instead of `project/name`.
        save_dir: Option<PathBuf>,
    }

    impl StubDetector {
        fn new(files: Vec<&'static str>, class_ids: Vec<i64>) -> Self {
            StubDetector {
                files,
                class_ids,
                save_dir: None,
            }
        }
    }

    impl Detector for StubDetector {
        fn predict(&self, request: &PredictRequest) -> Result<Prediction, DetectError> {
            let save_dir = self
                .save_dir
                .clone()
                .unwrap_or_else(|| request.project.join(&request.name));
            fs::create_dir_all(&save_dir)?;
            for file in &self.files {
                fs::write(save_dir.join(file), b"annotated")?;
            }
            let names: ClassNames = [(0, "scratch".to_string())].into_iter().collect();
            Ok(Prediction {
                save_dir,
                class_ids: self.class_ids.clone(),
                names,
            })
        }

        fn name(&self) -> &str {
            "stub"
        }
    }

    fn storage(root: &Path) -> StoragePaths {
        StoragePaths::init(root.join("uploads"), root.join("output")).unwrap()
    }

    #[test]
    fn picks_the_smallest_jpg_name() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.jpg", "a.png", "b.jpg", "a.JPG", "labels.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("a.jpg")).unwrap();

        assert_eq!(find_output_image(dir.path()).unwrap().as_deref(), Some("b.jpg"));
    }

    #[test]
    fn missing_save_dir_has_no_image() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_output_image(&dir.path().join("nope")).unwrap(), None);
    }

    #[test]
    fn urls_are_rooted_at_output_and_encoded() {
        let url = output_url(Path::new("run_0badc0de"), "my car.jpg");
        assert_eq!(url, "/output/run_0badc0de/my%20car.jpg");
    }

    #[test]
    fn save_dir_must_be_below_the_output_dir() {
        let output = Path::new("/srv/output");
        assert_eq!(
            served_dir(output, Path::new("/srv/output/run_1")).unwrap(),
            Path::new("run_1")
        );
        for bad in ["/srv/output", "/srv/elsewhere/run_1", "/srv/output/../run_1"] {
            assert!(matches!(
                served_dir(output, Path::new(bad)),
                Err(DetectError::ForeignSaveDir(_))
            ));
        }
    }

    #[test]
    fn url_follows_the_directory_the_engine_used() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        let run = storage.reserve_run().unwrap();
        let renamed = storage.output_dir.join(format!("{}2", run.name()));
        let detector = StubDetector {
            save_dir: Some(renamed.clone()),
            ..StubDetector::new(vec!["car.jpg"], vec![0])
        };

        let outcome = run_inference(&detector, &storage, &run, Path::new("car.jpg")).unwrap();
        assert_eq!(outcome.response.output_url, format!("/output/{}2/car.jpg", run.name()));
        assert_eq!(outcome.save_dir, renamed);
    }

    #[test]
    fn save_dir_outside_output_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        let run = storage.reserve_run().unwrap();
        let detector = StubDetector {
            save_dir: Some(root.path().join("elsewhere")),
            ..StubDetector::new(vec!["car.jpg"], vec![0])
        };

        let result = run_inference(&detector, &storage, &run, Path::new("car.jpg"));
        assert!(matches!(
            result,
            Err(PredictError::Detect(DetectError::ForeignSaveDir(_)))
        ));
    }

    #[test]
    fn successful_run_reports_url_and_labels() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        let run = storage.reserve_run().unwrap();
        let detector = StubDetector::new(vec!["run_car.jpg"], vec![0, 0, 0]);

        let outcome = run_inference(&detector, &storage, &run, Path::new("unused.jpg")).unwrap();
        assert!(outcome.response.output_url.starts_with("/output/"));
        assert_eq!(
            outcome.response.output_url,
            format!("/output/{}/run_car.jpg", run.name())
        );
        assert_eq!(outcome.response.scratches.len(), 3);
        assert_eq!(outcome.save_dir, storage.run_dir(&run));
    }

    #[test]
    fn run_without_image_is_no_output() {
        let root = tempfile::tempdir().unwrap();
        let storage = storage(root.path());
        let run = storage.reserve_run().unwrap();
        let detector = StubDetector::new(vec!["car.png"], vec![0]);

        let result = run_inference(&detector, &storage, &run, Path::new("unused.png"));
        assert!(matches!(result, Err(PredictError::NoOutputImage)));
    }
}
