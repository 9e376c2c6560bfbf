//! Upload an image, run it through a YOLO model, get back the annotated image
//! URL and the detected labels. Run artifacts are deleted after a delay.

pub mod cleanup;
pub mod config;
pub mod detector;
pub mod errors;
pub mod inference;
pub mod models;
pub mod storage;
pub mod web_server;

pub use cleanup::CleanupScheduler;
pub use config::Config;
pub use detector::{DetectError, Detector, PredictRequest, Prediction};
pub use errors::PredictError;
pub use storage::StoragePaths;
pub use web_server::{start_server, AppState};
