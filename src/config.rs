use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Every setting can come from the command line, the environment or `.env`.
#[derive(Parser, Debug, Clone)]
#[command(name = "scratch-detector", version, about = "Runs uploaded images through a YOLO model")]
pub struct Config {
    #[arg(long, env = "BIND_ADDRESS", default_value = "127.0.0.1:8000")]
    pub bind: String,

    /// Pretrained weights, loaded once at startup.
    #[arg(long, env = "YOLO_WEIGHTS_PATH", default_value = "runs/detect/train2/weights/best.pt")]
    pub weights: PathBuf,

    #[arg(long, env = "UPLOAD_DIRECTORY", default_value = "uploads")]
    pub upload_dir: PathBuf,

    #[arg(long, env = "OUTPUT_DIRECTORY", default_value = "output")]
    pub output_dir: PathBuf,

    /// Seconds before a run's upload and output are deleted.
    #[arg(long, env = "CLEANUP_DELAY_SECS", default_value_t = 60)]
    pub cleanup_delay_secs: u64,

    /// Interpreter for the detection worker.
    #[arg(long, env = "PYTHON_EXECUTABLE", default_value = "python3")]
    pub python: String,

    /// Multipart field carrying the image.
    #[arg(long, env = "UPLOAD_FIELD", default_value = "file")]
    pub upload_field: String,

    #[arg(long, env = "HTTP_WORKERS")]
    pub workers: Option<usize>,
}

impl Config {
    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.cleanup_delay_secs)
    }
}
