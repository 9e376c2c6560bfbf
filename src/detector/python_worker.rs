use super::{ClassNames, DetectError, Detector, PredictRequest, Prediction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const WORKER_SCRIPT: &str = include_str!("ultralytics_worker.py");

const READY_PREFIX: &str = "READY:";
const PREDICTION_PREFIX: &str = "PREDICTION:";

/// Ultralytics YOLO running in a long-lived python process.
///
/// The weights are loaded once when the worker starts. Requests go over the
/// child's stdin as one JSON object per line and each gets exactly one
/// `PREDICTION:` line back; anything else the library prints is skipped.
/// Calls are serialized, the worker handles one image at a time.
pub struct PythonWorker {
    child: Mutex<Child>,
    pipe: Mutex<WorkerPipe>,
}

struct WorkerPipe {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    source: &'a Path,
    project: &'a Path,
    name: &'a str,
}

#[derive(Deserialize)]
struct Ready {
    names: ClassNames,
}

impl PythonWorker {
    pub fn spawn(python: &str, weights: &Path) -> Result<Self, DetectError> {
        info!("Loading YOLO weights from {} with {}", weights.display(), python);
        Self::from_command(worker_command(python, weights))
    }

    /// Starts any program speaking the worker line protocol.
    pub fn from_command(mut command: Command) -> Result<Self, DetectError> {
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        let mut child = command.spawn().map_err(DetectError::Spawn)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                shutdown(&mut child);
                return Err(DetectError::WorkerExited);
            }
        };
        let mut pipe = WorkerPipe {
            stdin,
            stdout: BufReader::new(stdout),
        };

        let ready: Ready = match pipe.read_reply(READY_PREFIX) {
            Ok(ready) => ready,
            Err(e) => {
                shutdown(&mut child);
                return Err(e);
            }
        };
        info!("Detection worker ready with {} classes", ready.names.len());

        Ok(PythonWorker {
            child: Mutex::new(child),
            pipe: Mutex::new(pipe),
        })
    }
}

/// `python -c <worker script> <weights>`, ready for extra env or args.
pub fn worker_command(python: &str, weights: &Path) -> Command {
    let mut command = Command::new(python);
    command.arg("-c").arg(WORKER_SCRIPT).arg(weights);
    command
}

/// A reply is either `{"error": ...}` or a prediction.
///
/// Class names arrive with string keys ("0"); they only convert to integer
/// keys when deserialized straight into the map, not through serde's
/// buffered untagged-enum path.
fn parse_prediction(reply: Value) -> Result<Prediction, DetectError> {
    if let Some(error) = reply.get("error").and_then(Value::as_str) {
        return Err(DetectError::Engine(error.to_string()));
    }
    Ok(serde_json::from_value(reply)?)
}

impl WorkerPipe {
    fn read_reply<T: for<'de> Deserialize<'de>>(&mut self, prefix: &str) -> Result<T, DetectError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(DetectError::WorkerExited);
            }
            let line = line.trim_end();
            match line.strip_prefix(prefix) {
                Some(payload) => return Ok(serde_json::from_str(payload)?),
                None => debug!("worker: {}", line),
            }
        }
    }
}

impl Detector for PythonWorker {
    fn predict(&self, request: &PredictRequest) -> Result<Prediction, DetectError> {
        let mut line = serde_json::to_string(&WireRequest {
            source: &request.source,
            project: &request.project,
            name: &request.name,
        })?;
        line.push('\n');

        let mut pipe = self
            .pipe
            .lock()
            .map_err(|_| DetectError::Engine("worker pipe poisoned".to_string()))?;
        pipe.stdin.write_all(line.as_bytes())?;
        pipe.stdin.flush()?;

        parse_prediction(pipe.read_reply(PREDICTION_PREFIX)?)
    }

    fn name(&self) -> &str {
        "ultralytics-worker"
    }
}

impl Drop for PythonWorker {
    fn drop(&mut self) {
        if let Ok(child) = self.child.get_mut() {
            shutdown(child);
        }
    }
}

fn shutdown(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!("Worker already stopped: {}", e);
    }
    match child.wait() {
        Ok(status) => debug!("Worker exited with {}", status),
        Err(e) => warn!("Failed to reap detection worker: {}", e),
    }
}
