use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use futures::{pin_mut, Stream, TryStreamExt};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

// Reserving a run is a create_dir race; give up long before this matters.
const MAX_RESERVE_ATTEMPTS: usize = 16;

/// The two directories every run writes into.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// One request's unit of work, named `run_<8 hex chars>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    name: String,
}

impl Run {
    fn random() -> Self {
        let token = Uuid::new_v4().simple().to_string();
        Run {
            name: format!("run_{}", &token[..8]),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl StoragePaths {
    /// Creates both directories if they are missing.
    pub fn init(upload_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let paths = StoragePaths {
            upload_dir: upload_dir.into(),
            output_dir: output_dir.into(),
        };
        fs::create_dir_all(&paths.upload_dir)?;
        fs::create_dir_all(&paths.output_dir)?;
        Ok(paths)
    }

    /// Draws a fresh run and claims its output directory.
    ///
    /// The directory is created with `create_dir`, so a token that is already
    /// taken fails with `AlreadyExists` and is redrawn.
    pub fn reserve_run(&self) -> io::Result<Run> {
        for _ in 0..MAX_RESERVE_ATTEMPTS {
            let run = Run::random();
            match fs::create_dir(self.run_dir(&run)) {
                Ok(()) => return Ok(run),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not find a free run name",
        ))
    }

    pub fn run_dir(&self, run: &Run) -> PathBuf {
        self.output_dir.join(run.name())
    }

    /// `<upload_dir>/run_<token>_<sanitized filename>`
    pub fn upload_path(&self, run: &Run, original_filename: Option<&str>) -> PathBuf {
        let filename = original_filename
            .map(sanitize_filename)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "upload".to_string());
        self.upload_dir.join(format!("{}_{}", run.name(), filename))
    }
}

/// Writes `head` and then every chunk of `rest` to `path`, one chunk in
/// memory at a time. Returns the number of bytes written.
pub async fn save_upload<S, B, E>(path: &Path, head: &[u8], rest: S) -> Result<u64, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: From<io::Error>,
{
    pin_mut!(rest);
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(head).await?;
    let mut written = head.len() as u64;

    while let Some(chunk) = rest.try_next().await? {
        let chunk = chunk.as_ref();
        file.write_all(chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

pub fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_")
        .trim_start_matches('.')
        .to_string()
}
