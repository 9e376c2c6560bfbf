use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Deletes run artifacts some time after they were produced.
///
/// Every scheduled path gets its own background task. Nothing can cancel a
/// scheduled deletion, and nothing waits for readers of the path; a client
/// still downloading an image when the timer fires loses the race. Pending
/// tasks are dropped with the runtime on shutdown.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    delay: Duration,
    pending: Arc<AtomicUsize>,
}

impl CleanupScheduler {
    pub fn new(delay: Duration) -> Self {
        CleanupScheduler {
            delay,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of deletions scheduled but not yet run.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn schedule(&self, path: PathBuf) {
        self.schedule_after(path, self.delay);
    }

    /// Must be called from within a tokio runtime.
    pub fn schedule_after(&self, path: PathBuf, delay: Duration) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let pending = Arc::clone(&self.pending);
        debug!("Scheduling removal of {} in {:?}", path.display(), delay);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            remove_path(&path).await;
            pending.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn remove_path(path: &Path) {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} already gone", path.display());
            return;
        }
        Err(e) => {
            warn!("Could not stat {}: {}", path.display(), e);
            return;
        }
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };

    match result {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
