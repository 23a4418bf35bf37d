use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Default name of the shared progress file, also read remotely by the
/// job orchestrator's polling loop.
pub const PROGRESS_STATUS: &str = "progress_status.txt";

/// Events delivered to a caller-supplied progress callback.
pub enum ProgressEvent {
    /// One more run (or the preparation phase) completed.
    Tick,
    /// Absolute completed-run count, observed by the remote poller.
    Count(u64),
    /// A sweep-level problem the UI should surface, e.g. a timeout.
    Error(String),
}

enum Sink {
    /// The caller tracks its own counter, typically a UI progress bar.
    Callback(Box<dyn Fn(ProgressEvent) + Send + Sync>),
    /// Shared on-disk counter for detached remote processes. The lock is
    /// scoped to this reporter instance so concurrent sweeps in one
    /// process do not contend.
    File { path: PathBuf, lock: Mutex<()> },
}

/// Concurrency-safe progress sink.
///
/// Failures while reporting are logged and swallowed: progress updates
/// must never abort a sweep.
pub struct ProgressReporter {
    sink: Sink,
}

impl ProgressReporter {
    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        Self {
            sink: Sink::Callback(Box::new(callback)),
        }
    }

    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            sink: Sink::File {
                path: path.as_ref().to_path_buf(),
                lock: Mutex::new(()),
            },
        }
    }

    /// Reset the counter to zero (file mode). Called once before the
    /// sweep starts so remote pollers read a defined value.
    pub fn start(&self) {
        if let Sink::File { path, lock } = &self.sink {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(error) = fs::write(path, "0") {
                log::error!("failed to reset progress file {path:?}: {error:#}");
            }
        }
    }

    /// Record one completed step.
    pub fn tick(&self) {
        match &self.sink {
            Sink::Callback(callback) => callback(ProgressEvent::Tick),
            Sink::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(error) = increment_file(path) {
                    log::error!("failed to update progress file {path:?}: {error:#}");
                }
            }
        }
    }

    /// Report an absolute completed-run count, as read from a remote
    /// progress file.
    pub fn count(&self, count: u64) {
        match &self.sink {
            Sink::Callback(callback) => callback(ProgressEvent::Count(count)),
            Sink::File { path, lock } => {
                let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Err(error) = fs::write(path, count.to_string()) {
                    log::error!("failed to update progress file {path:?}: {error:#}");
                }
            }
        }
    }

    /// Push an error message through the progress channel.
    pub fn error(&self, message: &str) {
        match &self.sink {
            Sink::Callback(callback) => callback(ProgressEvent::Error(message.to_string())),
            Sink::File { path, .. } => {
                log::error!("progress error for {path:?}: {message}");
            }
        }
    }
}

/// Locked read-increment-rewrite of the shared counter. The file is
/// truncated and rewritten at offset 0 on every update.
fn increment_file(path: &Path) -> Result<()> {
    let count = match fs::read_to_string(path) {
        Ok(contents) => contents
            .trim()
            .parse::<u64>()
            .with_context(|| format!("progress file holds {:?}", contents.trim()))?,
        Err(_) => 0,
    };
    fs::write(path, (count + 1).to_string()).context("failed to rewrite progress file")?;
    Ok(())
}

/// Read the current counter value, treating a missing or malformed file
/// as zero the way the remote poller does.
pub fn read_count<P: AsRef<Path>>(path: P) -> u64 {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse().ok())
        .unwrap_or(0)
}
