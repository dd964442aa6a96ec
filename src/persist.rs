//! Local mirror of emitted events on disk.
//!
//! Each run writes one append-only file, `{log_path}/logs/{run_id}.log`,
//! with one `{timestamp}:{message}` line per event. Until the run id is
//! set, events wait in an in-memory cache and are written ahead of the
//! next event once it is.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;

/// Directory under the log path that holds run files.
const LOG_DIR_NAME: &str = "logs";

/// Timestamp-derived token naming the current run's log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a run id from the given start time.
    ///
    /// `:` is not valid in file names on every platform, so it becomes `_`.
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(crate::event::format_timestamp(at).replace(':', "_"))
    }

    pub fn now() -> Self {
        Self::from_time(Utc::now())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors writing the local log file.
#[derive(Debug)]
pub enum PersistError {
    /// The logs directory could not be created
    CreateDir { path: PathBuf, source: io::Error },

    /// The run file could not be opened
    Open { path: PathBuf, source: io::Error },

    /// Writing or closing the run file failed
    Write { path: PathBuf, source: io::Error },
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::CreateDir { path, source } => {
                write!(f, "Failed to create log directory {}: {}", path.display(), source)
            }
            PersistError::Open { path, source } => {
                write!(f, "Failed to open log file {}: {}", path.display(), source)
            }
            PersistError::Write { path, source } => {
                write!(f, "Failed to write log file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistError::CreateDir { source, .. }
            | PersistError::Open { source, .. }
            | PersistError::Write { source, .. } => Some(source),
        }
    }
}

/// Returned when the run id is set a second time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdError {
    pub current: RunId,
}

impl std::fmt::Display for RunIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Run id already set to {}", self.current)
    }
}

impl std::error::Error for RunIdError {}

#[derive(Debug, Clone)]
struct CachedLine {
    timestamp: String,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    run_id: Option<RunId>,
    cache: Vec<CachedLine>,
    lines_written: u64,
}

/// Writes events to the per-run log file.
#[derive(Debug)]
pub struct LocalPersister {
    log_path: PathBuf,
    state: Mutex<State>,
}

impl LocalPersister {
    /// Create a persister rooted at `log_path`. No run id is set yet.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fix the run id. Only the first call succeeds.
    pub fn set_run_id(&self, run_id: RunId) -> Result<(), RunIdError> {
        let mut state = self.lock();
        if let Some(current) = &state.run_id {
            return Err(RunIdError {
                current: current.clone(),
            });
        }
        debug!(run_id = %run_id, "Run id set");
        state.run_id = Some(run_id);
        Ok(())
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.lock().run_id.clone()
    }

    /// Directory holding the run files.
    pub fn log_dir(&self) -> PathBuf {
        self.log_path.join(LOG_DIR_NAME)
    }

    /// Path of the current run file, once the run id is set.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.lock()
            .run_id
            .as_ref()
            .map(|id| self.log_dir().join(format!("{}.log", id)))
    }

    /// Number of events waiting in the cache.
    pub fn pending(&self) -> usize {
        self.lock().cache.len()
    }

    /// Total lines written to disk by this persister.
    pub fn lines_written(&self) -> u64 {
        self.lock().lines_written
    }

    /// Record one event.
    ///
    /// Without a run id the event is cached. With one, the cache and then
    /// the event are appended to the run file, which is opened and closed
    /// within this call. The cache is only cleared once every line is on
    /// disk; a failed write leaves it intact.
    pub fn record(&self, message: &str, timestamp: &str) -> Result<(), PersistError> {
        let mut state = self.lock();

        let Some(run_id) = state.run_id.clone() else {
            state.cache.push(CachedLine {
                timestamp: timestamp.to_string(),
                message: message.to_string(),
            });
            return Ok(());
        };

        let dir = self.log_dir();
        fs::create_dir_all(&dir).map_err(|source| PersistError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(format!("{}.log", run_id));
        let mut contents = String::new();
        for line in &state.cache {
            push_line(&mut contents, &line.timestamp, &line.message);
        }
        push_line(&mut contents, timestamp, message);

        write_append(&path, contents.as_bytes())?;

        state.lines_written += state.cache.len() as u64 + 1;
        state.cache.clear();
        Ok(())
    }
}

fn push_line(out: &mut String, timestamp: &str, message: &str) {
    out.push_str(timestamp);
    out.push(':');
    out.push_str(message);
    out.push('\n');
}

fn write_append(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| PersistError::Open {
            path: path.to_path_buf(),
            source,
        })?;

    let write_err = |source| PersistError::Write {
        path: path.to_path_buf(),
        source,
    };
    file.write_all(bytes).map_err(write_err)?;
    file.sync_data().map_err(write_err)?;
    Ok(())
}
