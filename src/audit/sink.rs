//! Durable audit sinks.
//!
//! A sink persists one event at a time; the logger owns buffering and
//! retries, so sinks just report success or failure per write.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::AuditEvent;

/// Durable sink failure
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Audit sink I/O error: {0}")]
    Io(String),

    #[error("Audit sink serialization error: {0}")]
    Serialization(String),
}

/// A durable destination for audit events
pub trait AuditSink: Send + Sync {
    fn write(&self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// JSON-lines file sink, one event per line
///
/// The file handle is kept open for the process lifetime; each write is
/// flushed so a crash loses at most the event being written.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SinkError::Io(e.to_string()))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(|e| SinkError::Io(e.to_string()))?;

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileSink {
    fn write(&self, event: &AuditEvent) -> Result<(), SinkError> {
        let line =
            serde_json::to_string(event).map_err(|e| SinkError::Serialization(e.to_string()))?;

        let mut file = self.file.lock();
        writeln!(file, "{}", line).map_err(|e| SinkError::Io(e.to_string()))?;
        file.flush().map_err(|e| SinkError::Io(e.to_string()))
    }
}
