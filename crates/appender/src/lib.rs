//! Append-only NDJSON log with in-process write serialization.
//!
//! Every record becomes exactly one line. Writers share a single
//! [`LogAppender`] and take its lock only around the open/write/flush
//! sequence, so lines from concurrent callers never interleave.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{self, JoinError};

/// File name used when no explicit log path is configured.
pub const DEFAULT_LOG_FILE_NAME: &str = "conversations.ndjson";

pub type AppendResult<T> = Result<T, AppendError>;

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("failed to encode record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to {op} log file {}: {source}", .path.display())]
    Io {
        op: IoOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log writer task failed: {0}")]
    Task(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Open,
    Write,
    Flush,
}

impl fmt::Display for IoOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            IoOp::Open => "open",
            IoOp::Write => "write",
            IoOp::Flush => "flush",
        };
        f.write_str(verb)
    }
}

/// Acknowledgement returned for every stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub status: &'static str,
}

impl Ack {
    pub const OK: Ack = Ack { status: "ok" };
}

pub struct LogAppender {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl LogAppender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes `record` as compact JSON and appends it as one line.
    ///
    /// Non-ASCII text is written as-is. The file is created on first use but
    /// its parent directory is not; a missing directory is an `Open` error.
    /// Nothing is retried: on error the record is dropped.
    ///
    /// Once the lock is taken the write runs to completion on the blocking
    /// pool, even if the returned future is dropped; the lock is released
    /// only after the whole line is out.
    pub async fn append<T>(&self, record: &T) -> AppendResult<Ack>
    where
        T: Serialize + ?Sized,
    {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let bytes = line.len();

        let guard = Arc::clone(&self.write_lock).lock_owned().await;
        let path = self.path.clone();

        task::spawn_blocking(move || {
            let _guard = guard;
            write_line(&path, &line)
        })
        .await??;

        tracing::debug!(
            path = %self.path.display(),
            bytes,
            "appended log record"
        );

        Ok(Ack::OK)
    }
}

fn write_line(path: &Path, line: &[u8]) -> AppendResult<()> {
    let io_error = |op, source| AppendError::Io {
        op,
        path: path.to_path_buf(),
        source,
    };

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| io_error(IoOp::Open, source))?;
    file.write_all(line)
        .map_err(|source| io_error(IoOp::Write, source))?;
    file.flush()
        .map_err(|source| io_error(IoOp::Flush, source))?;

    Ok(())
}

impl fmt::Debug for LogAppender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogAppender")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
