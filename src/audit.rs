//! Audit logging of prompt exchanges.
//!
//! This module provides the [`AuditLog`] trait the session hands every
//! finished exchange to, and [`JsonlAuditLog`], which appends one JSON object
//! per line to a file.  Recording is best-effort from the session's point of
//! view: see [`record_best_effort`].

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::observability::{AUDIT_FAILURES, AUDIT_RECORDS};
use crate::types::{AuditRecord, SessionResult};
use crate::utils::time;

/// Environment variable naming the audit log file.
pub const AUDIT_PATH_ENV: &str = "TEEPROMPT_AUDIT_PATH";

/// A sink for finished exchanges.
///
/// # Example
///
/// ```rust,ignore
/// use std::sync::Mutex;
/// use teeprompt::{AuditLog, SessionResult};
///
/// #[derive(Default)]
/// struct MemoryLog(Mutex<Vec<SessionResult>>);
///
/// impl AuditLog for MemoryLog {
///     fn record(&self, result: &SessionResult) -> teeprompt::Result<()> {
///         self.0.lock().unwrap().push(result.clone());
///         Ok(())
///     }
/// }
/// ```
pub trait AuditLog: Send + Sync {
    /// Persist one exchange.
    ///
    /// Called exactly once per exchange, after it succeeded, failed or was
    /// interrupted.
    fn record(&self, result: &SessionResult) -> Result<()>;
}

/// Record `result`, reporting failures through `tracing` instead of returning them.
pub fn record_best_effort(log: &dyn AuditLog, result: &SessionResult) {
    match log.record(result) {
        Ok(()) => AUDIT_RECORDS.click(),
        Err(err) => {
            AUDIT_FAILURES.click();
            tracing::warn!(error = %err, "failed to record exchange in audit log");
        }
    }
}

/// Append-only JSON-lines audit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonlAuditLog {
    path: PathBuf,
}

impl JsonlAuditLog {
    /// An audit log stored at `path`.  The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The audit log named by [`AUDIT_PATH_ENV`], if set and non-empty.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        lookup(AUDIT_PATH_ENV)
            .filter(|p| !p.trim().is_empty())
            .map(Self::new)
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last `n` records, oldest first.
    ///
    /// A missing file has no records.  Lines that do not parse are skipped
    /// with a warning.
    pub fn recent(&self, n: usize) -> Result<Vec<AuditRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(Error::logging(
                    format!("cannot open {}: {err}", self.path.display()),
                    Some(Box::new(err)),
                ));
            }
        };
        let mut records = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| {
                Error::logging(
                    format!("cannot read {}: {err}", self.path.display()),
                    Some(Box::new(err)),
                )
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(
                        line = index + 1,
                        error = %err,
                        "skipping unreadable audit record"
                    );
                }
            }
        }
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }
}

impl AuditLog for JsonlAuditLog {
    fn record(&self, result: &SessionResult) -> Result<()> {
        let record = AuditRecord::new(result.clone(), time::now());
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| {
                Error::logging(
                    format!("cannot open {}: {err}", self.path.display()),
                    Some(Box::new(err)),
                )
            })?;
        file.write_all(line.as_bytes()).map_err(|err| {
            Error::logging(
                format!("cannot write {}: {err}", self.path.display()),
                Some(Box::new(err)),
            )
        })?;
        tracing::debug!(path = %self.path.display(), model = %result.model, "recorded exchange");
        Ok(())
    }
}
