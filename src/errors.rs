//! Error taxonomy for every pipeline stage.
//!
//! Each variant that the spec calls retryable or fatal carries that fact
//! explicitly so callers never have to pattern-match on error messages.

use thiserror::Error;

/// Errors from the upstream NZTAB HTTP client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("upstream transport error: {0}")]
    Transport(String),

    #[error("upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode upstream JSON: {0}")]
    Decode(String),
}

impl FetchError {
    /// 5xx, transport failures and timeouts are retryable; 4xx other than
    /// 404 is fatal. 404 is not represented as an error at all (it yields
    /// `None` from the client and `skipped` from the pipeline).
    pub fn retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::Transport(_) => true,
            FetchError::Http { status, .. } => *status >= 500,
            FetchError::Decode(_) => false,
        }
    }
}

/// Validation or worker-crash errors from the transform stage. Never
/// retryable: they indicate a schema change or a bug, not transient state.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("missing required field '{0}' in upstream payload")]
    MissingField(String),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("transform worker panicked: {0}")]
    WorkerPanic(String),
}

/// Errors surfaced by the bulk upsert layer.
#[derive(Debug, Error)]
pub enum DatabaseWriteError {
    #[error("unique constraint violated on a secondary index: {0}")]
    UniqueViolation(String),

    #[error("serialization failure or deadlock, safe to retry: {0}")]
    SerializationFailure(String),

    #[error("database write failed: {0}")]
    Other(String),
}

impl DatabaseWriteError {
    pub fn retryable(&self) -> bool {
        matches!(self, DatabaseWriteError::SerializationFailure(_))
    }
}

/// Raised by the time-series writer when the target date partition does not
/// exist. Fatal: partition provisioning is an out-of-band maintenance
/// responsibility, never created on demand by this crate.
#[derive(Debug, Error)]
#[error("no partition exists for date {date}: {table}")]
pub struct PartitionNotFoundError {
    pub table: String,
    pub date: chrono::NaiveDate,
}

/// Wraps any error raised inside `with_transaction`'s closure that is not
/// already a typed pipeline error.
#[derive(Debug, Error)]
#[error("transaction failed: {0}")]
pub struct TransactionError(pub String);

/// Union of the three write-stage failure modes.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Database(#[from] DatabaseWriteError),

    #[error(transparent)]
    Partition(#[from] PartitionNotFoundError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl WriteError {
    pub fn retryable(&self) -> bool {
        match self {
            WriteError::Database(e) => e.retryable(),
            WriteError::Partition(_) => false,
            WriteError::Transaction(_) => false,
        }
    }
}

impl From<sqlx::Error> for DatabaseWriteError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            match db_err.code().as_deref() {
                Some("23505") => return DatabaseWriteError::UniqueViolation(db_err.to_string()),
                Some("40001") | Some("40P01") => {
                    return DatabaseWriteError::SerializationFailure(db_err.to_string())
                }
                _ => {}
            }
        }
        DatabaseWriteError::Other(err.to_string())
    }
}

/// The terminal stage at which a race's pipeline run failed, used both in
/// the per-race result descriptor and the batch controller's failure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Transform,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Write => "write",
        }
    }
}

/// A single failure descriptor attached to a non-success pipeline result.
#[derive(Debug, Clone)]
pub struct PipelineErrorDescriptor {
    pub stage: Stage,
    pub message: String,
    pub retryable: bool,
}

/// Not a failure — a normal early exit when another instance holds the
/// job's lock with a fresh heartbeat.
#[derive(Debug, Error)]
#[error("lock contention: another holder is active for job '{job_name}'")]
pub struct LockContentionTermination {
    pub job_name: String,
}

/// Not a failure — a normal early exit once NZ local time has crossed the
/// configured termination hour.
#[derive(Debug, Error)]
#[error("terminating for NZ time cutoff (job '{job_name}')")]
pub struct NzTimeTermination {
    pub job_name: String,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(transparent)]
    Contention(#[from] LockContentionTermination),

    #[error(transparent)]
    NzTime(#[from] NzTimeTermination),

    #[error("lock store error: {0}")]
    Store(String),
}
