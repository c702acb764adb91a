mod from;

use std::{fmt::Display, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub const OK: Result<()> = Ok(());

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("no object found for key `{0}`")]
    ItemNotFound(String),

    #[error("remote URL `{0}` is invalid")]
    InvalidRemoteUrl(String),

    #[error("`{0}` is not a directory")]
    FileIsNotDirectory(PathBuf),

    #[error("`{0}` does not exist")]
    FileDoesNotExist(PathBuf),

    #[error("transfer of `{path}` failed: {reason}")]
    TransferFailed { path: PathBuf, reason: String },

    #[error("state file `{path}` has version {actual}, expected {expected}")]
    WrongStateVersion {
        path: PathBuf,
        actual: u32,
        expected: u32,
    },

    #[error("state store failed: {0}")]
    Store(Box<Error>),

    #[error("state store is closed")]
    StoreClosed,

    #[error("lock was closed")]
    LockClosed,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("run was cancelled")]
    Cancelled,

    #[error("walk of `{0}` did not complete, skipped reconciliation")]
    IncompleteWalk(PathBuf),

    #[error("{0} file(s) could not be backed up")]
    FilesFailed(u64),

    #[error(transparent)]
    Other(AnyError),
}

#[derive(Error, Debug)]
pub struct AnyError(anyhow::Error);

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl PartialEq for AnyError {
    fn eq(&self, _other: &Self) -> bool {
        false
    }
}

impl Error {
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(AnyError(error.into()))
    }

    pub fn store(error: Error) -> Self {
        match error {
            Error::Store(_) | Error::StoreClosed => error,
            error => Error::Store(Box::new(error)),
        }
    }

    /// Errors raised by shared infrastructure rather than by a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Store(_) | Error::StoreClosed | Error::LockClosed | Error::TaskFailed(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Error::Other(AnyError(error))
    }
}
