//! Error types for taskq.

use thiserror::Error;

use crate::model::{State, TaskId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// An equivalent non-terminal task already exists. Callers should poll
    /// `existing` instead of resubmitting.
    #[error("duplicate task, {existing} queued")]
    Duplicate { existing: TaskId },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the Control API that has no dedicated variant.
    #[error("control api returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same call later can reasonably succeed.
    ///
    /// Store and transport failures are transient; domain outcomes
    /// (unknown task, duplicate, bad transition, bad input) are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Storage(_) | Error::Http(_) | Error::Io(_) => true,
            Error::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
