use crate::borrow::BorrowError;
use thiserror::Error;

/// Errors reported by a persistent entity store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store is closed")]
    Closed,

    #[error("store rejected batch for region {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum Error {
    /// A second `ActiveSet::for_each` was started while one
    /// was still running.
    #[error("only one concurrent iteration of the active set is supported")]
    ReentrantIteration,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Borrow(#[from] BorrowError),
}

pub type Result<T> = std::result::Result<T, Error>;
