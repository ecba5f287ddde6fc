use expensa_core::errors::{LookupError, StoreError};
use thiserror::Error;

pub mod expense;

pub use expense::SqlExpenseRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError::Backend(value.to_string())
    }
}

impl From<RepositoryError> for LookupError {
    fn from(value: RepositoryError) -> Self {
        LookupError::History(value.to_string())
    }
}
