use thiserror::Error;

/// Errors surfaced by every layer of the storage and transaction core.
#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("out of space: {0}")]
    OutOfSpace(String),

    #[error("buffer pool full: no frame could be evicted")]
    BufferFull,

    #[error("lock timeout acquiring {lock_type} lock on page {page_id}")]
    LockTimeout { page_id: u32, lock_type: &'static str },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for DbError {
    fn from(e: std::io::Error) -> Self {
        DbError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
