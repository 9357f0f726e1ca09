use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure talking to the backing store.
#[derive(Debug)]
pub enum StoreError {
    /// No connection could be checked out within the pool timeout
    Pool(String),
    /// The query itself failed
    Query(diesel::result::Error),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Pool(e) => write!(f, "connection pool error: {}", e),
            StoreError::Query(e) => write!(f, "query failed: {}", e),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Query(e) => Some(e),
            StoreError::Pool(_) => None,
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        StoreError::Query(value)
    }
}

impl From<diesel::r2d2::PoolError> for StoreError {
    fn from(value: diesel::r2d2::PoolError) -> Self {
        StoreError::Pool(value.to_string())
    }
}
