//! Cache error types.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by cache lookups.
///
/// Every caller joined on the same in-flight computation receives a clone of
/// the same error, so the producer's error is kept behind an `Arc`.
/// Invalidation never fails and has no error variant.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The producer returned an error. Nothing was cached.
    #[error("producer failed: {0}")]
    Producer(Arc<anyhow::Error>),

    /// The producer panicked. Nothing was cached.
    #[error("producer panicked: {0}")]
    Panicked(String),

    /// The in-flight computation ended without delivering a result.
    #[error("in-flight computation was abandoned")]
    Abandoned,

    /// The caller stopped waiting. The shared computation keeps running.
    #[error("timed out after {0:?} waiting for value")]
    Timeout(Duration),
}

impl CacheError {
    pub(crate) fn producer(err: anyhow::Error) -> Self {
        Self::Producer(Arc::new(err))
    }

    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// The producer's own error, if this is a producer failure.
    pub fn producer_error(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Producer(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Whether the caller gave up waiting.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
