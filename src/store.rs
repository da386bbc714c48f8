//! Durable storage for session credentials
//!
//! The [`Authenticator`][crate::Authenticator] never caches a
//! [`TokenRecord`] beyond a single operation; every authorization decision
//! re-reads the store, so multiple clients sharing the same storage observe
//! consistent state. Implementations must make each individual call atomic;
//! multi-step sequences are serialized by the authenticator itself.

use std::{error, sync::Mutex};

use async_trait::async_trait;

use crate::TokenRecord;

#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub mod file;

#[cfg(feature = "file")]
pub use file::FileTokenStore;

/// Asynchronous storage for a session's token record
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The error type returned in the event that storage access fails
    type Error: error::Error + Send + Sync + 'static;

    /// Reads the current token record
    ///
    /// A store with no persisted session reports an empty record, not an
    /// error.
    async fn read(&self) -> Result<TokenRecord, Self::Error>;

    /// Replaces the token record
    async fn write(&self, record: &TokenRecord) -> Result<(), Self::Error>;

    /// Clears all session credentials
    async fn clear(&self) -> Result<(), Self::Error>;
}

/// Process-local token storage
///
/// Suitable for tests and for applications that do not carry a session
/// across restarts.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: Mutex<TokenRecord>,
}

impl MemoryTokenStore {
    /// Constructs an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a store pre-populated with the given record
    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    type Error = std::convert::Infallible;

    async fn read(&self) -> Result<TokenRecord, Self::Error> {
        Ok(self.record.lock().unwrap().clone_it())
    }

    async fn write(&self, record: &TokenRecord) -> Result<(), Self::Error> {
        *self.record.lock().unwrap() = record.clone_it();
        Ok(())
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        *self.record.lock().unwrap() = TokenRecord::empty();
        Ok(())
    }
}
