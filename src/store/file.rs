//! A token store backed by a local file
//!
//! Allows a session to survive application restarts, or multiple instances
//! sharing a filesystem to share one session.

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::TokenStore;
use crate::TokenRecord;

/// A token store that persists the session record as JSON in a local file
///
/// On unix, the file is created with mode `0o600`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Constructs a store persisting to the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_record(&self) -> Result<TokenRecord, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(TokenRecord::empty());
            }
            Err(err) => return Err(err),
        };
        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        let record = serde_json::from_str(&data)?;
        Ok(record)
    }

    async fn write_record(&self, record: &TokenRecord) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        let data = serde_json::to_string_pretty(record)?;
        file.write_all(data.as_bytes()).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    type Error = io::Error;

    async fn read(&self) -> Result<TokenRecord, Self::Error> {
        self.read_record().await
    }

    async fn write(&self, record: &TokenRecord) -> Result<(), Self::Error> {
        self.write_record(record).await
    }

    async fn clear(&self) -> Result<(), Self::Error> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
