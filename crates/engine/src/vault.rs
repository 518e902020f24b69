//! File content source.
//!
//! The engine never reads attachment bytes itself; it asks a [`Vault`] for
//! the decrypted range it is about to send.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use reportlink_protocol::ReportFile;
use reportlink_transfer::{read_range, validate_file_name};
use tracing::debug;

use crate::error::VaultError;

/// Bytes `[offset, size)` of a file, with where they were materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSlice {
    pub url: PathBuf,
    pub data: Vec<u8>,
}

/// Future returned by [`Vault::load`].
pub type VaultFuture<'a> = Pin<Box<dyn Future<Output = Result<FileSlice, VaultError>> + Send + 'a>>;

/// Provides readable content for report attachments.
pub trait Vault: Send + Sync {
    /// Loads the content of `file` from byte `offset` to its end.
    fn load(&self, file: &ReportFile, offset: u64) -> VaultFuture<'_>;
}

/// Vault storing each attachment as a plain file named by its file id.
#[derive(Debug, Clone)]
pub struct DirectoryVault {
    root: PathBuf,
}

impl DirectoryVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl Vault for DirectoryVault {
    fn load(&self, file: &ReportFile, offset: u64) -> VaultFuture<'_> {
        let file_id = file.file_id.clone();
        Box::pin(async move {
            validate_file_name(&file_id)?;
            let path = self.root.join(&file_id);
            if !path.is_file() {
                return Err(VaultError::NotFound(file_id));
            }

            let data = tokio::task::spawn_blocking({
                let path = path.clone();
                move || read_range(&path, offset)
            })
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;

            debug!(file = %file_id, offset, bytes = data.len(), "loaded from vault");
            Ok(FileSlice { url: path, data })
        })
    }
}
