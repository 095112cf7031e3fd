//! # Staging Store
//!
//! Durable directory holding prepared bytes until the uploader reads them.
//!
//! Files are written to a hidden `.{identifier}.partial` sibling and renamed
//! into place, so a reader never observes a half-written file under its final
//! name. Staging the same identifier again replaces the previous content.

use crate::{Result, UploadError};
use bridge_traits::{BridgeError, FileSystemAccess};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const PARTIAL_SUFFIX: &str = ".partial";

pub struct StagingStore {
    fs: Arc<dyn FileSystemAccess>,
    root: PathBuf,
}

impl StagingStore {
    pub fn new(fs: Arc<dyn FileSystemAccess>, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final location of `identifier`
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier)
    }

    /// Write `data` under `identifier`, replacing any earlier content.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn stage(&self, identifier: &str, data: Bytes) -> Result<PathBuf> {
        validate_identifier(identifier)?;

        let target = self.path_for(identifier);
        let partial = self
            .root
            .join(format!(".{}{}", identifier, PARTIAL_SUFFIX));
        let storage_error = |e: BridgeError| UploadError::Storage {
            identifier: identifier.to_string(),
            message: e.to_string(),
        };

        self.fs
            .create_dir_all(&self.root)
            .await
            .map_err(storage_error)?;
        self.fs
            .write_file(&partial, data)
            .await
            .map_err(storage_error)?;

        if let Err(e) = self.fs.rename(&partial, &target).await {
            if let Err(cleanup) = self.fs.delete_file(&partial).await {
                warn!(error = %cleanup, "Failed to remove partial file");
            }
            return Err(storage_error(e));
        }

        debug!(path = ?target, "Staged file");
        Ok(target)
    }

    /// Whether `identifier` is staged as a regular file
    pub async fn contains(&self, identifier: &str) -> Result<bool> {
        validate_identifier(identifier)?;
        let path = self.path_for(identifier);
        if !self.fs.exists(&path).await? {
            return Ok(false);
        }
        Ok(!self.fs.metadata(&path).await?.is_directory)
    }

    /// Remove a staged file. Missing files are not an error.
    pub async fn discard(&self, identifier: &str) -> Result<()> {
        validate_identifier(identifier)?;
        let path = self.path_for(identifier);
        if self.fs.exists(&path).await? {
            self.fs.delete_file(&path).await?;
            debug!(path = ?path, "Discarded staged file");
        }
        Ok(())
    }

    /// Delete leftovers of interrupted writes. Returns how many were removed.
    pub async fn purge_partials(&self) -> Result<usize> {
        if !self.fs.exists(&self.root).await? {
            return Ok(0);
        }

        let mut removed = 0;
        for path in self.fs.list_directory(&self.root).await? {
            let is_partial = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX));
            if is_partial {
                self.fs.delete_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Purged partial staging files");
        }
        Ok(removed)
    }
}

/// Identifiers become file names; they must name a single, visible entry.
fn validate_identifier(identifier: &str) -> Result<()> {
    let valid = !identifier.is_empty()
        && !identifier.starts_with('.')
        && !identifier.contains(['/', '\\'])
        && identifier != "..";
    if valid {
        Ok(())
    } else {
        Err(UploadError::Storage {
            identifier: identifier.to_string(),
            message: "identifier is not a plain file name".to_string(),
        })
    }
}
