//! Storage and File System Abstractions
//!
//! Provides the platform-agnostic file I/O trait used by the staging area.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// File metadata information
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub size: u64,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

/// File system access trait
///
/// Abstracts file I/O operations to support different platforms:
/// - Desktop: Direct filesystem access
/// - iOS/Android: Sandboxed app directories shared with the upload extension
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn stage(fs: &dyn FileSystemAccess, data: &[u8]) -> Result<()> {
///     let data_dir = fs.get_data_directory().await?;
///     let tmp = data_dir.join(".photo.partial");
///     fs.write_file(&tmp, data.to_vec().into()).await?;
///     fs.rename(&tmp, &data_dir.join("photo.png")).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Get the application's persistent data directory.
    ///
    /// Relative staging directories are resolved against it.
    async fn get_data_directory(&self) -> Result<PathBuf>;

    /// Check whether a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Get file metadata
    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create a directory and all missing parents
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read an entire file into memory
    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Write data to a file, truncating any previous content
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Atomically move `from` to `to`, replacing `to` if it exists.
    ///
    /// Both paths must be on the same volume.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file
    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// List the entries of a directory (non-recursive)
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
