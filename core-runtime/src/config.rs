//! # Ingestion Configuration
//!
//! Provides configuration management for the upload ingestion pipeline.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `IngestionConfig` holding the staging location, preparation limits,
//! thumbnail geometry and the file system bridge. It enforces fail-fast
//! validation so a controller is never created around an unusable setup.
//!
//! ## Required Settings
//!
//! - `staging_dir` - Where prepared files are written before upload; relative
//!   paths are resolved against the host data directory
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `FileSystemAccess` - File I/O (desktop default: tokio fs)
//!
//! When the `desktop-shims` feature is enabled, a desktop file system is
//! injected automatically if none is provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::IngestionConfig;
//!
//! let config = IngestionConfig::builder()
//!     .staging_dir("/tmp/uploads")
//!     .max_concurrent_preparations(4)
//!     .build()
//!     .expect("Failed to build config");
//!
//! assert_eq!(config.thumbnail_edge_pixels(), 288);
//! ```

use crate::error::{Error, Result};
use bridge_traits::FileSystemAccess;
use std::path::PathBuf;
use std::sync::Arc;

/// Thumbnail edge in points when none is configured.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 144;

/// Display scale used to turn points into pixels.
pub const DEFAULT_PIXEL_SCALE: f32 = 2.0;

const MAX_PIXEL_SCALE: f32 = 4.0;

/// Configuration for an ingestion controller.
///
/// Use [`IngestionConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct IngestionConfig {
    /// Directory holding staged files
    pub staging_dir: PathBuf,

    /// Upper bound on preparation tasks running at once; `None` is unbounded
    pub max_concurrent_preparations: Option<usize>,

    /// Thumbnail edge length in points
    pub thumbnail_size: u32,

    /// Points-to-pixels factor for thumbnails
    pub pixel_scale: f32,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// File system access abstraction
    pub file_system: Arc<dyn FileSystemAccess>,
}

impl std::fmt::Debug for IngestionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionConfig")
            .field("staging_dir", &self.staging_dir)
            .field(
                "max_concurrent_preparations",
                &self.max_concurrent_preparations,
            )
            .field("thumbnail_size", &self.thumbnail_size)
            .field("pixel_scale", &self.pixel_scale)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("file_system", &"<FileSystemAccess>")
            .finish()
    }
}

impl IngestionConfig {
    /// Creates a new builder for constructing an `IngestionConfig`.
    pub fn builder() -> IngestionConfigBuilder {
        IngestionConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Staging directory is not empty
    /// - Concurrency limit, if set, is at least one
    /// - Thumbnail size and event buffer are non-zero
    /// - Pixel scale lies in `(0, 4]`
    pub fn validate(&self) -> Result<()> {
        if self.staging_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Staging directory cannot be empty".to_string(),
            ));
        }

        if self.max_concurrent_preparations == Some(0) {
            return Err(Error::Config(
                "max_concurrent_preparations must be at least 1. \
                 Leave it unset for unbounded preparation."
                    .to_string(),
            ));
        }

        if self.thumbnail_size == 0 {
            return Err(Error::Config(
                "Thumbnail size must be greater than 0".to_string(),
            ));
        }

        if !(self.pixel_scale > 0.0 && self.pixel_scale <= MAX_PIXEL_SCALE) {
            return Err(Error::Config(format!(
                "Pixel scale {} is outside (0, {}]",
                self.pixel_scale, MAX_PIXEL_SCALE
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Thumbnail edge in pixels after applying the display scale.
    pub fn thumbnail_edge_pixels(&self) -> u32 {
        (self.thumbnail_size as f32 * self.pixel_scale).round() as u32
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn file_system_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required for staging files. \
                 Desktop: ensure the 'desktop-shims' feature is enabled to use the default TokioFileSystem. \
                 Mobile: inject a file system scoped to the app group container."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    use bridge_desktop::TokioFileSystem;

    let fs: Arc<dyn FileSystemAccess> = Arc::new(TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(file_system_missing_error())
}

/// Builder for constructing [`IngestionConfig`] instances.
#[derive(Default)]
pub struct IngestionConfigBuilder {
    staging_dir: Option<PathBuf>,
    max_concurrent_preparations: Option<usize>,
    thumbnail_size: Option<u32>,
    pixel_scale: Option<f32>,
    event_buffer_size: Option<usize>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
}

impl IngestionConfigBuilder {
    /// Sets the staging directory (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::IngestionConfig;
    ///
    /// let builder = IngestionConfig::builder()
    ///     .staging_dir("/path/to/uploads");
    /// ```
    pub fn staging_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.staging_dir = Some(path.into());
        self
    }

    /// Bounds how many items are prepared at once.
    pub fn max_concurrent_preparations(mut self, limit: usize) -> Self {
        self.max_concurrent_preparations = Some(limit);
        self
    }

    pub fn thumbnail_size(mut self, points: u32) -> Self {
        self.thumbnail_size = Some(points);
        self
    }

    pub fn pixel_scale(mut self, scale: f32) -> Self {
        self.pixel_scale = Some(scale);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the file system implementation.
    ///
    /// If not provided, a desktop default is used when the `desktop-shims`
    /// feature is enabled.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    /// Builds the final `IngestionConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(IngestionConfig)` on success, or an error if:
    /// - The staging directory is missing
    /// - No file system is available
    /// - Configuration values are invalid
    pub fn build(self) -> Result<IngestionConfig> {
        let staging_dir = self.staging_dir.ok_or_else(|| {
            Error::Config(
                "Staging directory is required. Use .staging_dir() to set it.".to_string(),
            )
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let config = IngestionConfig {
            staging_dir,
            max_concurrent_preparations: self.max_concurrent_preparations,
            thumbnail_size: self.thumbnail_size.unwrap_or(DEFAULT_THUMBNAIL_SIZE),
            pixel_scale: self.pixel_scale.unwrap_or(DEFAULT_PIXEL_SCALE),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            file_system,
        };

        config.validate()?;

        Ok(config)
    }
}
