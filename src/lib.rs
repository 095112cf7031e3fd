//! Workspace facade crate.
//!
//! Re-exports the pipeline crates so a host can depend on
//! `upload-pipeline-workspace` alone and get a desktop-ready ingestion
//! pipeline through the `desktop-shims` feature.

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop;
#[cfg(feature = "desktop-shims")]
pub use bridge_traits;
#[cfg(feature = "desktop-shims")]
pub use core_runtime;
#[cfg(feature = "desktop-shims")]
pub use core_upload;
