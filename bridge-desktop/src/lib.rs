//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `FileSystemAccess` using `tokio::fs`, with atomic rename for staging
//! - `MediaSource` over a drop folder, for hosts without a typed clipboard
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DirectoryMediaSource, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fs = TokioFileSystem::new();
//!     let source = DirectoryMediaSource::new("/home/me/Drop").with_source_tag("Drop");
//!
//!     // Hand both to the ingestion context
//! }
//! ```

mod filesystem;
mod media;

pub use filesystem::TokioFileSystem;
pub use media::{type_identifier_for_extension, DirectoryMediaSource};
