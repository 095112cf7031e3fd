//! Media Source Abstractions
//!
//! Traits for the volatile, externally-owned places media comes from
//! (system clipboard, photo library, a drop folder) and for decoding a
//! representative frame out of a staged movie.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

/// One item offered by a media source.
///
/// `encodings` lists the content-type tags (uniform type identifiers such as
/// `public.png` or `com.apple.quicktime-movie`) under which the source can
/// hand out the bytes of this item, in the order the source reports them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub encodings: Vec<String>,
}

impl MediaEntry {
    pub fn new<I, S>(encodings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            encodings: encodings.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the source offers this item under `encoding`
    pub fn offers(&self, encoding: &str) -> bool {
        self.encodings.iter().any(|e| e == encoding)
    }
}

/// External media source
///
/// Items are addressed by their index in the most recent enumeration. The
/// content can disappear at any time (the user copies something else, a
/// permission is revoked), so `fetch` returning `Ok(None)` is an expected
/// outcome and must be handled as a per-item failure by callers.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::media::MediaSource;
///
/// async fn first_png(source: &dyn MediaSource) -> Result<Option<Bytes>> {
///     let entries = source.enumerate().await?;
///     match entries.iter().position(|e| e.offers("public.png")) {
///         Some(index) => source.fetch(index, "public.png").await,
///         None => Ok(None),
///     }
/// }
/// ```
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Short tag identifying the source, used as the first component of
    /// staged file names (e.g. `Clipboard`). Must not contain `-`.
    fn source_tag(&self) -> &str;

    /// List the items currently available
    async fn enumerate(&self) -> Result<Vec<MediaEntry>>;

    /// Pull the raw bytes of item `index` encoded as `encoding`
    async fn fetch(&self, index: usize, encoding: &str) -> Result<Option<Bytes>>;
}

/// Decodes a still frame from a staged movie file.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// Return the frame at time offset zero as encoded image bytes
    /// (any format the `image` crate can decode).
    async fn first_frame(&self, movie: &Path) -> Result<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_entry_offers() {
        let entry = MediaEntry::new(["public.png", "public.jpeg"]);
        assert!(entry.offers("public.png"));
        assert!(entry.offers("public.jpeg"));
        assert!(!entry.offers("public.mpeg-4"));
    }
}
