//! Drop-folder media source
//!
//! Desktop hosts have no shared clipboard of typed media items, so the
//! closest equivalent is a directory the user drops files into. Each regular,
//! non-hidden file is one item, offered under the single type identifier
//! implied by its extension.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    media::{MediaEntry, MediaSource},
};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const DEFAULT_SOURCE_TAG: &str = "Folder";

/// Media source backed by the files of a directory
pub struct DirectoryMediaSource {
    root: PathBuf,
    tag: String,
    snapshot: Mutex<Vec<(PathBuf, &'static str)>>,
}

impl DirectoryMediaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tag: DEFAULT_SOURCE_TAG.to_string(),
            snapshot: Mutex::new(Vec::new()),
        }
    }

    /// Override the tag used in staged file names. Dashes are stripped
    /// because the tag is the first `-`-separated component of the name.
    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into().replace('-', "");
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map a file extension to the uniform type identifier a clipboard would
/// report for the same content.
pub fn type_identifier_for_extension(extension: &str) -> Option<&'static str> {
    let uti = match extension.to_ascii_lowercase().as_str() {
        "png" => "public.png",
        "heic" => "public.heic",
        "heif" => "public.heif",
        "tif" | "tiff" => "public.tiff",
        "jpg" | "jpeg" => "public.jpeg",
        "dng" | "raw" | "cr2" | "nef" | "arw" => "public.camera-raw-image",
        "webp" => "com.google.webp",
        "gif" => "com.compuserve.gif",
        "bmp" => "com.microsoft.bmp",
        "ico" => "com.microsoft.ico",
        "mov" => "com.apple.quicktime-movie",
        "mpg" | "mpeg" => "public.mpeg",
        "m2v" => "public.mpeg-2-video",
        "mp4" | "m4v" => "public.mpeg-4",
        "avi" => "public.avi",
        _ => return None,
    };
    Some(uti)
}

#[async_trait]
impl MediaSource for DirectoryMediaSource {
    fn source_tag(&self) -> &str {
        &self.tag
    }

    async fn enumerate(&self) -> Result<Vec<MediaEntry>> {
        let mut read_dir = match fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.snapshot.lock().await.clear();
                return Ok(Vec::new());
            }
            Err(e) => return Err(BridgeError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(true, |n| n.starts_with('.'));
            if hidden || !entry.file_type().await?.is_file() {
                continue;
            }
            let uti = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(type_identifier_for_extension);
            match uti {
                Some(uti) => files.push((path, uti)),
                None => debug!(path = ?path, "Skipping file with unsupported extension"),
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let entries = files
            .iter()
            .map(|(_, uti)| MediaEntry::new([*uti]))
            .collect::<Vec<_>>();
        debug!(root = ?self.root, count = entries.len(), "Enumerated drop folder");

        *self.snapshot.lock().await = files;
        Ok(entries)
    }

    async fn fetch(&self, index: usize, encoding: &str) -> Result<Option<Bytes>> {
        let path = {
            let snapshot = self.snapshot.lock().await;
            match snapshot.get(index) {
                Some((path, uti)) if *uti == encoding => path.clone(),
                _ => return Ok(None),
            }
        };

        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = ?path, "Item vanished from drop folder");
                Ok(None)
            }
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}
