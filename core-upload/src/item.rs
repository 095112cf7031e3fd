//! # Source Items
//!
//! One externally available media item of the working set and its
//! preparation state machine.
//!
//! ## State Machine
//!
//! ```text
//! New → Staged → Ready
//!  ↓
//! Failed
//! ```
//!
//! `Ready` and `Failed` are terminal for a pass. A new pass always builds
//! fresh items in `New`; items are never carried over.

use crate::naming::MediaKind;
use crate::thumbnail::Thumbnail;
use crate::{Result, UploadError};
use bridge_traits::JobRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Preparation state of a [`SourceItem`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    /// Discovered, nothing extracted yet
    New,
    /// Bytes hashed and written to the staging area
    Staged,
    /// Staged and thumbnail derived
    Ready,
    /// Extraction or staging failed
    Failed,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::New => "new",
            ItemState::Staged => "staged",
            ItemState::Ready => "ready",
            ItemState::Failed => "failed",
        }
    }

    /// Whether the item carries a digest in this state
    pub fn has_digest(&self) -> bool {
        matches!(self, ItemState::Staged | ItemState::Ready)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key matching an item to persisted jobs: the digest once known, the
/// identifier before that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JoinKey {
    Digest(String),
    Identifier(String),
}

impl JoinKey {
    pub fn of_record(record: &JobRecord) -> Self {
        if record.content_digest.is_empty() {
            JoinKey::Identifier(record.source_identifier.clone())
        } else {
            JoinKey::Digest(record.content_digest.clone())
        }
    }

    /// Whether `record` belongs to the item with this key.
    ///
    /// A digest only ever matches a digest. An identifier matches the record's
    /// source identifier with or without the staged extension.
    pub fn matches(&self, record: &JobRecord) -> bool {
        match self {
            JoinKey::Digest(digest) => record.content_digest == *digest,
            JoinKey::Identifier(identifier) => {
                record.content_digest.is_empty()
                    && (record.source_identifier == *identifier
                        || record
                            .source_identifier
                            .strip_prefix(identifier.as_str())
                            .is_some_and(|rest| rest.starts_with('.')))
            }
        }
    }
}

/// One media item of the working set
#[derive(Debug, Clone, PartialEq)]
pub struct SourceItem {
    /// Index of the item in the source's enumeration
    pub source_index: usize,
    identifier: String,
    kind: MediaKind,
    encodings: Vec<String>,
    extension: Option<String>,
    digest: String,
    thumbnail: Thumbnail,
    state: ItemState,
}

impl SourceItem {
    pub fn new(source_index: usize, identifier: impl Into<String>, encodings: Vec<String>) -> Self {
        let kind = MediaKind::classify(&encodings);
        Self {
            source_index,
            identifier: identifier.into(),
            kind,
            encodings,
            extension: None,
            digest: String::new(),
            thumbnail: Thumbnail::Placeholder,
            state: ItemState::New,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn encodings(&self) -> &[String] {
        &self.encodings
    }

    /// Empty until the item is staged
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn thumbnail(&self) -> &Thumbnail {
        &self.thumbnail
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn join_key(&self) -> JoinKey {
        if self.digest.is_empty() {
            JoinKey::Identifier(self.identifier.clone())
        } else {
            JoinKey::Digest(self.digest.clone())
        }
    }

    /// Fix the staged file name by appending `.{extension}`. Allowed once.
    pub fn append_extension(&mut self, extension: &str) -> Result<()> {
        if let Some(existing) = &self.extension {
            return Err(UploadError::InvalidStateTransition {
                from: self.identifier.clone(),
                to: format!("{}.{}", self.identifier, extension),
                reason: format!("extension already set to {}", existing),
            });
        }
        self.identifier = format!("{}.{}", self.identifier, extension);
        self.extension = Some(extension.to_string());
        Ok(())
    }

    pub fn mark_staged(&mut self, digest: impl Into<String>) -> Result<()> {
        let digest = digest.into();
        if self.state != ItemState::New {
            return Err(self.transition_error(ItemState::Staged, "only new items can be staged"));
        }
        if digest.is_empty() {
            return Err(self.transition_error(ItemState::Staged, "digest is empty"));
        }
        if self.extension.is_none() {
            return Err(self.transition_error(ItemState::Staged, "no extension assigned"));
        }
        self.digest = digest;
        self.state = ItemState::Staged;
        Ok(())
    }

    pub fn mark_ready(&mut self, thumbnail: Thumbnail) -> Result<()> {
        if self.state != ItemState::Staged {
            return Err(self.transition_error(ItemState::Ready, "item is not staged"));
        }
        self.thumbnail = thumbnail;
        self.state = ItemState::Ready;
        Ok(())
    }

    pub fn mark_failed(&mut self) -> Result<()> {
        if self.state != ItemState::New {
            return Err(self.transition_error(ItemState::Failed, "only new items can fail"));
        }
        self.state = ItemState::Failed;
        Ok(())
    }

    fn transition_error(&self, to: ItemState, reason: &str) -> UploadError {
        UploadError::InvalidStateTransition {
            from: self.state.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::JobState;

    fn item() -> SourceItem {
        SourceItem::new(
            0,
            "Clipboard-20240316-1230450123-img-0",
            vec!["public.png".to_string()],
        )
    }

    fn record(identifier: &str, digest: &str) -> JobRecord {
        JobRecord {
            job_id: "1".to_string(),
            source_identifier: identifier.to_string(),
            content_digest: digest.to_string(),
            state: JobState::Waiting,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut item = item();
        assert_eq!(item.state(), ItemState::New);
        assert!(item.digest().is_empty());

        item.append_extension("png").unwrap();
        item.mark_staged("D1").unwrap();
        assert_eq!(item.state(), ItemState::Staged);
        assert_eq!(item.identifier(), "Clipboard-20240316-1230450123-img-0.png");

        item.mark_ready(Thumbnail::Placeholder).unwrap();
        assert_eq!(item.state(), ItemState::Ready);
        assert!(item.state().has_digest());
        assert_eq!(item.digest(), "D1");
    }

    #[test]
    fn test_extension_appended_once() {
        let mut item = item();
        item.append_extension("png").unwrap();
        assert!(item.append_extension("jpg").is_err());
        assert!(item.identifier().ends_with("img-0.png"));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut item = item();
        assert!(item.mark_ready(Thumbnail::Placeholder).is_err());
        assert!(item.mark_staged("D1").is_err(), "no extension yet");

        item.append_extension("png").unwrap();
        assert!(item.mark_staged("").is_err());

        item.mark_failed().unwrap();
        assert_eq!(item.state(), ItemState::Failed);
        assert!(item.mark_staged("D1").is_err());
        assert!(item.mark_failed().is_err());
        assert!(item.digest().is_empty());
    }

    #[test]
    fn test_join_key_switches_to_digest() {
        let mut item = item();
        let key = item.join_key();
        assert_eq!(
            key,
            JoinKey::Identifier("Clipboard-20240316-1230450123-img-0".to_string())
        );
        assert!(key.matches(&record("Clipboard-20240316-1230450123-img-0.png", "")));
        assert!(!key.matches(&record("Clipboard-20240316-1230450123-img-01.png", "")));
        assert!(!key.matches(&record("Clipboard-20240316-1230450123-img-0.png", "D1")));

        item.append_extension("png").unwrap();
        item.mark_staged("D1").unwrap();
        let key = item.join_key();
        assert_eq!(key, JoinKey::Digest("D1".to_string()));
        assert!(key.matches(&record("Elsewhere-1.png", "D1")));
        assert!(!key.matches(&record("Clipboard-20240316-1230450123-img-0.png", "")));
    }

    #[test]
    fn test_kind_classified_from_encodings() {
        let movie = SourceItem::new(
            1,
            "Clipboard-20240316-1230450123-mov-1",
            vec!["public.jpeg".to_string(), "public.mpeg-4".to_string()],
        );
        assert_eq!(movie.kind(), MediaKind::Movie);
    }
}
