//! # Encodings and Staged Names
//!
//! Maps the type identifiers offered by a media source to file extensions and
//! builds the deterministic identifier under which an item is staged.
//!
//! ## Identifier grammar
//!
//! ```text
//! {source-tag}-{yyyyMMdd}-{HHmmssSSSS}-{img|mov}-{position}[.{ext}]
//! ```
//!
//! `SSSS` is the sub-second part in units of 100µs. The extension is appended
//! once the encoding is chosen, after which the identifier doubles as the
//! staged file name.

use chrono::{DateTime, Utc};
use std::fmt;

// ============================================================================
// Encodings
// ============================================================================

/// Whether an item is a still image or a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Movie,
}

impl MediaKind {
    /// Type tag used inside identifiers
    pub fn tag(&self) -> &'static str {
        match self {
            MediaKind::Image => "img",
            MediaKind::Movie => "mov",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "img" => Some(MediaKind::Image),
            "mov" => Some(MediaKind::Movie),
            _ => None,
        }
    }

    /// Encodings for this kind, highest priority first
    pub fn encodings(&self) -> &'static [Encoding] {
        match self {
            MediaKind::Image => IMAGE_ENCODINGS,
            MediaKind::Movie => MOVIE_ENCODINGS,
        }
    }

    /// Classify an item by what it offers. Any movie encoding makes it a
    /// movie, since sources commonly pair a movie with a still derivative.
    pub fn classify<S: AsRef<str>>(offered: &[S]) -> Self {
        let is_movie = offered
            .iter()
            .any(|o| MOVIE_ENCODINGS.iter().any(|e| e.type_identifier == o.as_ref()));
        if is_movie {
            MediaKind::Movie
        } else {
            MediaKind::Image
        }
    }
}

/// A type identifier and the extension its bytes are staged under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding {
    pub type_identifier: &'static str,
    pub extension: &'static str,
}

const fn encoding(type_identifier: &'static str, extension: &'static str) -> Encoding {
    Encoding {
        type_identifier,
        extension,
    }
}

pub const MOVIE_ENCODINGS: &[Encoding] = &[
    encoding("com.apple.quicktime-movie", "mov"),
    encoding("public.mpeg", "mpeg"),
    encoding("public.mpeg-2-video", "mpeg2"),
    encoding("public.mpeg-4", "mp4"),
    encoding("public.avi", "avi"),
];

pub const IMAGE_ENCODINGS: &[Encoding] = &[
    encoding("public.png", "png"),
    encoding("public.heic", "heic"),
    encoding("public.heif", "heif"),
    encoding("public.tiff", "tiff"),
    encoding("public.jpeg", "jpg"),
    encoding("public.camera-raw-image", "raw"),
    encoding("com.google.webp", "webp"),
    encoding("com.compuserve.gif", "gif"),
    encoding("com.microsoft.bmp", "bmp"),
    encoding("com.microsoft.ico", "ico"),
];

/// Encodings of `kind` that `offered` contains, in priority order
pub fn candidates<S: AsRef<str>>(kind: MediaKind, offered: &[S]) -> Vec<Encoding> {
    kind.encodings()
        .iter()
        .filter(|e| offered.iter().any(|o| o.as_ref() == e.type_identifier))
        .copied()
        .collect()
}

// ============================================================================
// Staged Names
// ============================================================================

/// Build the identifier of the item at `position`, discovered at `at`
pub fn identifier_for(
    source_tag: &str,
    at: DateTime<Utc>,
    kind: MediaKind,
    position: usize,
) -> String {
    format!(
        "{}-{}{:04}-{}-{}",
        source_tag,
        at.format("%Y%m%d-%H%M%S"),
        at.timestamp_subsec_micros() / 100,
        kind.tag(),
        position
    )
}

/// Parsed form of a staged identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedName {
    pub source_tag: String,
    /// `yyyyMMdd`
    pub date: String,
    /// `HHmmssSSSS`
    pub time: String,
    pub kind: MediaKind,
    pub position: usize,
    pub extension: Option<String>,
}

impl StagedName {
    /// Parse an identifier, with or without its extension.
    pub fn parse(identifier: &str) -> Option<Self> {
        let (stem, extension) = match identifier.rsplit_once('.') {
            Some((stem, ext)) if !ext.is_empty() => (stem, Some(ext.to_string())),
            _ => (identifier, None),
        };

        let mut parts = stem.split('-');
        let source_tag = parts.next()?;
        let date = parts.next()?;
        let time = parts.next()?;
        let kind = MediaKind::from_tag(parts.next()?)?;
        let position = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }

        let all_digits = |s: &str, len: usize| s.len() == len && s.bytes().all(|b| b.is_ascii_digit());
        if source_tag.is_empty() || !all_digits(date, 8) || !all_digits(time, 10) {
            return None;
        }

        Some(Self {
            source_tag: source_tag.to_string(),
            date: date.to_string(),
            time: time.to_string(),
            kind,
            position,
            extension,
        })
    }

    /// File name presented to the server: the capture date and time to the
    /// second, with the lowercased extension.
    pub fn upload_file_name(&self) -> String {
        let base = format!("{}-{}", self.date, &self.time[..6]);
        match &self.extension {
            Some(ext) => format!("{}.{}", base, ext.to_lowercase()),
            None => base,
        }
    }
}

impl fmt::Display for StagedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.source_tag,
            self.date,
            self.time,
            self.kind.tag(),
            self.position
        )?;
        if let Some(ext) = &self.extension {
            write!(f, ".{}", ext)?;
        }
        Ok(())
    }
}

/// Server-side file name for `identifier`; identifiers that do not follow
/// the staged grammar are used as they are.
pub fn upload_file_name(identifier: &str) -> String {
    StagedName::parse(identifier)
        .map(|name| name.upload_file_name())
        .unwrap_or_else(|| identifier.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn capture_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 16, 12, 30, 45).unwrap()
            + chrono::Duration::microseconds(12_345)
    }

    #[test]
    fn test_classify_prefers_movie() {
        assert_eq!(
            MediaKind::classify(&["public.jpeg", "com.apple.quicktime-movie"]),
            MediaKind::Movie
        );
        assert_eq!(MediaKind::classify(&["public.png"]), MediaKind::Image);
        assert_eq!(MediaKind::classify::<&str>(&[]), MediaKind::Image);
    }

    #[test]
    fn test_candidates_follow_priority_order() {
        let offered = ["public.jpeg", "com.google.webp", "public.png"];
        let found = candidates(MediaKind::Image, &offered);
        let extensions: Vec<_> = found.iter().map(|e| e.extension).collect();
        assert_eq!(extensions, vec!["png", "jpg", "webp"]);

        let found = candidates(MediaKind::Movie, &["public.mpeg-4", "public.mpeg"]);
        assert_eq!(found[0].extension, "mpeg");
        assert_eq!(found[1].extension, "mp4");
    }

    #[test]
    fn test_identifier_format() {
        let id = identifier_for("Clipboard", capture_time(), MediaKind::Image, 0);
        assert_eq!(id, "Clipboard-20240316-1230450123-img-0");

        let id = identifier_for("Clipboard", capture_time(), MediaKind::Movie, 12);
        assert_eq!(id, "Clipboard-20240316-1230450123-mov-12");
    }

    #[test]
    fn test_parse_and_display() {
        let name = StagedName::parse("Clipboard-20240316-1230450123-img-0.png").unwrap();
        assert_eq!(name.source_tag, "Clipboard");
        assert_eq!(name.date, "20240316");
        assert_eq!(name.time, "1230450123");
        assert_eq!(name.kind, MediaKind::Image);
        assert_eq!(name.position, 0);
        assert_eq!(name.extension.as_deref(), Some("png"));
        assert_eq!(name.to_string(), "Clipboard-20240316-1230450123-img-0.png");

        let bare = StagedName::parse("Clipboard-20240316-1230450123-mov-3").unwrap();
        assert_eq!(bare.extension, None);
        assert_eq!(bare.position, 3);
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(StagedName::parse("photo.png").is_none());
        assert!(StagedName::parse("Clip-board-20240316-1230450123-img-0.png").is_none());
        assert!(StagedName::parse("Clipboard-2024031-1230450123-img-0.png").is_none());
        assert!(StagedName::parse("Clipboard-20240316-1230450123-gif-0.png").is_none());
        assert!(StagedName::parse("Clipboard-20240316-1230450123-img-x.png").is_none());
    }

    #[test]
    fn test_upload_file_name() {
        assert_eq!(
            upload_file_name("Clipboard-20240316-1230450123-img-0.PNG"),
            "20240316-123045.png"
        );
        assert_eq!(
            upload_file_name("Clipboard-20240316-1230450123-mov-4.mov"),
            "20240316-123045.mov"
        );
        assert_eq!(upload_file_name("holiday.jpg"), "holiday.jpg");
    }
}
