//! Media format allow-list.
//!
//! Every output format a job may request is a variant of [`OutputFormat`];
//! anything else is rejected at submission with
//! [`Error::UnsupportedFormat`](crate::Error::UnsupportedFormat).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Opaque per-job conversion options, interpreted only by the transcoder.
pub type ConversionOptions = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Broad classification of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Detect the kind of a file from the extension of its name or key.
    ///
    /// Returns `None` for unknown or missing extensions.
    pub fn detect(name: &str) -> Option<Self> {
        let ext = extension_of(name)?;
        OutputFormat::from_str(&ext).ok().map(|f| f.kind())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// Output formats a conversion job may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    // audio
    Mp3,
    Flac,
    Wav,
    Aac,
    Ogg,
    M4a,
    // video
    Mp4,
    Avi,
    Mkv,
    Webm,
    Mov,
    Flv,
}

impl OutputFormat {
    /// The full allow-list, audio formats first.
    pub const ALL: [OutputFormat; 12] = [
        Self::Mp3,
        Self::Flac,
        Self::Wav,
        Self::Aac,
        Self::Ogg,
        Self::M4a,
        Self::Mp4,
        Self::Avi,
        Self::Mkv,
        Self::Webm,
        Self::Mov,
        Self::Flv,
    ];

    pub fn kind(self) -> MediaKind {
        match self {
            Self::Mp3 | Self::Flac | Self::Wav | Self::Aac | Self::Ogg | Self::M4a => {
                MediaKind::Audio
            }
            Self::Mp4 | Self::Avi | Self::Mkv | Self::Webm | Self::Mov | Self::Flv => {
                MediaKind::Video
            }
        }
    }

    /// File extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
            Self::Wav => "wav",
            Self::Aac => "aac",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
            Self::Mp4 => "mp4",
            Self::Avi => "avi",
            Self::Mkv => "mkv",
            Self::Webm => "webm",
            Self::Mov => "mov",
            Self::Flv => "flv",
        }
    }

    /// MIME type recorded on the uploaded output blob.
    pub fn content_type(self) -> String {
        format!("{}/{}", self.kind(), self.extension())
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.extension() == lower)
            .ok_or_else(|| Error::UnsupportedFormat(s.to_string()))
    }
}

/// Lowercased extension of a file name or blob key, if any.
pub fn extension_of(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
