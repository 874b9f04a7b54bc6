//! Owner-scoped blob keys.

use std::fmt;

use mf_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A blob address: an owner namespace plus a relative path inside it.
///
/// Both parts are validated on construction so a key can never escape its
/// namespace (`..`, absolute paths, empty segments) or collide with store
/// internals (segments starting with `.` are reserved).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey {
    owner: String,
    path: String,
}

fn check_segment(what: &str, seg: &str) -> Result<()> {
    if seg.is_empty() {
        return Err(Error::Validation(format!("{what} has an empty segment")));
    }
    if seg.starts_with('.') {
        return Err(Error::Validation(format!(
            "{what} segment '{seg}' must not start with '.'"
        )));
    }
    if seg.contains('\\') || seg.contains('\0') {
        return Err(Error::Validation(format!(
            "{what} segment '{seg}' contains a forbidden character"
        )));
    }
    Ok(())
}

impl BlobKey {
    pub fn new(owner: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let path = path.into();

        if owner.contains('/') {
            return Err(Error::Validation(format!("owner '{owner}' must not contain '/'")));
        }
        check_segment("owner", &owner)?;
        if path.is_empty() {
            return Err(Error::Validation("blob path is empty".into()));
        }
        for seg in path.split('/') {
            check_segment("blob path", seg)?;
        }

        Ok(Self { owner, path })
    }

    /// Parse `owner/path`.
    pub fn parse(full: &str) -> Result<Self> {
        let (owner, path) = full
            .split_once('/')
            .ok_or_else(|| Error::Validation(format!("blob key '{full}' has no owner prefix")))?;
        Self::new(owner, path)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }

    /// Lowercased final extension, if any.
    pub fn extension(&self) -> Option<String> {
        mf_core::formats::extension_of(self.file_name())
    }

    /// Another key in the same owner namespace.
    pub fn sibling(&self, path: impl Into<String>) -> Result<Self> {
        Self::new(self.owner.clone(), path)
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let key = BlobKey::parse("alice/music/track.WAV").unwrap();
        assert_eq!(key.owner(), "alice");
        assert_eq!(key.path(), "music/track.WAV");
        assert_eq!(key.file_name(), "track.WAV");
        assert_eq!(key.stem(), "track");
        assert_eq!(key.extension().as_deref(), Some("wav"));
        assert_eq!(key.to_string(), "alice/music/track.WAV");
    }

    #[test]
    fn rejects_escapes() {
        for bad in [
            "alice/../bob/x.mp3",
            "alice//x.mp3",
            "alice/./x.mp3",
            "alice/",
            "noowner",
            "/abs/x.mp3",
            "alice/dir\\x.mp3",
            "alice/.hidden",
        ] {
            assert!(BlobKey::parse(bad).is_err(), "{bad} should be rejected");
        }
        assert!(BlobKey::new("a/b", "x").is_err());
    }

    #[test]
    fn stem_without_extension() {
        let key = BlobKey::new("alice", "raw/noext").unwrap();
        assert_eq!(key.stem(), "noext");
        assert_eq!(key.extension(), None);
    }

    #[test]
    fn sibling_stays_in_namespace() {
        let key = BlobKey::new("alice", "in/a.wav").unwrap();
        let out = key.sibling("outputs/1/a_converted.mp3").unwrap();
        assert_eq!(out.owner(), "alice");
        assert!(key.sibling("../bob/x").is_err());
    }
}
