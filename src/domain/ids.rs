use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a track comes from; decides which downloader handles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    YouTube,
    /// A plain `http(s)` URL pointing at an audio file.
    Direct,
}

impl SourceKind {
    fn prefix(self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Direct => "direct",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "youtube" => Some(SourceKind::YouTube),
            "direct" => Some(SourceKind::Direct),
            _ => None,
        }
    }
}

/// Stable track identifier, the cache key.
///
/// Two source URLs that resolve to the same `TrackId` are the same cached
/// resource. The key is restricted to `[A-Za-z0-9_-]` so it can be used as a
/// file name verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId {
    source: SourceKind,
    key: String,
}

impl TrackId {
    pub fn youtube(video_id: impl Into<String>) -> Self {
        Self {
            source: SourceKind::YouTube,
            key: video_id.into(),
        }
    }

    /// Direct URLs are keyed by the MD5 of their normalised form.
    pub fn direct(normalized_url: &str) -> Self {
        let digest = Md5::digest(normalized_url.as_bytes());
        Self {
            source: SourceKind::Direct,
            key: hex::encode(digest),
        }
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// File stem used for every file belonging to this track.
    pub fn file_stem(&self) -> String {
        format!("{}-{}", self.source.prefix(), self.key)
    }

    /// Inverse of [`TrackId::file_stem`], used when rescanning the cache directory.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (prefix, key) = stem.split_once('-')?;
        let source = SourceKind::from_prefix(prefix)?;
        if key.is_empty() || !key.bytes().all(is_key_byte) {
            return None;
        }
        Some(Self {
            source,
            key: key.to_owned(),
        })
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source.prefix(), self.key)
    }
}

pub(crate) fn is_key_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

/// Isolated playback context ("guild").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Voice destination inside a tenant, opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceTarget(pub String);

impl fmt::Display for VoiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoiceTarget {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
