//! # Media Module
//!
//! Domain types shared by every part of the delivery cache, plus the
//! [`AssetResolver`] that maps a logical asset key to a concrete source.
//!
//! - [`AssetKey`]: logical media slot (`"inicial"`, `"downsell:3"`)
//! - [`MediaKind`]: closed set of media kinds, in delivery priority order
//! - [`SourceLocation`]: local file or remote URL to upload from
//! - [`UploadedIdentifier`]: opaque token issued by the transport

pub mod resolver;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
};
use url::Url;

use crate::error::InvalidAssetKey;

pub use resolver::{AssetOverride, AssetResolver, LocalFs, MediaFs, TenantMediaConfig};

static ASSET_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z][a-z0-9_-]*)(?::(\d+))?$").expect("asset key regex is valid")
});

/// Logical media slot, unique within a tenant.
///
/// Made of a category (`inicial`, `downsell`, ...) and an optional numeric
/// sub-id, written `category:sub_id`. Keys are normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetKey {
    raw: String,
    category_len: usize,
    sub_id: Option<u32>,
}

impl AssetKey {
    pub fn new(category: &str, sub_id: Option<u32>) -> Result<Self, InvalidAssetKey> {
        match sub_id {
            Some(id) => Self::parse(&format!("{}:{}", category, id)),
            None => Self::parse(category),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidAssetKey> {
        let normalized = raw.trim().to_lowercase();
        let caps = ASSET_KEY_RE
            .captures(&normalized)
            .ok_or_else(|| InvalidAssetKey(raw.to_string()))?;

        let category_len = caps.get(1).map_or(0, |m| m.len());
        let sub_id = match caps.get(2) {
            Some(m) => Some(
                m.as_str()
                    .parse()
                    .map_err(|_| InvalidAssetKey(raw.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            raw: normalized,
            category_len,
            sub_id,
        })
    }

    /// Parses a comma separated list, ignoring blanks.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, InvalidAssetKey> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn category(&self) -> &str {
        &self.raw[..self.category_len]
    }

    pub fn sub_id(&self) -> Option<u32> {
        self.sub_id
    }

    /// File name stem used by the conventional media directory layout.
    pub fn file_stem(&self) -> String {
        match self.sub_id {
            Some(id) => format!("{}_{}", self.category(), id),
            None => self.category().to_string(),
        }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for AssetKey {
    type Err = InvalidAssetKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetKey {
    type Error = InvalidAssetKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AssetKey> for String {
    fn from(key: AssetKey) -> Self {
        key.raw
    }
}

/// Kind of media, listed in delivery priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    /// Video > Image > Audio
    pub const PRIORITY: [MediaKind; 3] = [MediaKind::Video, MediaKind::Image, MediaKind::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Video => &["mp4", "mov", "webm", "mkv"],
            MediaKind::Image => &["jpg", "jpeg", "png", "webp"],
            MediaKind::Audio => &["mp3", "ogg", "m4a", "wav", "opus"],
        }
    }

    /// Per-kind subdirectory of the media directory (`videos/`, ...).
    pub fn dir_name(&self) -> &'static str {
        match self {
            MediaKind::Video => "videos",
            MediaKind::Image => "images",
            MediaKind::Audio => "audios",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of an asset come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Remote(Url),
    Local(PathBuf),
}

impl SourceLocation {
    /// Interprets `raw` as a URL when it has an http(s) scheme, otherwise as a
    /// path relative to `base_dir`.
    pub fn parse(raw: &str, base_dir: &Path) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            if let Ok(url) = Url::parse(trimmed) {
                return SourceLocation::Remote(url);
            }
        }

        let path = PathBuf::from(trimmed);
        if path.is_absolute() {
            SourceLocation::Local(path)
        } else {
            SourceLocation::Local(base_dir.join(path))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocation::Remote(_))
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Remote(url) => write!(f, "{}", url),
            SourceLocation::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Output of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub kind: MediaKind,
    pub source: SourceLocation,
}

/// Opaque token issued by the transport after an upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadedIdentifier(String);

impl UploadedIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UploadedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UploadedIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UploadedIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}
