//! Error taxonomy for the delivery cache.
//!
//! None of these errors ever reach the foreground request path: a lookup miss
//! is a normal `None`, and every background failure is folded into the
//! warm-up or sweep report.

use std::time::Duration;
use thiserror::Error;

use crate::media::{AssetKey, MediaKind};

/// Rejected asset key text (config lists, tenant files).
#[derive(Debug, Error)]
#[error("invalid asset key '{0}': expected <category> or <category>:<number>")]
pub struct InvalidAssetKey(pub String);

/// The asset could not be mapped to an existing source.
///
/// Non-retryable until tenant configuration or files on disk change.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no media found for asset '{0}'")]
    NotFound(AssetKey),
}

/// A single upload to the remote transport failed.
///
/// Always treated as transient: the warm-up logs it and moves on.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("failed to read media source: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transport rejected upload (status {status}): {description}")]
    Api { status: u16, description: String },

    #[error("upload response carried no {0} identifier")]
    MissingIdentifier(MediaKind),

    #[error("upload timed out after {0:?}")]
    Timeout(Duration),
}

/// A probe of a single identifier failed.
///
/// `Rejected` and `Timeout` count as a negative probe and the identifier is
/// pruned. `Unavailable` means the probing transport itself is down and aborts
/// the whole sweep cycle.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("identifier rejected: {0}")]
    Rejected(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe transport unavailable: {0}")]
    Unavailable(String),
}

impl ProbeError {
    /// True when the failure says nothing about the identifier itself.
    pub fn is_outage(&self) -> bool {
        matches!(self, ProbeError::Unavailable(_))
    }
}
