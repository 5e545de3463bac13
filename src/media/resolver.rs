use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::debug;

use super::{AssetKey, MediaKind, ResolvedAsset, SourceLocation};
use crate::error::ResolveError;

/// Filesystem collaborator used by the resolver
pub trait MediaFs: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// Disco local real
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl MediaFs for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Ubicaciones explícitas por tipo de media para una asset key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
}

impl AssetOverride {
    pub fn location(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.video.as_deref(),
            MediaKind::Image => self.image.as_deref(),
            MediaKind::Audio => self.audio.as_deref(),
        }
        .filter(|s| !s.trim().is_empty())
    }
}

/// Configuración de media de un tenant, persistida en JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantMediaConfig {
    pub tenant_id: String,
    #[serde(default)]
    pub assets: BTreeMap<AssetKey, AssetOverride>,
}

/// Maps an [`AssetKey`] to the media that should be uploaded for it.
///
/// Tenant overrides are checked first, in kind priority order. When none of
/// them points at an existing source, the media directory is scanned for
/// `<stem>.<ext>` and `<kind dir>/<stem>.<ext>`, again by priority
/// (Video > Image > Audio). URLs are never probed.
pub struct AssetResolver {
    media_dir: PathBuf,
    overrides: TenantMediaConfig,
    fs: Arc<dyn MediaFs>,
}

impl AssetResolver {
    pub fn new(media_dir: impl Into<PathBuf>, overrides: TenantMediaConfig) -> Self {
        Self::with_fs(media_dir, overrides, Arc::new(LocalFs))
    }

    pub fn with_fs(
        media_dir: impl Into<PathBuf>,
        overrides: TenantMediaConfig,
        fs: Arc<dyn MediaFs>,
    ) -> Self {
        Self {
            media_dir: media_dir.into(),
            overrides,
            fs,
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.overrides.tenant_id
    }

    pub fn resolve(&self, key: &AssetKey) -> Result<ResolvedAsset, ResolveError> {
        if let Some(found) = self.resolve_override(key) {
            return Ok(found);
        }

        if let Some(found) = self.scan_media_dir(key) {
            return Ok(found);
        }

        debug!("🔍 Sin media para '{}' en {}", key, self.media_dir.display());
        Err(ResolveError::NotFound(key.clone()))
    }

    fn resolve_override(&self, key: &AssetKey) -> Option<ResolvedAsset> {
        let entry = self.overrides.assets.get(key)?;

        MediaKind::PRIORITY.iter().find_map(|&kind| {
            let raw = entry.location(kind)?;
            let source = SourceLocation::parse(raw, &self.media_dir);
            if self.source_exists(&source) {
                debug!("🎯 Override de tenant para '{}': {} ({})", key, source, kind);
                Some(ResolvedAsset { kind, source })
            } else {
                debug!("⚠️ Override para '{}' apunta a un archivo inexistente: {}", key, source);
                None
            }
        })
    }

    fn scan_media_dir(&self, key: &AssetKey) -> Option<ResolvedAsset> {
        let stem = key.file_stem();
        let stem = stem.as_str();

        MediaKind::PRIORITY.iter().find_map(|&kind| {
            let dirs = [self.media_dir.clone(), self.media_dir.join(kind.dir_name())];
            dirs.iter()
                .flat_map(|dir| {
                    kind.extensions()
                        .iter()
                        .map(move |ext| dir.join(format!("{}.{}", stem, ext)))
                })
                .find(|path| self.fs.exists(path))
                .map(|path| ResolvedAsset {
                    kind,
                    source: SourceLocation::Local(path),
                })
        })
    }

    fn source_exists(&self, source: &SourceLocation) -> bool {
        match source {
            SourceLocation::Remote(_) => true,
            SourceLocation::Local(path) => self.fs.exists(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn key(raw: &str) -> AssetKey {
        AssetKey::parse(raw).unwrap()
    }

    fn touch(dir: &Path, rel: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, b"media").unwrap();
        path
    }

    #[test]
    fn test_scan_prefers_video_over_image_and_audio() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "inicial.mp3");
        touch(dir.path(), "inicial.jpg");
        let video = touch(dir.path(), "videos/inicial.mp4");

        let resolver = AssetResolver::new(dir.path(), TenantMediaConfig::default());
        let resolved = resolver.resolve(&key("inicial")).unwrap();

        assert_eq!(
            resolved,
            ResolvedAsset {
                kind: MediaKind::Video,
                source: SourceLocation::Local(video),
            }
        );
    }

    #[test]
    fn test_scan_uses_sub_id_stem() {
        let dir = TempDir::new().unwrap();
        let audio = touch(dir.path(), "audios/downsell_3.ogg");
        touch(dir.path(), "downsell_2.mp4");

        let resolver = AssetResolver::new(dir.path(), TenantMediaConfig::default());
        let resolved = resolver.resolve(&key("downsell:3")).unwrap();

        assert_eq!(resolved.kind, MediaKind::Audio);
        assert_eq!(resolved.source, SourceLocation::Local(audio));
    }

    #[test]
    fn test_missing_asset_is_not_found() {
        let dir = TempDir::new().unwrap();
        let resolver = AssetResolver::new(dir.path(), TenantMediaConfig::default());

        let err = resolver.resolve(&key("downsell:1")).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(k) if k == key("downsell:1")));
    }

    #[test]
    fn test_tenant_override_wins_over_scan() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "inicial.mp4");
        let custom = touch(dir.path(), "custom/boas_vindas.png");

        let mut config = TenantMediaConfig {
            tenant_id: "loja".into(),
            ..Default::default()
        };
        config.assets.insert(
            key("inicial"),
            AssetOverride {
                image: Some("custom/boas_vindas.png".into()),
                ..Default::default()
            },
        );

        let resolver = AssetResolver::new(dir.path(), config);
        let resolved = resolver.resolve(&key("inicial")).unwrap();

        assert_eq!(resolved.kind, MediaKind::Image);
        assert_eq!(resolved.source, SourceLocation::Local(custom));
    }

    #[test]
    fn test_override_url_is_never_probed() {
        struct NothingExists;
        impl MediaFs for NothingExists {
            fn exists(&self, _path: &Path) -> bool {
                false
            }
        }

        let mut config = TenantMediaConfig::default();
        config.assets.insert(
            key("downsell:2"),
            AssetOverride {
                audio: Some("https://cdn.example.com/d2.mp3".into()),
                ..Default::default()
            },
        );

        let resolver = AssetResolver::with_fs("/nowhere", config, Arc::new(NothingExists));
        let resolved = resolver.resolve(&key("downsell:2")).unwrap();

        assert_eq!(resolved.kind, MediaKind::Audio);
        assert!(resolved.source.is_remote());
    }

    #[test]
    fn test_broken_override_falls_back_to_scan() {
        let dir = TempDir::new().unwrap();
        let image = touch(dir.path(), "images/inicial.webp");

        let mut config = TenantMediaConfig::default();
        config.assets.insert(
            key("inicial"),
            AssetOverride {
                video: Some("gone.mp4".into()),
                ..Default::default()
            },
        );

        let resolver = AssetResolver::new(dir.path(), config);
        let resolved = resolver.resolve(&key("inicial")).unwrap();

        assert_eq!(resolved.kind, MediaKind::Image);
        assert_eq!(resolved.source, SourceLocation::Local(image));
    }
}
