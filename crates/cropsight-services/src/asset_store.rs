//! Content-addressed storage for uploaded source images.
//!
//! Blobs live at `{root}/{hash[0..2]}/{hash}.{ext}` where `hash` is the
//! blake3 of the bytes. The same image uploaded twice is stored once.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cropsight_core::{media, ImageAsset};

use crate::error::StoreError;

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<ImageAsset, StoreError>;
}

#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    root: PathBuf,
    base_url: String,
}

impl LocalAssetStore {
    /// `base_url` is where `root` is served from, e.g. `http://host:9100/assets`.
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn relative_path(hash: &str, ext: &str) -> String {
        format!("{}/{}.{}", &hash[..2], hash, ext)
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<ImageAsset, StoreError> {
        let hash = hex::encode(blake3::hash(bytes).as_bytes());
        let ext = media::extension_for(mime_type).unwrap_or("bin");
        let relative = Self::relative_path(&hash, ext);
        let path = self.root.join(&relative);

        if !tokio::fs::try_exists(&path).await? {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            // Unique temp name so concurrent uploads of the same image don't collide.
            let tmp = path.with_extension(format!("{ext}.tmp-{}", uuid::Uuid::new_v4().simple()));
            tokio::fs::write(&tmp, bytes).await?;
            if let Err(e) = tokio::fs::rename(&tmp, &path).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(e.into());
            }
        }

        Ok(ImageAsset {
            url: format!("{}/{}", self.base_url, relative),
            id: hash,
        })
    }
}
