use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::ImageType;

/// Metadata kept for every persisted image.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub laptop_id: String,
    pub image_type: ImageType,
    pub path: PathBuf,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persists `data` for `laptop_id` and returns the generated image id.
    async fn save(&self, laptop_id: &str, image_type: ImageType, data: &[u8]) -> Result<String, StoreError>;

    async fn find(&self, image_id: &str) -> Option<StoredImage>;

    async fn count(&self) -> usize;
}

/// Writes images under one folder as `<laptop_id>.<ext>`.
#[derive(Debug)]
pub struct DiskImageStore {
    image_folder: PathBuf,
    images: RwLock<HashMap<String, StoredImage>>,
}

impl DiskImageStore {
    pub fn new(image_folder: impl Into<PathBuf>) -> Self {
        Self {
            image_folder: image_folder.into(),
            images: RwLock::new(HashMap::new()),
        }
    }

    pub fn image_folder(&self) -> &Path {
        &self.image_folder
    }

    fn image_path(&self, laptop_id: &str, image_type: ImageType) -> PathBuf {
        self.image_folder.join(format!("{}.{}", laptop_id, image_type.extension()))
    }
}

/// Writes through a sibling temp file so a failed write never leaves a
/// truncated image at `path`.
async fn write_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, path).await
    }
    .await;

    if result.is_err() {
        if let Err(e) = fs::remove_file(&tmp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove temp image {}: {}", tmp_path.display(), e);
            }
        }
    }
    result
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn save(&self, laptop_id: &str, image_type: ImageType, data: &[u8]) -> Result<String, StoreError> {
        let image_id = Uuid::new_v4().to_string();
        let path = self.image_path(laptop_id, image_type);

        fs::create_dir_all(&self.image_folder).await?;
        write_atomically(&path, data).await?;

        let mut images = self.images.write().await;
        images.insert(
            image_id.clone(),
            StoredImage {
                laptop_id: laptop_id.to_string(),
                image_type,
                path: path.clone(),
            },
        );

        info!(image_id = %image_id, path = %path.display(), bytes = data.len(), "saved image");
        Ok(image_id)
    }

    async fn find(&self, image_id: &str) -> Option<StoredImage> {
        self.images.read().await.get(image_id).cloned()
    }

    async fn count(&self) -> usize {
        self.images.read().await.len()
    }
}
