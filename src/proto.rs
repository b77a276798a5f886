//! Request and response messages of the catalog RPCs.

use serde::{Deserialize, Serialize};

use crate::model::{Filter, ImageType, Laptop};

/// Envelope for the first frame of every call.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Call<T> {
    /// Deadline relative to receipt, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub request: T,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateLaptopRequest {
    pub laptop: Laptop,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreateLaptopResponse {
    pub id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SearchLaptopRequest {
    #[serde(default)]
    pub filter: Filter,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchLaptopResponse {
    pub laptop: Laptop,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub laptop_id: String,
    #[serde(default)]
    pub image_type: ImageType,
}

/// One message of an upload stream: metadata first, then chunks.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadImageRequest {
    Info(ImageInfo),
    ChunkData(Vec<u8>),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UploadImageResponse {
    pub id: String,
    pub size: u32,
}
