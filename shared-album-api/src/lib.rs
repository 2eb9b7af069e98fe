//! Wire types shared between the album proxy server and the site frontend.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/photo-album`.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct AlbumRequest {
    #[serde(rename = "albumUrl")]
    pub album_url: Option<String>,
}

/// One resolved media asset. `thumbnail` is only ever set on videos.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct MediaItem {
    pub url: String,
    #[serde(rename = "isVideo")]
    pub is_video: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug, Default)]
pub struct AlbumResponse {
    pub photos: Vec<MediaItem>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// Liveness probe payload for `GET /api/photo-album`.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct ProbeResponse {
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct StatusResponse {
    pub server_version: String,
    pub server_startup_timestamp: i64,
    pub cached_albums: usize,
}
