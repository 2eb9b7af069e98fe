use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub static_content_path: PathBuf,
    pub listen: ListenConfig,
    /// Base URL of the iCloud shared-streams service.
    pub upstream_base: String,
    /// Album used when no identifier can be extracted from the request.
    pub default_album_id: String,
    pub reqwest_timeout_secs: f64,
    pub cache: CacheConfig,
    /// Ranking of non-numeric derivative keys, best first. Numeric keys
    /// (pixel widths) always outrank these.
    pub derivative_preference: Vec<String>,
    #[serde(skip)]
    pub startup_timestamp: DateTime<Utc>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            static_content_path: PathBuf::from("./static"),
            listen: ListenConfig::default(),
            upstream_base: "https://p107-sharedstreams.icloud.com".to_owned(),
            default_album_id: "B2EJtdOXm2MG2Rb".to_owned(),
            reqwest_timeout_secs: 10.,
            cache: CacheConfig::default(),
            derivative_preference: vec!["PosterFrame".to_owned(), "720p".to_owned()],
            startup_timestamp: Utc::now(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            max_entries: 100,
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct ListenConfig {
    pub tcp: Option<(String, u16)>,
    pub unix: Option<String>,
    pub unix_mode: Option<u32>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            tcp: Some(("0.0.0.0".to_owned(), 9292)),
            unix: None,
            unix_mode: None,
        }
    }
}
