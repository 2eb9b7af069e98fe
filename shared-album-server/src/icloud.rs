use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::LazyLock;

use actix_web::http::StatusCode;
use anyhow::anyhow;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::{Client, Url};
use shared_album_api::{AlbumResponse, MediaItem};

use crate::errors::Error;
use crate::state::AppConfig;

/// Derivative key iCloud uses for the still frame of a video asset.
pub const POSTER_FRAME_KEY: &str = "PosterFrame";

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mov", ".avi", ".mkv", ".webm", ".m4v"];

// Share links look like icloud.com/sharedalbum/#ID; older ones carry the ID
// as the last path segment instead.
static FRAGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#([^?/]+)").expect("Should be able to parse the fragment regex")
});
static LAST_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/([^/]+)/?$").expect("Should be able to parse the last segment regex")
});

/// Pulls the album identifier out of a share URL. Extracted substrings are
/// untrusted and used verbatim in outbound request paths.
pub fn extract_album_id(album_url: Option<&str>, default_id: &str) -> String {
    let Some(url) = album_url.filter(|u| !u.is_empty()) else {
        return default_id.to_owned();
    };
    if let Some(captures) = FRAGMENT_REGEX.captures(url) {
        return captures[1].to_owned();
    }
    if let Some(captures) = LAST_SEGMENT_REGEX.captures(url) {
        return captures[1].to_owned();
    }
    default_id.to_owned()
}

/// The derivative picked for one asset: its quality key and the checksum
/// that resolves to a download URL.
#[derive(Debug, PartialEq, Eq)]
pub struct DerivativeChoice<'a> {
    pub key: &'a str,
    pub checksum: &'a str,
}

/// Keys that parse as integers are pixel widths; bigger wins, and any width
/// beats a named derivative. Named ones rank by their position in the
/// configured preference list, unknown names come last, and every remaining
/// tie is broken alphabetically.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    Numeric(Reverse<u64>),
    Preferred(usize),
    Other,
}

fn rank_key(key: &str, preference: &[String]) -> Rank {
    if let Ok(width) = key.parse::<u64>() {
        return Rank::Numeric(Reverse(width));
    }
    match preference.iter().position(|name| name == key) {
        Some(pos) => Rank::Preferred(pos),
        None => Rank::Other,
    }
}

pub fn select_derivative<'a>(
    derivatives: &'a HashMap<String, ws::Derivative>,
    preference: &[String],
) -> Option<DerivativeChoice<'a>> {
    derivatives
        .iter()
        .filter_map(|(key, derivative)| {
            derivative
                .checksum
                .as_deref()
                .map(|checksum| (key.as_str(), checksum))
        })
        .min_by_key(|&(key, _)| (rank_key(key, preference), key))
        .map(|(key, checksum)| DerivativeChoice { key, checksum })
}

struct SelectedAsset<'a> {
    guid: &'a str,
    photo: &'a ws::Photo,
    choice: DerivativeChoice<'a>,
}

fn select_assets<'a>(photos: &'a [ws::Photo], preference: &[String]) -> Vec<SelectedAsset<'a>> {
    photos
        .iter()
        .filter_map(|photo| {
            let guid = photo.photo_guid.as_deref()?;
            match select_derivative(&photo.derivatives, preference) {
                Some(choice) => {
                    debug!("Asset {guid} using derivative {}", choice.key);
                    Some(SelectedAsset {
                        guid,
                        photo,
                        choice,
                    })
                }
                None => {
                    let available: Vec<&String> = photo.derivatives.keys().collect();
                    warn!("No usable derivative for asset {guid}, available: {available:?}");
                    None
                }
            }
        })
        .collect()
}

fn build_asset_url(item: &ws::UrlItem) -> Option<String> {
    let scheme = item.url_scheme.as_deref().unwrap_or("https");
    let location = item.url_location.as_deref()?;
    let path = item.url_path.as_deref()?;
    Some(format!("{scheme}://{location}{path}"))
}

fn is_video_url(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Thumbnail for a video asset: the poster-frame derivative if it resolves
/// to a URL, otherwise the video URL itself.
fn video_thumbnail(
    photo: &ws::Photo,
    items: &HashMap<String, ws::UrlItem>,
    video_url: &str,
) -> String {
    photo
        .derivatives
        .get(POSTER_FRAME_KEY)
        .and_then(|derivative| derivative.checksum.as_deref())
        .and_then(|checksum| items.get(checksum))
        .and_then(build_asset_url)
        .unwrap_or_else(|| video_url.to_owned())
}

fn build_media_items(
    assets: &[SelectedAsset<'_>],
    items: &HashMap<String, ws::UrlItem>,
) -> Vec<MediaItem> {
    assets
        .iter()
        .filter_map(|asset| {
            let guid = asset.guid;
            let Some(item) = items.get(asset.choice.checksum) else {
                warn!("No URL entry for asset {guid} (checksum {})", asset.choice.checksum);
                return None;
            };
            let Some(url) = build_asset_url(item) else {
                warn!("URL entry for asset {guid} is missing its host or path");
                return None;
            };
            let parsed = match Url::parse(&url) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("Unparseable URL for asset {guid}: {err}");
                    return None;
                }
            };
            let is_video = is_video_url(&parsed);
            let thumbnail = is_video.then(|| video_thumbnail(asset.photo, items, &url));
            Some(MediaItem {
                url,
                is_video,
                thumbnail,
            })
        })
        .collect()
}

fn upstream_error(err: &reqwest::Error, call: &str) -> Error {
    let (status, message) = if err.is_timeout() {
        (StatusCode::GATEWAY_TIMEOUT, "Request timed out")
    } else {
        (StatusCode::BAD_GATEWAY, "Upstream service error")
    };
    warn!("{call} call failed: {err}");
    Error::new(anyhow!("{message}"), status)
}

fn not_found(message: &'static str) -> Error {
    Error::new(anyhow!(message), StatusCode::NOT_FOUND)
}

/// Resolves an album identifier to its media list: fetches the stream, picks
/// the best derivative per asset, fetches the asset URL map and assembles
/// the response. Individual assets that fail to resolve are dropped; only a
/// fully empty result fails the request. No retries, the caller's UI owns
/// any retry policy.
pub async fn resolve_album(
    client: &Client,
    config: &AppConfig,
    album_id: &str,
) -> Result<AlbumResponse, Error> {
    let base = format!(
        "{}/{album_id}/sharedstreams",
        config.upstream_base.trim_end_matches('/')
    );
    info!("Fetching album {album_id}");

    let resp = client
        .post(format!("{base}/webstream"))
        .json(&ws::StreamInput {
            stream_guid: album_id,
        })
        .send()
        .await
        .map_err(|e| upstream_error(&e, "webstream"))?
        .error_for_status()
        .map_err(|e| upstream_error(&e, "webstream"))?;
    let stream: ws::Stream = resp
        .json()
        .await
        .map_err(|e| upstream_error(&e, "webstream"))?;

    info!(
        "Stream data received for album {album_id}: {} assets",
        stream.photos.len()
    );
    if stream.photos.is_empty() {
        return Err(not_found("No photos found in album"));
    }

    let assets = select_assets(&stream.photos, &config.derivative_preference);
    if assets.is_empty() {
        return Err(not_found("No valid photos found"));
    }

    let photo_guids: Vec<&str> = assets.iter().map(|asset| asset.guid).collect();
    let resp = client
        .post(format!("{base}/webasseturls"))
        .json(&ws::AssetUrlsInput {
            photo_guids: &photo_guids,
        })
        .send()
        .await
        .map_err(|e| upstream_error(&e, "webasseturls"))?
        .error_for_status()
        .map_err(|e| upstream_error(&e, "webasseturls"))?;
    let asset_urls: ws::AssetUrls = resp
        .json()
        .await
        .map_err(|e| upstream_error(&e, "webasseturls"))?;

    let photos = build_media_items(&assets, &asset_urls.items);
    if photos.is_empty() {
        return Err(not_found("No valid media URLs found"));
    }
    let videos = photos.iter().filter(|item| item.is_video).count();
    info!(
        "Album {album_id} resolved: {} photos, {videos} videos",
        photos.len() - videos
    );
    Ok(AlbumResponse { photos })
}

/// Wire shapes of the two sharedstreams calls. Upstream entries that fail to
/// deserialize are skipped rather than failing the whole response.
pub mod ws {
    use std::collections::HashMap;

    use serde::{Deserialize, Serialize};
    use serde_with::{serde_as, VecSkipError};

    #[derive(Serialize, Clone)]
    pub struct StreamInput<'a> {
        #[serde(rename = "streamGuid")]
        pub stream_guid: &'a str,
    }

    #[serde_as]
    #[derive(Deserialize, Clone, Default)]
    pub struct Stream {
        #[serde_as(as = "VecSkipError<_>")]
        #[serde(default)]
        pub photos: Vec<Photo>,
    }

    /// Entries without a guid still parse: they count towards the album's
    /// size but are dropped during selection.
    #[derive(Deserialize, Clone, Default)]
    pub struct Photo {
        #[serde(rename = "photoGuid")]
        pub photo_guid: Option<String>,
        #[serde(default)]
        pub derivatives: HashMap<String, Derivative>,
    }

    #[derive(Deserialize, Clone, Default)]
    pub struct Derivative {
        pub checksum: Option<String>,
    }

    #[derive(Serialize, Clone)]
    pub struct AssetUrlsInput<'a> {
        #[serde(rename = "photoGuids")]
        pub photo_guids: &'a [&'a str],
    }

    #[derive(Deserialize, Clone, Default)]
    pub struct AssetUrls {
        #[serde(default)]
        pub items: HashMap<String, UrlItem>,
    }

    #[derive(Deserialize, Clone, Default)]
    pub struct UrlItem {
        pub url_scheme: Option<String>,
        pub url_location: Option<String>,
        pub url_path: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const DEFAULT_ID: &str = "B2EJtdOXm2MG2Rb";

    fn preference() -> Vec<String> {
        vec!["PosterFrame".to_owned(), "720p".to_owned()]
    }

    fn derivatives(value: serde_json::Value) -> HashMap<String, ws::Derivative> {
        serde_json::from_value(value).expect("test derivatives should deserialize")
    }

    #[test]
    fn extracts_fragment_identifier() {
        let id = extract_album_id(Some("https://host/sharedalbum/#ABC123"), DEFAULT_ID);
        assert_eq!(id, "ABC123");
    }

    #[test]
    fn extracts_last_path_segment() {
        let id = extract_album_id(Some("https://host/path/ABC123"), DEFAULT_ID);
        assert_eq!(id, "ABC123");
    }

    #[test]
    fn fragment_stops_at_query_string() {
        let id = extract_album_id(Some("https://host/sharedalbum/#ABC123?foo=1"), DEFAULT_ID);
        assert_eq!(id, "ABC123");
    }

    #[test]
    fn missing_or_empty_input_falls_back_to_default() {
        assert_eq!(extract_album_id(None, DEFAULT_ID), DEFAULT_ID);
        assert_eq!(extract_album_id(Some(""), DEFAULT_ID), DEFAULT_ID);
    }

    #[test]
    fn selector_prefers_larger_pixel_width() {
        let derivatives = derivatives(json!({
            "2048": { "checksum": "a" },
            "512": { "checksum": "b" },
        }));
        let choice = select_derivative(&derivatives, &preference()).unwrap();
        assert_eq!(choice.key, "2048");
        assert_eq!(choice.checksum, "a");
    }

    #[test]
    fn selector_prefers_listed_names_over_unknown() {
        let derivatives = derivatives(json!({
            "PosterFrame": { "checksum": "a" },
            "foo": { "checksum": "b" },
        }));
        let choice = select_derivative(&derivatives, &preference()).unwrap();
        assert_eq!(choice.key, "PosterFrame");
    }

    #[test]
    fn selector_breaks_unknown_name_ties_alphabetically() {
        let derivatives = derivatives(json!({
            "foo": { "checksum": "x" },
            "bar": { "checksum": "y" },
        }));
        let choice = select_derivative(&derivatives, &preference()).unwrap();
        assert_eq!(choice.key, "bar");
    }

    #[test]
    fn selector_prefers_numeric_over_named() {
        let derivatives = derivatives(json!({
            "PosterFrame": { "checksum": "p" },
            "342": { "checksum": "n" },
        }));
        let choice = select_derivative(&derivatives, &preference()).unwrap();
        assert_eq!(choice.key, "342");
    }

    #[test]
    fn selector_ignores_entries_without_checksum() {
        let derivatives = derivatives(json!({
            "2048": {},
            "512": { "checksum": "b" },
        }));
        let choice = select_derivative(&derivatives, &preference()).unwrap();
        assert_eq!(choice.key, "512");

        let empty = derivatives_without_checksums();
        assert!(select_derivative(&empty, &preference()).is_none());
    }

    fn derivatives_without_checksums() -> HashMap<String, ws::Derivative> {
        derivatives(json!({ "2048": {}, "PosterFrame": {} }))
    }

    #[test]
    fn builds_url_with_default_scheme() {
        let item: ws::UrlItem = serde_json::from_value(json!({
            "url_location": "cvws.icloud-content.com",
            "url_path": "/A/B/photo.jpg",
        }))
        .unwrap();
        assert_eq!(
            build_asset_url(&item).unwrap(),
            "https://cvws.icloud-content.com/A/B/photo.jpg"
        );
    }

    #[test]
    fn rejects_url_entries_missing_host_or_path() {
        let item: ws::UrlItem = serde_json::from_value(json!({
            "url_scheme": "https",
            "url_path": "/A/B/photo.jpg",
        }))
        .unwrap();
        assert!(build_asset_url(&item).is_none());
    }

    fn stream(value: serde_json::Value) -> ws::Stream {
        serde_json::from_value(value).expect("test stream should deserialize")
    }

    fn url_items(value: serde_json::Value) -> HashMap<String, ws::UrlItem> {
        serde_json::from_value(value).expect("test url items should deserialize")
    }

    #[test]
    fn video_gets_poster_frame_thumbnail() {
        let stream = stream(json!({ "photos": [{
            "photoGuid": "g1",
            "derivatives": {
                "2048": { "checksum": "video" },
                "PosterFrame": { "checksum": "poster" },
            },
        }]}));
        let items = url_items(json!({
            "video": { "url_location": "host", "url_path": "/clip.MP4" },
            "poster": { "url_location": "host", "url_path": "/poster.jpg" },
        }));

        let assets = select_assets(&stream.photos, &preference());
        let media = build_media_items(&assets, &items);
        assert_eq!(
            media,
            vec![MediaItem {
                url: "https://host/clip.MP4".to_owned(),
                is_video: true,
                thumbnail: Some("https://host/poster.jpg".to_owned()),
            }]
        );
    }

    #[test]
    fn video_without_poster_reuses_its_own_url() {
        let stream = stream(json!({ "photos": [{
            "photoGuid": "g1",
            "derivatives": { "1080": { "checksum": "video" } },
        }]}));
        let items = url_items(json!({
            "video": { "url_location": "host", "url_path": "/clip.mov" },
        }));

        let assets = select_assets(&stream.photos, &preference());
        let media = build_media_items(&assets, &items);
        assert!(media[0].is_video);
        assert_eq!(media[0].thumbnail.as_deref(), Some("https://host/clip.mov"));
    }

    #[test]
    fn assets_with_unresolvable_checksums_are_dropped() {
        let stream = stream(json!({ "photos": [
            {
                "photoGuid": "g1",
                "derivatives": { "1024": { "checksum": "known" } },
            },
            {
                "photoGuid": "g2",
                "derivatives": { "1024": { "checksum": "unknown" } },
            },
        ]}));
        let items = url_items(json!({
            "known": { "url_location": "host", "url_path": "/a.jpg" },
        }));

        let assets = select_assets(&stream.photos, &preference());
        let media = build_media_items(&assets, &items);
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].url, "https://host/a.jpg");
        assert!(!media[0].is_video);
        assert!(media[0].thumbnail.is_none());
    }

    #[test]
    fn guidless_entries_parse_but_are_not_selected() {
        let stream = stream(json!({ "photos": [
            { "derivatives": { "1024": { "checksum": "c" } } },
            {
                "photoGuid": "g2",
                "derivatives": { "1024": { "checksum": "c" } },
            },
        ]}));
        assert_eq!(stream.photos.len(), 2);

        let assets = select_assets(&stream.photos, &preference());
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].guid, "g2");
    }

    #[test]
    fn malformed_stream_entries_are_skipped() {
        let stream = stream(json!({ "photos": [
            "garbage",
            {
                "photoGuid": "g2",
                "derivatives": { "1024": { "checksum": "c" } },
            },
        ]}));
        assert_eq!(stream.photos.len(), 1);
        assert_eq!(stream.photos[0].photo_guid.as_deref(), Some("g2"));
    }
}
