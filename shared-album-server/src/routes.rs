#![allow(clippy::needless_pass_by_value)]
use std::sync::Arc;

use actix_web::{get, options, post, web, http::{header, StatusCode}, HttpResponse};
use anyhow::anyhow;
use log::info;
use reqwest::Client;
use shared_album_api::{AlbumRequest, AlbumResponse, ProbeResponse, StatusResponse};

use crate::{cache::AlbumCache, errors::{self, Error}, icloud, state::AppConfig};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(resolve_album)
       .service(album_probe)
       .service(album_options)
       .service(get_status);
}

type JsonResult<T> = errors::Result<web::Json<T>>;

fn bad_request(message: &'static str) -> Error {
    Error::new(anyhow!(message), StatusCode::BAD_REQUEST)
}

#[post("/photo-album")]
async fn resolve_album(
    body: web::Bytes,
    client: web::Data<Client>,
    config: web::Data<AppConfig>,
    cache: web::Data<AlbumCache>,
) -> JsonResult<Arc<AlbumResponse>> {
    // Parsed by hand so malformed bodies surface as a json error response
    // instead of actix's default 400. A syntactically valid body with a
    // non-string albumUrl is a field error, not a json error.
    let body: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid JSON"))?;
    let request: AlbumRequest =
        serde_json::from_value(body).map_err(|_| bad_request("Missing or invalid albumUrl"))?;
    let album_url = match request.album_url.as_deref() {
        Some(url) if !url.is_empty() => url,
        _ => return Err(bad_request("Missing or invalid albumUrl")),
    };

    let album_id = icloud::extract_album_id(Some(album_url), &config.default_album_id);
    if let Some(cached) = cache.get(&album_id) {
        info!("Serving album {album_id} from cache");
        return Ok(web::Json(cached));
    }

    let resolved = Arc::new(icloud::resolve_album(&client, &config, &album_id).await?);
    cache.set(&album_id, resolved.clone());
    Ok(web::Json(resolved))
}

#[get("/photo-album")]
async fn album_probe() -> web::Json<ProbeResponse> {
    web::Json(ProbeResponse { ok: true })
}

#[options("/photo-album")]
async fn album_options() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header((header::ALLOW, "GET, POST, OPTIONS"))
        .finish()
}

#[get("/status")]
async fn get_status(
    config: web::Data<AppConfig>,
    cache: web::Data<AlbumCache>,
) -> web::Json<StatusResponse> {
    web::Json(StatusResponse {
        server_version: env!("CARGO_PKG_VERSION").to_owned(),
        server_startup_timestamp: config.startup_timestamp.timestamp(),
        cached_albums: cache.len(),
    })
}
