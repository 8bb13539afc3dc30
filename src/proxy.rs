//! Image and video relays. Both stream upstream bytes straight into the response body.
//!
//! Neither client follows redirects. The image relay treats anything but `200` as an error;
//! the video relay hands redirects back to the caller so players can follow CDN hops.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{
            ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION,
            RANGE, REFERER,
        },
    },
    response::{IntoResponse, Response},
};
use reqwest::redirect::Policy;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::{AppState, error::ApiError, validate};

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
const DEFAULT_IMAGE_TYPE: &str = "image/jpeg";
const DEFAULT_VIDEO_TYPE: &str = "video/mp4";

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    url: Option<String>,
}

pub fn image_client(limit: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .connect_timeout(limit)
        .timeout(limit)
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))
}

/// Videos can take far longer than `limit` to transfer, so only connect and idle reads are
/// bounded.
pub fn video_client(limit: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .redirect(Policy::none())
        .connect_timeout(limit)
        .read_timeout(limit)
        .build()
        .map_err(|error| ApiError::internal(format!("Could not build HTTP client: {error}")))
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Referer the CDN behind `target` expects to see.
pub fn referer_for(target: &Url) -> String {
    let host = target.host_str().unwrap_or_default().to_ascii_lowercase();

    if ["instagram.com", "cdninstagram.com", "fbcdn.net"]
        .iter()
        .any(|domain| host_matches(&host, domain))
    {
        return "https://www.instagram.com/".to_string();
    }
    if ["youtube.com", "googlevideo.com", "ytimg.com", "youtu.be"]
        .iter()
        .any(|domain| host_matches(&host, domain))
    {
        return "https://www.youtube.com/".to_string();
    }

    format!("{}/", target.origin().ascii_serialization())
}

fn forward_header(
    from: &reqwest::header::HeaderMap,
    to: &mut HeaderMap,
    name: axum::http::HeaderName,
) {
    if let Some(value) = from.get(&name) {
        to.insert(name, value.clone());
    }
}

fn content_type_or(upstream: &reqwest::Response, fallback: &'static str) -> HeaderValue {
    upstream
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(fallback))
}

pub async fn proxy_image(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let target = validate::required_http_url(query.url.as_deref(), "No URL provided")?;

    let upstream = state
        .image_client
        .get(target.clone())
        .send()
        .await
        .map_err(|error| {
            warn!("Image proxy could not reach {target}: {error}");
            ApiError::network("Failed to fetch image")
        })?;

    let status = upstream.status();
    if status != StatusCode::OK {
        warn!("Image proxy got {status} from {target}");
        return Err(ApiError::upstream_status(status, "Failed to fetch image"));
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, content_type_or(&upstream, DEFAULT_IMAGE_TYPE));
    forward_header(upstream.headers(), &mut headers, CONTENT_LENGTH);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));

    Ok((headers, Body::from_stream(upstream.bytes_stream())).into_response())
}

pub async fn proxy_video(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target = validate::required_http_url(query.url.as_deref(), "No URL provided")?;

    let mut request = state
        .video_client
        .get(target.clone())
        .header(REFERER, referer_for(&target));
    if let Some(range) = request_headers.get(RANGE) {
        request = request.header(RANGE, range.clone());
    }

    let upstream = request.send().await.map_err(|error| {
        warn!("Video proxy could not reach {target}: {error}");
        ApiError::network("Failed to fetch video")
    })?;

    let status = upstream.status();
    if status.is_redirection() {
        let location = upstream
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| target.join(value).ok())
            .ok_or_else(|| {
                warn!("Video proxy got {status} without a usable Location from {target}");
                ApiError::upstream_status(status, "Failed to fetch video")
            })?;

        debug!("Video proxy redirecting {target} to {location}");
        let location = HeaderValue::from_str(location.as_str())
            .map_err(|_| ApiError::internal("Upstream sent an invalid redirect"))?;
        return Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response());
    }

    if !status.is_success() {
        warn!("Video proxy got {status} from {target}");
        return Err(ApiError::upstream_status(status, "Failed to fetch video"));
    }

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, content_type_or(&upstream, DEFAULT_VIDEO_TYPE));
    forward_header(upstream.headers(), &mut headers, CONTENT_LENGTH);
    forward_header(upstream.headers(), &mut headers, CONTENT_RANGE);
    forward_header(upstream.headers(), &mut headers, ACCEPT_RANGES);

    Ok((status, headers, Body::from_stream(upstream.bytes_stream())).into_response())
}
