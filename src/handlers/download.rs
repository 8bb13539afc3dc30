use std::{io::ErrorKind, path::Path};

use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, header::HOST},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{
    AppState,
    error::ApiError,
    response::stream_staged_file,
    staging::{self, LocateError},
    validate,
};

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    url: Option<String>,
    format: Option<String>,
    delivery: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Send the file in the response body, then delete it.
    Stream,
    /// Move the file into the public downloads root and answer with its URL.
    Link,
}

impl Delivery {
    fn parse(value: Option<&str>) -> Option<Self> {
        match validate::non_empty(value) {
            None | Some("stream") => Some(Self::Stream),
            Some("link") => Some(Self::Link),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLink {
    download_url: String,
}

pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (Some(raw_url), Some(format)) = (
        validate::non_empty(query.url.as_deref()),
        validate::non_empty(query.format.as_deref()),
    ) else {
        return Err(ApiError::invalid_request("Missing url or format"));
    };
    let url = validate::parse_http_url(raw_url)
        .ok_or_else(|| ApiError::invalid_request("Invalid URL"))?;
    if !validate::is_valid_format_selector(format) {
        return Err(ApiError::invalid_request("Invalid format"));
    }
    let delivery = Delivery::parse(query.delivery.as_deref())
        .ok_or_else(|| ApiError::invalid_request("Unknown delivery mode"))?;

    let staged = state.staging.create("yt").await.map_err(|error| {
        error!("Could not create staging directory: {error}");
        ApiError::internal("Could not prepare the download")
    })?;
    let output_template = staged.path().join(format!("{}.%(ext)s", staged.name()));

    {
        let _slot = state.tool_slot().await?;
        state
            .extractor
            .download(url.as_str(), format, &output_template)
            .await
            .map_err(|error| ApiError::from_tool(error, "Download failed"))?;
    }

    let artifact = staging::locate_artifact(staged.path(), staged.name())
        .await
        .map_err(|locate_error| match locate_error {
            LocateError::NotFound => {
                warn!("{} exited cleanly but left no file for {url}", state.extractor.name());
                ApiError::artifact_not_found("File not found")
            }
            LocateError::Ambiguous(paths) => {
                warn!("Several candidate files for {url}: {:?}", paths);
                ApiError::ambiguous_artifact("Download produced several files")
            }
            LocateError::Io(message) => {
                error!("Could not list {:?}: {message}", staged.path());
                ApiError::internal("Download failed")
            }
        })?;

    match delivery {
        Delivery::Stream => stream_staged_file(&artifact, staged.into_guard()).await,
        Delivery::Link => {
            let name = publish(&artifact, &state.downloads_dir).await?;
            let base = public_base(&state, &headers);
            info!("Published {name} for {url}");
            Ok(Json(DownloadLink {
                download_url: format!("{base}/files/{}", urlencoding::encode(&name)),
            })
            .into_response())
        }
    }
}

/// Moves a finished artifact into the public root, keeping its request-unique name.
async fn publish(artifact: &Path, downloads_dir: &Path) -> Result<String, ApiError> {
    let name = artifact
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::internal("Download failed"))?;
    let destination = downloads_dir.join(&name);

    let moved = match tokio::fs::rename(artifact, &destination).await {
        Ok(()) => Ok(()),
        // Staging and downloads roots may live on different filesystems.
        Err(error) if error.kind() == ErrorKind::CrossesDevices => {
            copy_or_discard(artifact, &destination).await
        }
        Err(error) => Err(error),
    };

    moved.map_err(|error| {
        error!("Could not publish {:?} to {:?}: {error}", artifact, destination);
        ApiError::internal("Download failed")
    })?;

    Ok(name)
}

/// Copies `artifact` to `destination`, removing whatever part of the copy was written if it
/// fails.
async fn copy_or_discard(artifact: &Path, destination: &Path) -> std::io::Result<()> {
    if let Err(error) = tokio::fs::copy(artifact, destination).await {
        if let Err(cleanup) = tokio::fs::remove_file(destination).await
            && cleanup.kind() != ErrorKind::NotFound
        {
            warn!("Could not remove partial copy {:?}: {cleanup}", destination);
        }
        return Err(error);
    }
    Ok(())
}

fn public_base(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.public_base_url {
        return base.clone();
    }

    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("http://{host}")
}
