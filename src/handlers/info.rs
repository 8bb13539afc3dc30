use axum::{
    Json,
    extract::{Query, State},
};
use tracing::{debug, warn};

use crate::{
    AppState,
    error::ApiError,
    handlers::UrlQuery,
    metadata::{self, VideoInfo},
    validate,
};

pub async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<VideoInfo>, ApiError> {
    let url = validate::required_http_url(query.url.as_deref(), "No URL provided")?;

    let stdout = {
        let _slot = state.tool_slot().await?;
        state
            .extractor
            .dump_json(url.as_str(), false)
            .await
            .map_err(|error| ApiError::from_tool(error, "Failed to fetch info"))?
    };

    let info = metadata::video_info(&stdout).map_err(|error| {
        warn!("{} printed invalid JSON for {url}: {error}", state.extractor.name());
        ApiError::malformed_output(format!("Invalid {} output", state.extractor.name()))
    })?;

    debug!(
        "{url}: {} video and {} audio formats",
        info.video_formats.len(),
        info.audio_formats.len()
    );
    Ok(Json(info))
}
