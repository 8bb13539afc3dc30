use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use tracing::{error, info, warn};

use crate::{
    AppState,
    error::ApiError,
    handlers::UrlQuery,
    metadata::{self, InstagramPost},
    packer,
    response::stream_staged_file,
    staging::StagedDir,
    validate,
};

pub async fn post_info(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Json<InstagramPost>, ApiError> {
    let url = validate::required_http_url(query.url.as_deref(), "No URL provided")?;
    let shortcode = validate::instagram_shortcode(&url)
        .ok_or_else(|| ApiError::invalid_request("Invalid Instagram URL"))?;

    let stdout = {
        let _slot = state.tool_slot().await?;
        state
            .extractor
            .dump_json(url.as_str(), true)
            .await
            .map_err(|error| ApiError::from_tool(error, "Instagram blocked or private"))?
    };

    let post = metadata::instagram_post(&stdout, &shortcode).map_err(|error| {
        warn!("Could not parse Instagram info for {shortcode}: {error}");
        ApiError::malformed_output("Failed to parse IG info")
    })?;

    if post.medias.is_empty() {
        warn!("Instagram post {shortcode} listed no downloadable media");
        return Err(ApiError::artifact_not_found("No media found"));
    }

    Ok(Json(post))
}

pub async fn reel_via_instaloader(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Response, ApiError> {
    let url = validate::required_http_url(query.url.as_deref(), "No URL provided")?;
    let shortcode = validate::instagram_shortcode(&url)
        .ok_or_else(|| ApiError::invalid_request("Invalid Instagram URL"))?;

    let staged = stage(&state, "ig").await?;
    {
        let _slot = state.tool_slot().await?;
        state
            .instaloader
            .fetch_post(&shortcode, staged.path())
            .await
            .map_err(|error| ApiError::from_tool(error, "Instagram blocked or private"))?;
    }

    let files = media_files(&staged).await?;
    info!("{shortcode}: {} media file(s)", files.len());
    deliver(staged, files).await
}

pub async fn stories_via_instaloader(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> Result<Response, ApiError> {
    let url = validate::required_http_url(query.url.as_deref(), "No URL provided")?;
    let target = validate::instagram_story_target(&url)
        .ok_or_else(|| ApiError::invalid_request("Invalid Instagram stories URL"))?;

    let staged = stage(&state, "story").await?;
    {
        let _slot = state.tool_slot().await?;
        state
            .instaloader
            .fetch_stories(&target.username, staged.path())
            .await
            .map_err(|error| ApiError::from_tool(error, "Stories not found or blocked"))?;
    }

    let mut files = media_files(&staged).await?;
    if let Some(story_id) = &target.story_id {
        files.retain(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(story_id.as_str()))
        });
    }
    info!(
        "Stories of {}: {} media file(s) selected",
        target.username,
        files.len()
    );

    deliver(staged, files).await
}

async fn stage(state: &AppState, prefix: &str) -> Result<StagedDir, ApiError> {
    state.staging.create(prefix).await.map_err(|error| {
        error!("Could not create staging directory: {error}");
        ApiError::internal("Could not prepare the download")
    })
}

async fn media_files(staged: &StagedDir) -> Result<Vec<std::path::PathBuf>, ApiError> {
    packer::collect_media_files(staged.path())
        .await
        .map_err(|error| {
            error!("Could not list {:?}: {error}", staged.path());
            ApiError::internal("Download failed")
        })
}

async fn deliver(
    mut staged: StagedDir,
    files: Vec<std::path::PathBuf>,
) -> Result<Response, ApiError> {
    let delivery = packer::pack(&mut staged, files).await?;
    stream_staged_file(delivery.path(), staged.into_guard()).await
}
