pub mod config;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod metadata;
pub mod packer;
pub mod process;
pub mod proxy;
pub mod response;
pub mod staging;
pub mod validate;

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION},
    routing::get,
};
use tokio::{
    net::TcpListener,
    sync::{OwnedSemaphorePermit, Semaphore},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, normalize_origin},
    error::ApiError,
    extractor::{InstagramLoader, Instaloader, MediaExtractor, YtDlp},
    response::DOWNLOAD_FILENAME_HEADER,
    staging::{IdGenerator, StagingRoot, UuidIds},
};

/// Shared, cheaply clonable request context. Nothing in here is mutated by handlers.
#[derive(Clone)]
pub struct AppState {
    pub(crate) extractor: Arc<dyn MediaExtractor>,
    pub(crate) instaloader: Arc<dyn InstagramLoader>,
    pub(crate) staging: StagingRoot,
    pub(crate) downloads_dir: PathBuf,
    pub(crate) public_base_url: Option<String>,
    pub(crate) image_client: reqwest::Client,
    pub(crate) video_client: reqwest::Client,
    tool_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: &Config,
        extractor: Arc<dyn MediaExtractor>,
        instaloader: Arc<dyn InstagramLoader>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            extractor,
            instaloader,
            staging: StagingRoot::new(&config.staging_dir, ids),
            downloads_dir: config.downloads_dir.clone(),
            public_base_url: config.public_base_url.clone(),
            image_client: proxy::image_client(config.upstream_timeout)?,
            video_client: proxy::video_client(config.upstream_timeout)?,
            tool_slots: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
        })
    }

    /// State wired to the real `yt-dlp` and `instaloader` binaries.
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let extractor = Arc::new(YtDlp::new(config.yt_dlp.clone(), config.tool_timeout));
        let instaloader = Arc::new(Instaloader::new(
            config.instaloader.clone(),
            config.tool_timeout,
            config.instagram_login.clone(),
            config.instagram_session_file.clone(),
        ));
        Self::new(config, extractor, instaloader, Arc::new(UuidIds))
    }

    /// Waits for one of the external-process slots.
    pub(crate) async fn tool_slot(&self) -> Result<OwnedSemaphorePermit, ApiError> {
        Arc::clone(&self.tool_slots)
            .acquire_owned()
            .await
            .map_err(|_| ApiError::internal("Could not reserve a download slot"))
    }
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    let files = ServeDir::new(&state.downloads_dir);

    Router::new()
        .route("/", get(handlers::health))
        .route("/info", get(handlers::info::video_info))
        .route("/download", get(handlers::download::download))
        .route("/instagram-info", get(handlers::instagram::post_info))
        .route(
            "/instagram-reel-instaloader",
            get(handlers::instagram::reel_via_instaloader),
        )
        .route(
            "/instagram-stories-instaloader",
            get(handlers::instagram::stories_via_instaloader),
        )
        .route("/proxy-image", get(proxy::proxy_image))
        .route("/proxy-video", get(proxy::proxy_video))
        .nest_service("/files", files)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ]);

    if configured.is_empty() {
        warn!("ALLOWED_ORIGINS is not set, accepting requests from any origin.");
        return Ok(base.allow_origin(Any));
    }

    let normalized_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        normalized_origins.len(),
        normalized_origins
    );

    let allowed_origins = Arc::new(normalized_origins);
    let allow_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let normalized = origin.to_str().ok().and_then(normalize_origin);
        let allowed = normalized
            .as_ref()
            .is_some_and(|value| allowed_origins.contains(value));
        debug!("CORS origin check raw={:?} allowed={}", origin, allowed);
        allowed
    });

    Ok(base.allow_origin(allow_origin))
}

/// Prepares the directories, checks the tools and serves until Ctrl-C.
pub async fn serve(config: Config) -> Result<(), ApiError> {
    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create downloads directory {:?}: {error}",
                config.downloads_dir
            ))
        })?;
    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create staging directory {:?}: {error}",
                config.staging_dir
            ))
        })?;

    staging::sweep_stale(&config.staging_dir, config.stale_staging_after).await;

    if !config.yt_dlp.log_version().await {
        warn!("/info and /download will fail until yt-dlp is installed.");
    }
    if !config.instaloader.log_version().await {
        warn!("Instaloader endpoints will fail until instaloader is installed.");
    }

    let state = AppState::from_config(&config)?;
    let cors = build_cors_layer(&config.allowed_origins)?;
    let app = router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Backend running on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {error}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
