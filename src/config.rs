use std::{path::PathBuf, time::Duration};

use url::Url;

use crate::process::ToolCommand;

pub const DEFAULT_PORT: u16 = 5000;
const DEFAULT_TOOL_TIMEOUT_SECONDS: u64 = 180;
const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;
const DEFAULT_STALE_STAGING_SECONDS: u64 = 2 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub downloads_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub yt_dlp: ToolCommand,
    pub instaloader: ToolCommand,
    pub instagram_login: Option<String>,
    pub instagram_session_file: Option<PathBuf>,
    pub tool_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_concurrent_downloads: usize,
    pub allowed_origins: Vec<String>,
    pub public_base_url: Option<String>,
    pub stale_staging_after: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            downloads_dir: PathBuf::from("downloads"),
            staging_dir: std::env::temp_dir().join("downloadables-staging"),
            yt_dlp: ToolCommand::new("yt-dlp"),
            instaloader: ToolCommand::new("instaloader"),
            instagram_login: None,
            instagram_session_file: None,
            tool_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECONDS),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            allowed_origins: Vec::new(),
            public_base_url: None,
            stale_staging_after: Duration::from_secs(DEFAULT_STALE_STAGING_SECONDS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: resolve_bind_addr(),
            downloads_dir: read_string_env("DOWNLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.downloads_dir),
            staging_dir: read_string_env("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.staging_dir),
            yt_dlp: read_string_env("YT_DLP_COMMAND")
                .and_then(|value| ToolCommand::parse(&value))
                .unwrap_or(defaults.yt_dlp),
            instaloader: read_string_env("INSTALOADER_COMMAND")
                .and_then(|value| ToolCommand::parse(&value))
                .unwrap_or(defaults.instaloader),
            instagram_login: read_string_env("INSTAGRAM_LOGIN"),
            instagram_session_file: read_string_env("INSTAGRAM_SESSION_FILE").map(PathBuf::from),
            tool_timeout: read_u64_env("TOOL_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.tool_timeout),
            upstream_timeout: read_u64_env("UPSTREAM_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            max_concurrent_downloads: read_u64_env("MAX_CONCURRENT_DOWNLOADS")
                .and_then(|value| usize::try_from(value).ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.max_concurrent_downloads),
            allowed_origins: read_string_env("ALLOWED_ORIGINS")
                .map(|value| split_origins(&value))
                .unwrap_or_default(),
            public_base_url: read_string_env("PUBLIC_BASE_URL")
                .map(|value| value.trim_end_matches('/').to_string()),
            stale_staging_after: read_u64_env("STALE_STAGING_SECONDS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stale_staging_after),
        }
    }
}

fn read_string_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64_env(name: &str) -> Option<u64> {
    read_string_env(name).and_then(|value| value.parse::<u64>().ok())
}

fn resolve_bind_addr() -> String {
    if let Some(configured) = read_string_env("APP_ADDR") {
        return configured;
    }

    let port = read_string_env("PORT")
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    format!("0.0.0.0:{port}")
}

fn split_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Canonical `scheme://host[:port]` form of a CORS origin, or `None` if it is not one.
pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}
