pub mod download;
pub mod info;
pub mod instagram;

use serde::Deserialize;

pub const HEALTH_MESSAGE: &str = "Downloadables backend is running";

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: Option<String>,
}

pub async fn health() -> &'static str {
    HEALTH_MESSAGE
}
