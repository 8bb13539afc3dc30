//! Seams around the external downloaders. Handlers only see these traits, so the orchestration
//! can be exercised against fakes without the real binaries installed.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tracing::info;

use crate::process::{ToolCommand, ToolError};

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw JSON dump for `url`. `allow_playlist` lets multi-entry posts list every entry.
    async fn dump_json(&self, url: &str, allow_playlist: bool) -> Result<Vec<u8>, ToolError>;

    /// Downloads `url` with `format`, writing to `output_template` (which contains `%(ext)s`).
    async fn download(
        &self,
        url: &str,
        format: &str,
        output_template: &Path,
    ) -> Result<(), ToolError>;
}

#[async_trait]
pub trait InstagramLoader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes every media file of the post into `target_dir`.
    async fn fetch_post(&self, shortcode: &str, target_dir: &Path) -> Result<(), ToolError>;

    /// Writes the user's current stories into `target_dir`, one file per story named by media id.
    async fn fetch_stories(&self, username: &str, target_dir: &Path) -> Result<(), ToolError>;
}

pub struct YtDlp {
    command: ToolCommand,
    timeout: Duration,
}

impl YtDlp {
    pub fn new(command: ToolCommand, timeout: Duration) -> Self {
        Self { command, timeout }
    }
}

#[async_trait]
impl MediaExtractor for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn dump_json(&self, url: &str, allow_playlist: bool) -> Result<Vec<u8>, ToolError> {
        let mut args = vec!["-J".to_string(), "--no-warnings".to_string()];
        if !allow_playlist {
            args.push("--no-playlist".to_string());
        }
        args.push("--".to_string());
        args.push(url.to_string());

        let output = self.command.run(&args, self.timeout).await?;
        Ok(output.stdout)
    }

    async fn download(
        &self,
        url: &str,
        format: &str,
        output_template: &Path,
    ) -> Result<(), ToolError> {
        let args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--newline".to_string(),
            "-f".to_string(),
            format.to_string(),
            "-o".to_string(),
            output_template.to_string_lossy().into_owned(),
            "--".to_string(),
            url.to_string(),
        ];

        self.command.run(&args, self.timeout).await?;
        info!("yt-dlp finished downloading {url}");
        Ok(())
    }
}

pub struct Instaloader {
    command: ToolCommand,
    timeout: Duration,
    login: Option<String>,
    session_file: Option<PathBuf>,
}

impl Instaloader {
    pub fn new(
        command: ToolCommand,
        timeout: Duration,
        login: Option<String>,
        session_file: Option<PathBuf>,
    ) -> Self {
        Self {
            command,
            timeout,
            login,
            session_file,
        }
    }

    fn base_args(&self, target_dir: &Path, filename_pattern: &str) -> Vec<String> {
        let mut args = vec![
            "--quiet".to_string(),
            "--no-metadata-json".to_string(),
            "--no-captions".to_string(),
            "--no-video-thumbnails".to_string(),
            "--no-compress-json".to_string(),
            "--dirname-pattern".to_string(),
            target_dir.to_string_lossy().into_owned(),
            "--filename-pattern".to_string(),
            filename_pattern.to_string(),
        ];

        if let Some(login) = &self.login {
            args.push("--login".to_string());
            args.push(login.clone());
        }
        if let Some(session_file) = &self.session_file {
            args.push("--sessionfile".to_string());
            args.push(session_file.to_string_lossy().into_owned());
        }

        args
    }
}

#[async_trait]
impl InstagramLoader for Instaloader {
    fn name(&self) -> &'static str {
        "instaloader"
    }

    async fn fetch_post(&self, shortcode: &str, target_dir: &Path) -> Result<(), ToolError> {
        let mut args = self.base_args(target_dir, "{shortcode}");
        args.push("--".to_string());
        args.push(format!("-{shortcode}"));

        self.command.run(&args, self.timeout).await?;
        Ok(())
    }

    async fn fetch_stories(&self, username: &str, target_dir: &Path) -> Result<(), ToolError> {
        let mut args = self.base_args(target_dir, "{mediaid}");
        args.extend([
            "--stories".to_string(),
            "--no-posts".to_string(),
            "--no-profile-pic".to_string(),
            "--".to_string(),
            username.to_string(),
        ]);

        self.command.run(&args, self.timeout).await?;
        Ok(())
    }
}
