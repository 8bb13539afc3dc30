#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use downloadables::{
    AppState, build_cors_layer,
    config::Config,
    extractor::{InstagramLoader, MediaExtractor},
    process::ToolError,
    router,
    staging::UuidIds,
};
use tempfile::TempDir;
use tokio::net::TcpListener;

fn failure(program: &str, stderr: &str) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        stderr: stderr.to_string(),
    }
}

/// Stand-in for yt-dlp. Downloads write the requested URL into the templated path.
#[derive(Default)]
pub struct FakeExtractor {
    pub info_stdout: Vec<u8>,
    pub stderr_failure: Option<String>,
    pub output_ext: Option<&'static str>,
    pub payload_size: usize,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub templates: Mutex<Vec<PathBuf>>,
    /// Set when a download future is dropped before it completes.
    pub abandoned: AtomicBool,
    pub finished: AtomicBool,
}

impl FakeExtractor {
    pub fn with_info(stdout: &[u8]) -> Self {
        Self {
            info_stdout: stdout.to_vec(),
            ..Self::default()
        }
    }

    pub fn producing(ext: &'static str) -> Self {
        Self {
            output_ext: Some(ext),
            ..Self::default()
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            stderr_failure: Some(stderr.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Flags its download as abandoned unless it is disarmed first.
struct InFlight<'a> {
    abandoned: &'a AtomicBool,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn dump_json(&self, _url: &str, _allow_playlist: bool) -> Result<Vec<u8>, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stderr) = &self.stderr_failure {
            return Err(failure("yt-dlp", stderr));
        }
        Ok(self.info_stdout.clone())
    }

    async fn download(
        &self,
        url: &str,
        _format: &str,
        output_template: &Path,
    ) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.templates
            .lock()
            .unwrap()
            .push(output_template.to_path_buf());
        let mut in_flight = InFlight {
            abandoned: &self.abandoned,
            armed: true,
        };
        tokio::time::sleep(self.delay).await;
        in_flight.armed = false;
        self.finished.store(true, Ordering::SeqCst);

        if let Some(stderr) = &self.stderr_failure {
            return Err(failure("yt-dlp", stderr));
        }
        if let Some(ext) = self.output_ext {
            let target = output_template.to_string_lossy().replace("%(ext)s", ext);
            let mut payload = url.as_bytes().to_vec();
            payload.resize(payload.len().max(self.payload_size), b'x');
            tokio::fs::write(target, payload).await.unwrap();
        }
        Ok(())
    }
}

/// Stand-in for instaloader that drops the configured file names into the target directory.
#[derive(Default)]
pub struct FakeLoader {
    pub files: Vec<&'static str>,
    pub stderr_failure: Option<String>,
    pub calls: AtomicUsize,
    pub targets: Mutex<Vec<String>>,
}

impl FakeLoader {
    pub fn writing(files: &[&'static str]) -> Self {
        Self {
            files: files.to_vec(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn write_files(&self, target: &str, dir: &Path) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.to_string());
        if let Some(stderr) = &self.stderr_failure {
            return Err(failure("instaloader", stderr));
        }
        for name in &self.files {
            tokio::fs::write(dir.join(name), name).await.unwrap();
        }
        Ok(())
    }
}

#[async_trait]
impl InstagramLoader for FakeLoader {
    fn name(&self) -> &'static str {
        "instaloader"
    }

    async fn fetch_post(&self, shortcode: &str, target_dir: &Path) -> Result<(), ToolError> {
        self.write_files(shortcode, target_dir).await
    }

    async fn fetch_stories(&self, username: &str, target_dir: &Path) -> Result<(), ToolError> {
        self.write_files(username, target_dir).await
    }
}

pub struct TestApp {
    pub base: String,
    pub client: reqwest::Client,
    pub staging: TempDir,
    pub downloads: TempDir,
}

impl TestApp {
    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{path}", self.base))
    }

    pub fn staging_entries(&self) -> Vec<String> {
        std::fs::read_dir(self.staging.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Waits until the staging root is empty. Cleanup runs when the server drops the body,
    /// which can trail the client receiving the last byte.
    pub async fn staging_drained(&self) -> bool {
        for _ in 0..100 {
            if self.staging_entries().is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

pub async fn spawn_app(extractor: Arc<FakeExtractor>, loader: Arc<FakeLoader>) -> TestApp {
    let staging = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let config = Config {
        staging_dir: staging.path().to_path_buf(),
        downloads_dir: downloads.path().to_path_buf(),
        max_concurrent_downloads: 16,
        upstream_timeout: Duration::from_secs(5),
        ..Config::default()
    };

    let state = AppState::new(&config, extractor, loader, Arc::new(UuidIds)).unwrap();
    let app = router(state, build_cors_layer(&[]).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        base: format!("http://{addr}"),
        client: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap(),
        staging,
        downloads,
    }
}

pub async fn spawn_default_app() -> TestApp {
    spawn_app(
        Arc::new(FakeExtractor::default()),
        Arc::new(FakeLoader::default()),
    )
    .await
}
