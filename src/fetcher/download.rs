//! Direct download of `http(s)://` and `ftp(s)://` resources.
//!
//! HTTP goes through reqwest and is streamed to a uniquely named `.part`
//! file next to the destination, renamed into place only on a 200. FTP is
//! handed to `curl` through the command runner.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::runner::CommandRunner;

/// HTTP status reported for a successful curl transfer.
const STATUS_OK: u16 = 200;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported scheme {0}://")]
    UnsupportedScheme(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("curl exited with code {0}")]
    Curl(i32),
}

/// Fetches a URL into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Downloads `url` to `dest` and returns the response status.
    ///
    /// A non-200 status is not an error at this level; `dest` is left
    /// untouched in that case.
    async fn download(&self, url: &str, dest: &Path) -> Result<u16, DownloadError>;
}

pub struct HttpDownloader {
    client: Client,
    runner: Arc<dyn CommandRunner>,
}

impl HttpDownloader {
    pub fn new(config: &FetcherConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .danger_accept_invalid_certs(!config.tls_verify)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self::with_client(client, runner)
    }

    pub fn with_client(client: Client, runner: Arc<dyn CommandRunner>) -> Self {
        Self { client, runner }
    }

    async fn download_http(&self, url: &str, dest: &Path) -> Result<u16, DownloadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if status != STATUS_OK {
            warn!("Download of {url} returned HTTP {status}");
            return Ok(status);
        }

        let part = part_path(dest);
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            let mut body = response.bytes_stream();
            let mut size: u64 = 0;
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            tokio::fs::rename(&part, dest).await?;
            Ok::<u64, DownloadError>(size)
        }
        .await;

        match result {
            Ok(size) => {
                info!("Downloaded {url} ({size} bytes) → {}", dest.display());
                Ok(status)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn download_ftp(&self, url: &str, dest: &Path) -> Result<u16, DownloadError> {
        let cwd = dest.parent().unwrap_or_else(|| Path::new("."));
        let command = format!(
            "curl --fail --silent --show-error -o '{}' '{}'",
            dest.display(),
            url
        );
        debug!("FTP command: {command}");

        match self.runner.run(&command, cwd).await? {
            0 => Ok(STATUS_OK),
            code => Err(DownloadError::Curl(code)),
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<u16, DownloadError> {
        let parsed = url::Url::parse(url)?;
        match parsed.scheme() {
            "http" | "https" => self.download_http(url, dest).await,
            "ftp" | "ftps" => self.download_ftp(url, dest).await,
            other => Err(DownloadError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// In-flight name for `dest`, unique per download.
fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{name}.{}.part", uuid::Uuid::new_v4()))
}
