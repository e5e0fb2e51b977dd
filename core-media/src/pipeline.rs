//! # Media Pipeline
//!
//! Downloads one resolved media URL, renders the fixed-width WebP renditions
//! and publishes them under `{root_dir}/{contract}/{token_id}/`.
//!
//! ## Guarantees
//!
//! - Inline payloads, non-HTTP URLs and unsafe keys are rejected before any
//!   network access
//! - The download runs under the response, idle and total budgets of a
//!   [`TimeoutBudget`] and a byte cap
//! - The public directory is replaced in a single rename, so it never holds
//!   a partial set of renditions
//! - The temporary download is removed whatever the outcome

use crate::error::{MediaError, Result, TimeoutPhase};
use crate::rendition::{self, Rendition, RENDITION_WIDTHS};
use bridge_traits::http::{HttpClient, TimeoutBudget};
use core_store::TokenKey;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Base64 strings longer than this are treated as inline payloads
const INLINE_PAYLOAD_MIN_LEN: usize = 96;

const BASE64_PATTERN: &str = r"^(?:[A-Za-z0-9+/]{4})*(?:[A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$";

const READ_CHUNK: usize = 64 * 1024;

/// Pipeline settings, derived from the runtime configuration
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Directory renditions are published under
    pub root_dir: PathBuf,
    /// Directory for in-flight downloads
    pub temp_dir: PathBuf,
    /// Public URL prefix matching `root_dir`
    pub root_url: String,
    pub timeouts: TimeoutBudget,
    pub max_url_length: usize,
    pub max_download_bytes: u64,
    pub webp_quality: f32,
    pub widths: Vec<u32>,
}

impl MediaConfig {
    pub fn new(
        root_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
        root_url: impl Into<String>,
    ) -> Self {
        let root_url: String = root_url.into();
        Self {
            root_dir: root_dir.into(),
            temp_dir: temp_dir.into(),
            root_url: root_url.trim_end_matches('/').to_string(),
            timeouts: TimeoutBudget::default(),
            max_url_length: 5_000,
            max_download_bytes: 50 * 1024 * 1024,
            webp_quality: 80.0,
            widths: RENDITION_WIDTHS.to_vec(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutBudget) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_max_download_bytes(mut self, limit: u64) -> Self {
        self.max_download_bytes = limit;
        self
    }

    pub fn with_max_url_length(mut self, limit: usize) -> Self {
        self.max_url_length = limit;
        self
    }

    pub fn with_webp_quality(mut self, quality: f32) -> Self {
        self.webp_quality = quality;
        self
    }
}

/// A successful acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquired {
    /// Published directory holding one file per rendition width
    pub directory: PathBuf,
    /// Public URL of `directory`
    pub cached_location: String,
    /// Size of the downloaded source
    pub source_bytes: u64,
}

pub struct MediaPipeline {
    http: Arc<dyn HttpClient>,
    config: MediaConfig,
}

impl MediaPipeline {
    pub fn new(http: Arc<dyn HttpClient>, config: MediaConfig) -> Self {
        Self { http, config }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Public URL the renditions of `key` are served from
    pub fn cached_location(&self, key: &TokenKey) -> String {
        format!("{}/{}/{}", self.config.root_url, key.contract, key.token_id)
    }

    /// Published directory for `key`
    pub fn directory(&self, key: &TokenKey) -> PathBuf {
        self.config.root_dir.join(&key.contract).join(&key.token_id)
    }

    /// Per-attempt download file; unique even when two keys join to the same text
    fn temp_path(&self, key: &TokenKey) -> PathBuf {
        self.config.temp_dir.join(format!(
            "{}_{}.{}.download",
            key.contract,
            key.token_id,
            Uuid::new_v4()
        ))
    }

    /// Download, render and publish the media at `url` for `key`
    pub async fn acquire(&self, key: &TokenKey, url: &str) -> Result<Acquired> {
        if is_inline_payload(url) {
            debug!(key = %key, "Skipping inline payload");
            return Err(MediaError::InlinePayload);
        }
        check_url(url, self.config.max_url_length)?;
        check_key(key)?;

        let temp_path = self.temp_path(key);

        let result = self.fetch_and_publish(key, url, &temp_path).await;

        if let Err(e) = fs::remove_file(&temp_path).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %e, "Failed to remove temporary download");
            }
        }

        result
    }

    async fn fetch_and_publish(&self, key: &TokenKey, url: &str, temp_path: &Path) -> Result<Acquired> {
        let source_bytes = self.download(url, temp_path).await?;
        debug!(key = %key, bytes = source_bytes, "Downloaded source");

        let renditions = rendition::render_file(
            temp_path.to_path_buf(),
            self.config.widths.clone(),
            self.config.webp_quality,
        )
        .await?;

        let directory = self.publish(key, &renditions).await?;
        let cached_location = self.cached_location(key);

        info!(key = %key, location = %cached_location, "Published renditions");

        Ok(Acquired {
            directory,
            cached_location,
            source_bytes,
        })
    }

    /// Stream `url` into `dest`, returning the byte count
    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let budget = self.config.timeouts;
        let limit = self.config.max_download_bytes;
        let deadline = Instant::now() + budget.total();

        let transfer = async {
            let mut stream = timeout(budget.response(), self.http.download_stream(url))
                .await
                .map_err(|_| MediaError::Timeout(TimeoutPhase::Response))??;

            fs::create_dir_all(&self.config.temp_dir).await?;
            let mut file = fs::File::create(dest).await?;
            let mut buffer = vec![0u8; READ_CHUNK];
            let mut received: u64 = 0;

            loop {
                let read = timeout(budget.idle(), stream.read(&mut buffer))
                    .await
                    .map_err(|_| MediaError::Timeout(TimeoutPhase::Idle))??;
                if read == 0 {
                    break;
                }

                received += read as u64;
                if received > limit {
                    return Err(MediaError::TooLarge { limit });
                }
                file.write_all(&buffer[..read]).await?;
            }

            file.flush().await?;
            Ok::<u64, MediaError>(received)
        };

        timeout_at(deadline, transfer)
            .await
            .map_err(|_| MediaError::Timeout(TimeoutPhase::Total))?
    }

    /// Write renditions to a staging directory and swap it into place
    async fn publish(&self, key: &TokenKey, renditions: &[Rendition]) -> Result<PathBuf> {
        let parent = self.config.root_dir.join(&key.contract);
        fs::create_dir_all(&parent).await?;

        let target = parent.join(&key.token_id);
        let staging = parent.join(format!(".{}.{}.partial", key.token_id, Uuid::new_v4()));

        let result = async {
            fs::create_dir(&staging).await?;
            for rendition in renditions {
                fs::write(staging.join(rendition.file_name()), &rendition.data).await?;
            }

            match fs::remove_dir_all(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(MediaError::Io(e)),
            }
            fs::rename(&staging, &target).await?;
            Ok::<(), MediaError>(())
        }
        .await;

        if result.is_err() {
            if let Err(e) = fs::remove_dir_all(&staging).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
                }
            }
        }

        result.map(|()| target)
    }
}

fn base64_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(BASE64_PATTERN).ok()).as_ref()
}

/// `data:` URIs and long bare base64 strings
pub fn is_inline_payload(url: &str) -> bool {
    let trimmed = url.trim();
    if trimmed
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("data:"))
    {
        return true;
    }
    trimmed.len() > INLINE_PAYLOAD_MIN_LEN
        && base64_pattern().is_some_and(|pattern| pattern.is_match(trimmed))
}

fn check_url(url: &str, max_length: usize) -> Result<()> {
    let scheme_ok = url
        .split_once("://")
        .is_some_and(|(scheme, _)| scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"));

    if !scheme_ok || url.len() > max_length {
        return Err(MediaError::UnsupportedUrl(truncate(url, 120)));
    }
    Ok(())
}

fn check_key(key: &TokenKey) -> Result<()> {
    for part in [&key.contract, &key.token_id] {
        let unsafe_part = part.is_empty()
            || part == "."
            || part == ".."
            || part.contains(['/', '\\', '\0']);
        if unsafe_part {
            return Err(MediaError::UnsafeKey(key.to_string()));
        }
    }
    Ok(())
}

fn truncate(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}
