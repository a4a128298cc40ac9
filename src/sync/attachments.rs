use crate::transform::sanitize::truncate_bytes;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_PARALLEL_DOWNLOADS: usize = 4;
const MAX_ATTACHMENT_NAME_BYTES: usize = 200;

const UPSTREAM_HOSTS: [&str; 3] = ["notion-static.com", "notion.so", "notion.site"];

const FILE_HOSTS: [&str; 7] = [
    "dropboxusercontent.com",
    "googleusercontent.com",
    "githubusercontent.com",
    "i.imgur.com",
    "images.unsplash.com",
    "res.cloudinary.com",
    "cdn.discordapp.com",
];

const MEDIA_EXTENSIONS: [&str; 28] = [
    "png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "tiff", "heic", "avif", "mp4", "mov",
    "webm", "mkv", "avi", "mp3", "wav", "ogg", "m4a", "flac", "pdf", "doc", "docx", "xls",
    "xlsx", "ppt", "pptx", "zip",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Pdf,
    File,
}

impl AttachmentKind {
    fn default_extension(&self) -> &'static str {
        match self {
            AttachmentKind::Image => ".png",
            AttachmentKind::Video => ".mp4",
            AttachmentKind::Audio => ".mp3",
            AttachmentKind::Pdf => ".pdf",
            AttachmentKind::File => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStatus {
    New,
    Known,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteOutcome {
    /// The URL will be materialized at `local_path` (vault-relative).
    Local {
        local_path: String,
        status: NoteStatus,
    },
    /// Not something we download; keep the remote URL.
    Ineligible,
}

/// Downloads attachment bodies.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AttachmentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Other(format!("download of {} failed: HTTP {}", url, status)));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug)]
struct Pending {
    local_path: String,
    referenced_by: Vec<String>,
    expiry_hint: Option<DateTime<Utc>>,
    fetched: bool,
}

/// A downloaded attachment ready to hand to the vault writer.
#[derive(Debug, Clone)]
pub struct MaterializedAttachment {
    pub source_url: String,
    pub local_path: String,
    pub referenced_by: Vec<String>,
    pub bytes: Vec<u8>,
    pub content_hash: String,
    pub size_bytes: u64,
    pub expiry_hint: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AttachmentFailure {
    pub source_url: String,
    pub local_path: String,
    /// Pages whose markdown points at the missing file.
    pub referenced_by: Vec<String>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub materialized: Vec<MaterializedAttachment>,
    pub failures: Vec<AttachmentFailure>,
}

/// Collects attachment URLs during translation and fetches each one once.
pub struct AttachmentCollector {
    folder: String,
    dry_run: bool,
    fetcher: Arc<dyn AttachmentFetcher>,
    pending: Mutex<BTreeMap<String, Pending>>,
}

impl AttachmentCollector {
    pub fn new(folder: &str, dry_run: bool, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        Self {
            folder: folder.trim_matches('/').to_string(),
            dry_run,
            fetcher,
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records the URL if unseen and returns where it will live. No I/O.
    pub fn note(
        &self,
        url: &str,
        kind: AttachmentKind,
        referenced_by: &str,
        expiry_hint: Option<DateTime<Utc>>,
    ) -> NoteOutcome {
        if url.is_empty() || !is_eligible(url) {
            return NoteOutcome::Ineligible;
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = pending.get_mut(url) {
            if !existing.referenced_by.iter().any(|id| id == referenced_by) {
                existing.referenced_by.push(referenced_by.to_string());
            }
            return NoteOutcome::Local {
                local_path: existing.local_path.clone(),
                status: NoteStatus::Known,
            };
        }

        let local_path = format!("{}/{}", self.folder, attachment_filename(url, kind));
        pending.insert(
            url.to_string(),
            Pending {
                local_path: local_path.clone(),
                referenced_by: vec![referenced_by.to_string()],
                expiry_hint,
                fetched: false,
            },
        );
        NoteOutcome::Local {
            local_path,
            status: NoteStatus::New,
        }
    }

    /// Whether any noted URL was referenced from `page_id`.
    pub fn has_links_from(&self, page_id: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|p| p.referenced_by.iter().any(|id| id == page_id))
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Downloads every noted URL that has not been fetched yet. Failures are
    /// reported, never fatal. A no-op in dry-run mode.
    pub async fn materialize_all(&self, cancel: &CancellationToken) -> MaterializeReport {
        if self.dry_run {
            debug!("[dry-run] skipping {} attachment downloads", self.len());
            return MaterializeReport::default();
        }

        let batch: Vec<(String, String, Vec<String>, Option<DateTime<Utc>>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending
                .iter_mut()
                .filter(|(_, p)| !p.fetched)
                .map(|(url, p)| {
                    p.fetched = true;
                    (
                        url.clone(),
                        p.local_path.clone(),
                        p.referenced_by.clone(),
                        p.expiry_hint,
                    )
                })
                .collect()
        };

        if batch.is_empty() {
            return MaterializeReport::default();
        }
        info!("Downloading {} attachments", batch.len());

        let fetcher = &self.fetcher;
        let results: Vec<_> = stream::iter(batch)
            .map(|(url, local_path, referenced_by, expiry_hint)| async move {
                let outcome = if cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        body = fetcher.fetch(&url) => body,
                    }
                };
                (url, local_path, referenced_by, expiry_hint, outcome)
            })
            .buffer_unordered(MAX_PARALLEL_DOWNLOADS)
            .collect()
            .await;

        let mut report = MaterializeReport::default();
        for (url, local_path, referenced_by, expiry_hint, outcome) in results {
            match outcome {
                Ok(bytes) => {
                    let content_hash = hex::encode(Sha256::digest(&bytes));
                    report.materialized.push(MaterializedAttachment {
                        size_bytes: bytes.len() as u64,
                        source_url: url,
                        local_path,
                        referenced_by,
                        bytes,
                        content_hash,
                        expiry_hint,
                    });
                }
                Err(e) => {
                    warn!("Failed to download attachment {}: {}", url, e);
                    report.failures.push(AttachmentFailure {
                        source_url: url,
                        local_path,
                        referenced_by,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

fn host_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Files served from the workspace's own storage.
pub fn is_upstream_hosted(url: &str) -> bool {
    let Some(host) = host_of(url) else {
        return false;
    };
    UPSTREAM_HOSTS.iter().any(|h| host.contains(h))
        || (host.ends_with("amazonaws.com")
            && (host.starts_with("prod-files-secure") || url.contains("secure.notion")))
}

fn extension_of(name: &str) -> Option<&str> {
    let (_, ext) = name.rsplit_once('.')?;
    let valid = !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(ext)
}

fn last_path_segment(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or_default();
    urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string())
}

pub fn is_eligible(url: &str) -> bool {
    if is_upstream_hosted(url) {
        return true;
    }
    let Some(host) = host_of(url) else {
        return false;
    };
    if FILE_HOSTS.iter().any(|h| host.ends_with(h)) {
        return true;
    }
    extension_of(&last_path_segment(url))
        .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `{12 hex of sha256(url)}_{basename}[_{4 hex}]{ext}`, at most 200 bytes.
pub fn attachment_filename(url: &str, kind: AttachmentKind) -> String {
    let url_hash = hex::encode(Sha256::digest(url.as_bytes()));
    let prefix = &url_hash[..12];

    let basename = last_path_segment(url);
    let (stem, ext) = match extension_of(&basename) {
        Some(ext) => (
            &basename[..basename.len() - ext.len() - 1],
            format!(".{}", ext),
        ),
        None => (basename.as_str(), kind.default_extension().to_string()),
    };

    let stem: String = stem
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\n' | '\r' | '\t' => '_',
            other => other,
        })
        .collect();
    let stem = stem.trim();
    let stem = if stem.is_empty() { "file" } else { stem };

    // Signed upstream URLs change on every fetch; the object path does not.
    let disambiguator = if is_upstream_hosted(url) {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        format!("_{}", &hex::encode(Sha256::digest(path.as_bytes()))[..4])
    } else {
        String::new()
    };

    let budget = MAX_ATTACHMENT_NAME_BYTES
        .saturating_sub(prefix.len() + 1 + disambiguator.len() + ext.len());
    let stem = truncate_bytes(stem, budget);

    format!("{}_{}{}{}", prefix, stem, disambiguator, ext)
}
