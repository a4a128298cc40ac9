use super::attachments::{AttachmentCollector, AttachmentFetcher, HttpFetcher};
use super::pool::FetchPool;
use super::{walk_database, walk_page, HeldDocument, WalkContext, WalkStats};
use crate::clients::{
    ids_equal, parse_notion_url, DetectedResource, NotionApi, NotionClient, RateLimitedClient,
    ResourceKind,
};
use crate::config::AppConfig;
use crate::progress::ProgressHandle;
use crate::state::SyncState;
use crate::transform::{DateFormatter, MarkdownTranslator};
use crate::vault::{FsVaultWriter, VaultWriter};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    /// Ignore the saved state and rewrite everything.
    pub force: bool,
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub pages_written: usize,
    pub entries_written: usize,
    pub skipped: usize,
    pub failed_items: usize,
    pub attachments_written: usize,
    pub attachment_failures: usize,
    pub roots_processed: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn absorb(&mut self, stats: WalkStats) {
        self.pages_written += stats.pages_written;
        self.entries_written += stats.entries_written;
        self.skipped += stats.skipped;
        self.failed_items += stats.failed;
    }
}

/// A root as configured or as found by workspace discovery.
#[derive(Debug, Clone)]
enum RootSource {
    Configured { url: String, name: Option<String> },
    Discovered(DetectedResource),
}

pub struct SyncOrchestrator {
    config: AppConfig,
    options: SyncOptions,
    api: Arc<RateLimitedClient>,
    writer: Arc<dyn VaultWriter>,
    fetcher: Arc<dyn AttachmentFetcher>,
    progress: ProgressHandle,
}

impl SyncOrchestrator {
    /// Wires the HTTP client, filesystem writer and downloader from config.
    pub fn new(
        config: AppConfig,
        options: SyncOptions,
        progress: ProgressHandle,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let client: Arc<dyn NotionApi> = Arc::new(NotionClient::new(&config.notion_token)?);
        let api = Arc::new(RateLimitedClient::new(client, cancel));
        let writer = Arc::new(FsVaultWriter::new(config.vault_path(), options.dry_run));
        let fetcher = Arc::new(HttpFetcher::new()?);

        Ok(Self::with_components(
            config, options, api, writer, fetcher, progress,
        ))
    }

    /// Cancellation follows the adapter's token.
    pub fn with_components(
        config: AppConfig,
        options: SyncOptions,
        api: Arc<RateLimitedClient>,
        writer: Arc<dyn VaultWriter>,
        fetcher: Arc<dyn AttachmentFetcher>,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            config,
            options,
            api,
            writer,
            fetcher,
            progress,
        }
    }

    fn cancel(&self) -> &CancellationToken {
        self.api.cancel_token()
    }

    /// Runs one sync pass. Start-up failures are returned as `Err`, except
    /// cancellation, which yields a cancelled report. Anything after start-up
    /// is collected into the report.
    pub async fn run(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();

        let (mut state, roots) = match self.start_up(&mut report).await {
            Ok(ready) => ready,
            Err(e) if e.is_cancelled() => {
                warn!("Sync cancelled during start-up");
                self.progress.finish(None).await;
                report.cancelled = true;
                report.duration = started.elapsed();
                return Ok(report);
            }
            Err(e) => {
                self.progress.finish(Some(e.to_string())).await;
                return Err(e);
            }
        };

        let collector = self.config.download_attachments().then(|| {
            Arc::new(AttachmentCollector::new(
                self.config.attachment_folder(),
                self.options.dry_run,
                Arc::clone(&self.fetcher),
            ))
        });
        let progress = self.progress.clone();
        let ctx = WalkContext::new(
            Arc::clone(&self.api),
            FetchPool::new(Arc::clone(&self.api), self.config.concurrency())
                .with_on_start(move |id| progress.syncing(id)),
            Arc::clone(&self.writer),
            MarkdownTranslator::new(
                DateFormatter::new(self.config.date_settings()),
                collector.clone(),
            ),
            self.progress.clone(),
        );

        info!("Syncing {} roots", roots.len());
        for root in &roots {
            if self.cancel().is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.sync_root(&ctx, &mut state, root).await {
                Ok(stats) => {
                    report.absorb(stats);
                    report.roots_processed += 1;
                }
                Err(e) if e.is_cancelled() || self.cancel().is_cancelled() => {
                    report.cancelled = true;
                    break;
                }
                Err(e) => {
                    // Continue with other roots even if one fails
                    report.errors.push(e.to_string());
                }
            }
        }
        if report.cancelled {
            warn!("Sync cancelled, saving partial progress");
        }

        let held = ctx.take_held();
        self.shut_down(&mut state, collector.as_deref(), held, &mut report)
            .await;

        report.duration = started.elapsed();
        info!(
            "Sync finished in {:.1?}: {} pages, {} entries, {} unchanged, {} attachments, {} errors",
            report.duration,
            report.pages_written,
            report.entries_written,
            report.skipped,
            report.attachments_written,
            report.errors.len()
        );
        Ok(report)
    }

    async fn start_up(&self, report: &mut SyncReport) -> Result<(SyncState, Vec<RootSource>)> {
        let fingerprint = self.config.fingerprint();
        let mut state = if self.options.force {
            info!("Force mode: ignoring saved state");
            SyncState::new()
        } else {
            SyncState::load(self.config.state_path())?
        };

        if state.config_hash.is_empty() {
            state.update_config_hash(&fingerprint);
        } else if state.check_config_changed(&fingerprint) {
            state.invalidate_for_config_change(&fingerprint);
        }

        match self.api.get_current_user().await {
            Ok(user) => info!(
                "✅ Connected to Notion as: {}",
                user.name.as_deref().unwrap_or("integration")
            ),
            Err(Error::Api(api)) if api.is_unauthorized() => {
                error!("❌ Notion rejected the token: {}", api);
                return Err(Error::Authentication);
            }
            Err(e) => {
                error!("❌ Failed to connect to Notion: {}", e);
                return Err(e);
            }
        }

        let mut roots: Vec<RootSource> = self
            .config
            .sync
            .roots
            .iter()
            .map(|root| RootSource::Configured {
                url: root.url.clone(),
                name: root.name.clone().filter(|n| !n.trim().is_empty()),
            })
            .collect();

        if self.config.sync.discover_workspace_roots {
            match self.api.discover_workspace_roots().await {
                Ok(found) => {
                    let configured: Vec<String> = roots
                        .iter()
                        .filter_map(|r| match r {
                            RootSource::Configured { url, .. } => {
                                parse_notion_url(url).ok().map(|p| p.id)
                            }
                            RootSource::Discovered(_) => None,
                        })
                        .collect();
                    let before = roots.len();
                    roots.extend(
                        found
                            .into_iter()
                            .filter(|d| !configured.iter().any(|id| ids_equal(id, &d.id)))
                            .map(RootSource::Discovered),
                    );
                    info!("Discovered {} workspace roots", roots.len() - before);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    error!("❌ Workspace discovery failed: {}", e);
                    report.errors.push(format!("workspace discovery: {}", e));
                }
            }
        }

        Ok((state, roots))
    }

    async fn sync_root(
        &self,
        ctx: &WalkContext,
        state: &mut SyncState,
        root: &RootSource,
    ) -> Result<WalkStats> {
        let (detected, name) = match root {
            RootSource::Configured { url, name } => {
                let parsed = match parse_notion_url(url) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        error!("❌ Invalid root {}: {}", url, e);
                        self.progress.add_root(url, name.as_deref().unwrap_or(url));
                        self.progress.error(url, e.to_string());
                        return Err(e);
                    }
                };
                let label = name
                    .clone()
                    .unwrap_or_else(|| format!("{}...", parsed.id.get(..8).unwrap_or(&parsed.id)));
                self.progress.add_root(&parsed.id, &label);

                match self.api.detect_resource_type(&parsed.id).await {
                    Ok(detected) => (detected, name.clone().unwrap_or(label)),
                    Err(e) => {
                        error!("❌ Failed to sync root {}: {}", label, e);
                        self.progress.error(&parsed.id, e.to_string());
                        return Err(Error::Sync(format!("{}: {}", label, e)));
                    }
                }
            }
            RootSource::Discovered(detected) => {
                self.progress.add_root(&detected.id, &detected.title);
                (detected.clone(), detected.title.clone())
            }
        };

        debug!("Root {} is a {}", detected.id, detected.kind.as_str());
        let outcome = match detected.kind {
            ResourceKind::Page => walk_page(ctx, state, &detected.id).await,
            ResourceKind::Database => walk_database(ctx, state, &detected.id, Some(&name)).await,
        };

        match outcome {
            Ok(stats) => {
                info!(
                    "✅ Synced {} '{}' ({} written, {} unchanged)",
                    detected.kind.as_str(),
                    name,
                    stats.pages_written + stats.entries_written,
                    stats.skipped
                );
                Ok(stats)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                error!("❌ Failed to sync root {}: {}", name, e);
                self.progress.error(&detected.id, e.to_string());
                Err(Error::Sync(format!("{}: {}", name, e)))
            }
        }
    }

    /// Attachments, then held documents, then state, then the progress sink.
    /// Runs after every successful start-up, including cancelled runs.
    async fn shut_down(
        &self,
        state: &mut SyncState,
        collector: Option<&AttachmentCollector>,
        mut held: Vec<HeldDocument>,
        report: &mut SyncReport,
    ) {
        let mut missing: Vec<(String, String)> = Vec::new();
        let mut retry: Vec<String> = Vec::new();

        if let Some(collector) = collector {
            let downloads = collector.materialize_all(self.cancel()).await;

            for item in downloads.materialized {
                let needs_write = state.attachment_needs_write(
                    &item.source_url,
                    &item.content_hash,
                    &item.local_path,
                );
                if needs_write {
                    if let Err(e) = self.writer.write(&item.local_path, item.bytes).await {
                        warn!("Failed to write attachment {}: {}", item.local_path, e);
                        report.attachment_failures += 1;
                        missing.push((item.local_path, item.source_url));
                        retry.extend(item.referenced_by);
                        continue;
                    }
                    report.attachments_written += 1;
                }
                state.update_attachment_state(
                    &item.source_url,
                    &item.content_hash,
                    &item.local_path,
                    item.size_bytes,
                    item.expiry_hint,
                );
            }

            for failure in downloads.failures {
                report.attachment_failures += 1;
                missing.push((failure.local_path, failure.source_url));
                retry.extend(failure.referenced_by);
            }
        }

        // Links to files that never landed keep their remote URL.
        for doc in &mut held {
            for (local_path, source_url) in &missing {
                doc.restore_link(local_path, source_url);
            }
        }
        for doc in held {
            if let Err(e) = self.writer.write(&doc.rel_path, doc.content.into_bytes()).await {
                warn!("Failed to write {}: {}", doc.rel_path, e);
                report.failed_items += 1;
                self.progress.error(&doc.id, e.to_string());
                retry.push(doc.id);
            }
        }

        // Pages pointing at a missing file are retried on the next run.
        for id in &retry {
            if state.invalidate(id) {
                debug!("Will retry {} on the next run", id);
            }
        }

        if self.options.dry_run {
            info!("[dry-run] state not saved");
        } else {
            state.mark_synced();
            if let Err(e) = state.save(self.config.state_path()) {
                error!("❌ Failed to save state: {}", e);
                if report.errors.is_empty() {
                    report.errors.push(format!("saving state: {}", e));
                }
            }
        }

        self.progress.finish(report.errors.first().cloned()).await;
    }
}
