use super::api::{ApiError, ApiResult, NotionApi};
use super::types::{
    Block, BlockKind, Database, Page, PaginatedList, SearchFilter, SearchResult, User,
};
use crate::{Error, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Notion documents an average of three requests per second.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 3;
pub const DEFAULT_BURST: u32 = 10;

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const THROTTLE_STREAK_WINDOW: Duration = Duration::from_secs(30);
const THROTTLE_RESET_AFTER: Duration = Duration::from_secs(10);
const MAX_THROTTLE_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Page,
    Database,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Page => "page",
            ResourceKind::Database => "database",
        }
    }
}

/// Result of probing an id.
#[derive(Debug, Clone)]
pub struct DetectedResource {
    pub id: String,
    pub kind: ResourceKind,
    pub title: String,
}

#[derive(Debug, Default)]
struct ThrottleState {
    until: Option<Instant>,
    streak: u32,
    last_throttle: Option<Instant>,
}

impl ThrottleState {
    /// Extends the shared window. Throttles that arrive in quick succession
    /// double the wait, up to 8x and never beyond [`MAX_BACKOFF`].
    fn register(&mut self, hint: Option<Duration>, now: Instant) -> Duration {
        let hint = hint
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_RETRY_AFTER);

        self.streak = match self.last_throttle {
            Some(last) if now.duration_since(last) < THROTTLE_STREAK_WINDOW => {
                self.streak.saturating_add(1)
            }
            _ => 1,
        };
        self.last_throttle = Some(now);

        let multiplier = 1u32 << (self.streak - 1).min(3);
        let wait = hint.saturating_mul(multiplier).min(MAX_BACKOFF);

        let candidate = now + wait;
        self.until = Some(match self.until {
            Some(existing) if existing > candidate => existing,
            _ => candidate,
        });
        wait
    }

    fn settle(&mut self, now: Instant) {
        if let Some(last) = self.last_throttle {
            if now.duration_since(last) >= THROTTLE_RESET_AFTER {
                self.streak = 0;
                self.last_throttle = None;
            }
        }
    }
}

/// Wraps a [`NotionApi`] with proactive pacing, a backoff window shared by
/// every caller, transparent pagination and kind detection.
pub struct RateLimitedClient {
    inner: Arc<dyn NotionApi>,
    limiter: GovernorRateLimiter,
    throttle: Mutex<ThrottleState>,
    cancel: CancellationToken,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn NotionApi>, cancel: CancellationToken) -> Self {
        Self::with_quota(inner, cancel, DEFAULT_REQUESTS_PER_SECOND, DEFAULT_BURST)
    }

    pub fn with_quota(
        inner: Arc<dyn NotionApi>,
        cancel: CancellationToken,
        requests_per_second: u32,
        burst: u32,
    ) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rps);
        let limiter = RateLimiter::direct(Quota::per_second(rps).allow_burst(burst));

        Self {
            inner,
            limiter,
            throttle: Mutex::new(ThrottleState::default()),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn backoff_deadline(&self) -> Option<Instant> {
        let mut state = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        state.settle(now);
        state.until.filter(|until| *until > now)
    }

    /// Blocks until the shared window has passed and the limiter admits a request.
    async fn wait_turn(&self) -> Result<()> {
        while let Some(until) = self.backoff_deadline() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(until) => {}
            }
        }

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = self.limiter.until_ready() => Ok(()),
        }
    }

    /// Runs `op`, retrying while upstream answers with a throttle.
    async fn call<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempts = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.wait_turn().await?;

            match op().await {
                Err(ApiError::RateLimited { retry_after }) if attempts < MAX_THROTTLE_RETRIES => {
                    attempts += 1;
                    let wait = {
                        let mut state = self.throttle.lock().unwrap_or_else(|e| e.into_inner());
                        state.register(retry_after, Instant::now())
                    };
                    warn!(
                        request = what,
                        attempt = attempts,
                        "Notion API throttled, backing off for {:?}",
                        wait
                    );
                }
                Err(e) => return Err(e.into()),
                Ok(value) => return Ok(value),
            }
        }
    }

    /// Follows `next_cursor` until `has_more` is false or the cursor repeats.
    async fn paginate<T, F, Fut>(&self, what: &str, mut fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = ApiResult<PaginatedList<T>>>,
    {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.call(what, || fetch(cursor.clone())).await?;
            items.extend(page.results);
            match page.next_cursor {
                Some(next) if page.has_more => {
                    if cursor.as_deref() == Some(next.as_str()) {
                        warn!(
                            request = what,
                            cursor = %next,
                            "Cursor repeated, stopping pagination"
                        );
                        break;
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(items)
    }

    pub async fn get_current_user(&self) -> Result<User> {
        self.call("users/me", || self.inner.get_current_user()).await
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Page> {
        self.call("pages", || self.inner.get_page(page_id)).await
    }

    pub async fn get_database(&self, database_id: &str) -> Result<Database> {
        self.call("databases", || self.inner.get_database(database_id))
            .await
    }

    pub async fn query_database(&self, database_id: &str) -> Result<Vec<Page>> {
        let inner = &self.inner;
        self.paginate("databases/query", |cursor| async move {
            inner.query_database(database_id, cursor.as_deref()).await
        })
        .await
    }

    pub async fn get_block_children(&self, block_id: &str) -> Result<Vec<Block>> {
        let inner = &self.inner;
        self.paginate("blocks/children", |cursor| async move {
            inner.get_block_children(block_id, cursor.as_deref()).await
        })
        .await
    }

    pub async fn search(&self, filter: SearchFilter) -> Result<Vec<SearchResult>> {
        let inner = &self.inner;
        self.paginate("search", |cursor| async move {
            inner.search(filter, cursor.as_deref()).await
        })
        .await
    }

    /// Block children with nested children expanded, so translation never has
    /// to go back to the network. Child pages and databases stay collapsed;
    /// synced-block references resolve to the original block's children.
    pub async fn get_block_tree(&self, block_id: &str) -> Result<Vec<Block>> {
        let mut roots = self.get_block_children(block_id).await?;

        // Depth-first over an explicit stack of paths into `roots`.
        let mut pending: Vec<Vec<usize>> = (0..roots.len()).rev().map(|i| vec![i]).collect();
        while let Some(path) = pending.pop() {
            let Some(block) = block_at(&mut roots, &path) else {
                continue;
            };

            let source = match &block.kind {
                BlockKind::SyncedBlock { synced_block } => synced_block
                    .synced_from
                    .as_ref()
                    .map(|from| from.block_id.clone()),
                _ => None,
            };
            let expand_from = match source {
                Some(source) => Some(source),
                None if block.has_children && !block.is_page_reference() => {
                    Some(block.id.clone())
                }
                None => None,
            };
            let Some(expand_from) = expand_from else {
                continue;
            };

            let children = self.get_block_children(&expand_from).await?;
            let count = children.len();
            if let Some(block) = block_at(&mut roots, &path) {
                block.children = children;
                block.has_children = count > 0;
            }
            for i in (0..count).rev() {
                let mut child_path = path.clone();
                child_path.push(i);
                pending.push(child_path);
            }
        }

        Ok(roots)
    }

    /// Probes the id as a page first, then as a database.
    pub async fn detect_resource_type(&self, id: &str) -> Result<DetectedResource> {
        match self.get_page(id).await {
            Ok(page) => {
                return Ok(DetectedResource {
                    id: page.id.clone(),
                    kind: ResourceKind::Page,
                    title: page.title(),
                })
            }
            Err(e) if e.is_not_found_or_wrong_kind() => {
                debug!("{} is not a page ({}), probing as database", id, e);
            }
            Err(e) => return Err(e),
        }

        match self.get_database(id).await {
            Ok(database) => Ok(DetectedResource {
                id: database.id.clone(),
                kind: ResourceKind::Database,
                title: database.title(),
            }),
            Err(e) if e.is_not_found_or_wrong_kind() => {
                Err(Error::NotFoundOrNotShared(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Every page and database shared with the integration whose parent is
    /// the workspace itself.
    pub async fn discover_workspace_roots(&self) -> Result<Vec<DetectedResource>> {
        let mut roots = Vec::new();

        for filter in [SearchFilter::Page, SearchFilter::Database] {
            for result in self.search(filter).await? {
                match result {
                    SearchResult::Page(page) if page.parent.is_workspace() => {
                        roots.push(DetectedResource {
                            title: page.title(),
                            id: page.id,
                            kind: ResourceKind::Page,
                        });
                    }
                    SearchResult::Database(db) if db.parent.is_workspace() => {
                        roots.push(DetectedResource {
                            title: db.title(),
                            id: db.id,
                            kind: ResourceKind::Database,
                        });
                    }
                    _ => {}
                }
            }
        }

        info!("Discovered {} workspace roots", roots.len());
        Ok(roots)
    }
}

fn block_at<'a>(roots: &'a mut [Block], path: &[usize]) -> Option<&'a mut Block> {
    let (first, rest) = path.split_first()?;
    let mut block = roots.get_mut(*first)?;
    for index in rest {
        block = block.children.get_mut(*index)?;
    }
    Some(block)
}
