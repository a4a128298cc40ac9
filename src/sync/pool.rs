use crate::clients::types::{Block, Page};
use crate::clients::RateLimitedClient;
use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::debug;

pub const DEFAULT_WORKERS: usize = 5;

/// One id's outcome. Results arrive in completion order, not submission order.
#[derive(Debug)]
pub struct FetchResult<T> {
    pub id: String,
    pub result: Result<T>,
}

pub type BlockFetchResult = FetchResult<Vec<Block>>;
pub type PageFetchResult = FetchResult<(Page, Vec<Block>)>;

type StartHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Bounded fan-out over the API adapter.
///
/// Clones share one semaphore, so overlapping batches from different walkers
/// never exceed the configured width together.
#[derive(Clone)]
pub struct FetchPool {
    api: Arc<RateLimitedClient>,
    workers: usize,
    permits: Arc<Semaphore>,
    on_start: Option<StartHook>,
}

impl FetchPool {
    pub fn new(api: Arc<RateLimitedClient>, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            api,
            workers,
            permits: Arc::new(Semaphore::new(workers)),
            on_start: None,
        }
    }

    /// Called with each id as a worker actually begins on it.
    pub fn with_on_start(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn api(&self) -> &Arc<RateLimitedClient> {
        &self.api
    }

    /// Expanded block tree for each id.
    pub fn fetch_blocks(&self, ids: Vec<String>) -> mpsc::Receiver<BlockFetchResult> {
        self.run(ids, |api, id| async move { api.get_block_tree(&id).await })
    }

    /// Page metadata followed by its expanded block tree, for each id.
    pub fn fetch_pages_with_blocks(&self, ids: Vec<String>) -> mpsc::Receiver<PageFetchResult> {
        self.run(ids, |api, id| async move {
            let page = api.get_page(&id).await?;
            let blocks = api.get_block_tree(&id).await?;
            Ok((page, blocks))
        })
    }

    fn run<T, F, Fut>(&self, ids: Vec<String>, fetch: F) -> mpsc::Receiver<FetchResult<T>>
    where
        T: Send + 'static,
        F: Fn(Arc<RateLimitedClient>, String) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let capacity = ids.len().max(1);
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let workers = self.workers.min(ids.len());

        // The queue holds every id up front, then the producer hangs up.
        let (work_tx, work_rx) = mpsc::channel(capacity);
        for id in ids {
            if work_tx.try_send(id).is_err() {
                break;
            }
        }
        drop(work_tx);
        let queue = Arc::new(Mutex::new(work_rx));

        debug!("Fetch pool starting {} workers", workers);
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let out_tx = out_tx.clone();
            let api = Arc::clone(&self.api);
            let permits = Arc::clone(&self.permits);
            let on_start = self.on_start.clone();
            let fetch = fetch.clone();
            let cancel = self.api.cancel_token().clone();

            tokio::spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().await.recv().await;
                    let Some(id) = next else {
                        break;
                    };

                    let permit = tokio::select! {
                        _ = cancel.cancelled() => break,
                        permit = Arc::clone(&permits).acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => break,
                        },
                    };

                    if let Some(hook) = &on_start {
                        hook(&id);
                    }
                    let result = tokio::select! {
                        _ = cancel.cancelled() => Err(Error::Cancelled),
                        result = fetch(Arc::clone(&api), id.clone()) => result,
                    };
                    drop(permit);

                    if out_tx.send(FetchResult { id, result }).await.is_err() {
                        break;
                    }
                }
            });
        }

        out_rx
    }
}
