#![allow(dead_code)]

use async_trait::async_trait;
use notion_vault::clients::api::{ApiError, ApiResult, NotionApi};
use notion_vault::clients::normalize_id;
use notion_vault::clients::types::{
    Block, BlockKind, ChildTitle, Database, ExternalRef, MediaBlock, Page, PaginatedList,
    RichText, SearchFilter, SearchResult, TextBlock, User,
};
use notion_vault::clients::RateLimitedClient;
use notion_vault::config::{AppConfig, OutputConfig, RootConfig, StateConfig, SyncConfig};
use notion_vault::progress::ProgressHandle;
use notion_vault::sync::{AttachmentFetcher, SyncOptions, SyncOrchestrator};
use notion_vault::vault::MemoryVaultWriter;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const EDITED: &str = "2024-06-01T10:00:00Z";

/// In-memory workspace. Lookups normalize ids the way the real API accepts
/// both dashed and undashed forms.
#[derive(Default)]
pub struct FakeNotion {
    pub pages: HashMap<String, Page>,
    pub databases: HashMap<String, Database>,
    pub children: HashMap<String, Vec<Block>>,
    pub entries: HashMap<String, Vec<Page>>,
    pub failing: HashSet<String>,
    pub top_level: Vec<SearchResult>,
    pub calls: AtomicUsize,
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        code: "object_not_found".into(),
        message: "Could not find object".into(),
    }
}

fn server_error() -> ApiError {
    ApiError::Status {
        status: 500,
        code: "internal_server_error".into(),
        message: "boom".into(),
    }
}

impl FakeNotion {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, id: &str) -> ApiResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id = normalize_id(id);
        if self.failing.contains(&id) {
            return Err(server_error());
        }
        Ok(id)
    }

    pub fn add_page(&mut self, id: &str, title: &str, edited: &str, body: Vec<Block>) {
        let id = normalize_id(id);
        let parent = json!({"type": "workspace", "workspace": true});
        self.pages.insert(id.clone(), page(&id, title, edited, parent));
        self.children.insert(id, body);
    }

    pub fn add_database(&mut self, id: &str, title: &str, entries: Vec<Page>) {
        let id = normalize_id(id);
        let database = serde_json::from_value(json!({
            "id": id,
            "title": [{"type": "text", "plain_text": title}],
            "last_edited_time": EDITED,
            "parent": {"type": "workspace", "workspace": true},
            "properties": {
                "Name": {"id": "title", "name": "Name", "type": "title"},
                "Status": {"id": "s", "name": "Status", "type": "select"}
            }
        }))
        .unwrap();
        self.databases.insert(id.clone(), database);
        self.entries.insert(id, entries);
    }

    pub fn fail(&mut self, id: &str) {
        self.failing.insert(normalize_id(id));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn page(id: &str, title: &str, edited: &str, parent: serde_json::Value) -> Page {
    serde_json::from_value(json!({
        "id": id,
        "last_edited_time": edited,
        "parent": parent,
        "properties": {
            "title": {"type": "title", "title": [{"type": "text", "plain_text": title}]}
        }
    }))
    .unwrap()
}

pub fn entry(id: &str, database_id: &str, title: &str, status: &str) -> Page {
    serde_json::from_value(json!({
        "id": normalize_id(id),
        "last_edited_time": EDITED,
        "parent": {"type": "database_id", "database_id": database_id},
        "properties": {
            "Name": {"type": "title", "title": [{"type": "text", "plain_text": title}]},
            "Status": {"type": "select", "select": {"name": status}}
        }
    }))
    .unwrap()
}

pub fn paragraph(id: &str, text: &str) -> Block {
    Block::new(
        id,
        BlockKind::Paragraph {
            paragraph: TextBlock {
                rich_text: vec![RichText::plain(text)],
                color: None,
            },
        },
    )
}

pub fn child_page(id: &str, title: &str) -> Block {
    Block::new(
        normalize_id(id),
        BlockKind::ChildPage {
            child_page: ChildTitle {
                title: title.into(),
            },
        },
    )
}

pub fn image(id: &str, url: &str) -> Block {
    Block::new(
        id,
        BlockKind::Image {
            image: MediaBlock {
                file: None,
                external: Some(ExternalRef { url: url.into() }),
                caption: Vec::new(),
                name: None,
            },
        },
    )
}

#[async_trait]
impl NotionApi for FakeNotion {
    async fn get_current_user(&self) -> ApiResult<User> {
        Ok(User {
            id: "bot".into(),
            name: Some("Test Integration".into()),
            kind: Some("bot".into()),
        })
    }

    async fn get_page(&self, id: &str) -> ApiResult<Page> {
        let id = self.check(id)?;
        self.pages.get(&id).cloned().ok_or_else(not_found)
    }

    async fn get_database(&self, id: &str) -> ApiResult<Database> {
        let id = self.check(id)?;
        self.databases.get(&id).cloned().ok_or_else(not_found)
    }

    async fn query_database(&self, id: &str, _: Option<&str>) -> ApiResult<PaginatedList<Page>> {
        let id = self.check(id)?;
        match self.entries.get(&id) {
            Some(entries) => Ok(PaginatedList::single(entries.clone())),
            None => Err(not_found()),
        }
    }

    async fn get_block_children(
        &self,
        id: &str,
        _: Option<&str>,
    ) -> ApiResult<PaginatedList<Block>> {
        let id = self.check(id)?;
        Ok(PaginatedList::single(
            self.children.get(&id).cloned().unwrap_or_default(),
        ))
    }

    async fn search(
        &self,
        filter: SearchFilter,
        _: Option<&str>,
    ) -> ApiResult<PaginatedList<SearchResult>> {
        let matching = self
            .top_level
            .iter()
            .filter(|r| {
                matches!(
                    (r, filter),
                    (SearchResult::Page(_), SearchFilter::Page)
                        | (SearchResult::Database(_), SearchFilter::Database)
                )
            })
            .cloned()
            .collect();
        Ok(PaginatedList::single(matching))
    }
}

/// Attachment downloads that always succeed with a fixed body.
pub struct StaticFetcher;

#[async_trait]
impl AttachmentFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> notion_vault::Result<Vec<u8>> {
        Ok(b"bytes".to_vec())
    }
}

/// Counts downloads; every one succeeds.
#[derive(Default)]
pub struct CountingFetcher {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AttachmentFetcher for CountingFetcher {
    async fn fetch(&self, _url: &str) -> notion_vault::Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"bytes".to_vec())
    }
}

/// Every download fails.
pub struct FailingFetcher;

#[async_trait]
impl AttachmentFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> notion_vault::Result<Vec<u8>> {
        Err(notion_vault::Error::Other(format!("HTTP 503 for {}", url)))
    }
}

pub fn notion_url(id: &str) -> String {
    format!(
        "https://www.notion.so/acme/Root-{}",
        normalize_id(id).replace('-', "")
    )
}

pub fn config(state_dir: &Path, roots: &[(&str, Option<&str>)]) -> AppConfig {
    AppConfig {
        sync: SyncConfig {
            roots: roots
                .iter()
                .map(|(id, name)| RootConfig {
                    url: notion_url(id),
                    name: name.map(str::to_string),
                })
                .collect(),
            discover_workspace_roots: false,
        },
        output: OutputConfig {
            vault_path: state_dir.join("vault").to_string_lossy().into_owned(),
            attachment_folder: None,
        },
        state: StateConfig {
            file: state_dir.join("state.json").to_string_lossy().into_owned(),
        },
        notion_token: "secret_test".into(),
        ..Default::default()
    }
}

/// Everything one test run needs, wired around the fake.
pub struct Harness {
    pub api: Arc<FakeNotion>,
    pub writer: Arc<MemoryVaultWriter>,
    pub events: Arc<Mutex<Vec<notion_vault::progress::ProgressEvent>>>,
    pub fetcher: Arc<dyn AttachmentFetcher>,
}

impl Harness {
    pub fn new(api: FakeNotion) -> Self {
        Self {
            api: Arc::new(api),
            writer: Arc::new(MemoryVaultWriter::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            fetcher: Arc::new(StaticFetcher),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn AttachmentFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Fresh writer for the next run, keeping the same workspace.
    pub fn next_run(&mut self) {
        self.writer = Arc::new(MemoryVaultWriter::new());
        self.events.lock().unwrap().clear();
    }

    pub async fn run(
        &self,
        config: AppConfig,
        options: SyncOptions,
    ) -> notion_vault::Result<notion_vault::sync::SyncReport> {
        let (progress, mut rx) = ProgressHandle::channel();
        let client = RateLimitedClient::with_quota(
            self.api.clone(),
            CancellationToken::new(),
            10_000,
            10_000,
        );
        let orchestrator = SyncOrchestrator::with_components(
            config,
            options,
            Arc::new(client),
            self.writer.clone(),
            self.fetcher.clone(),
            progress,
        );
        let report = orchestrator.run().await;

        let mut events = self.events.lock().unwrap();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        report
    }
}
