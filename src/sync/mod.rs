pub mod attachments;
pub mod database;
pub mod orchestrator;
pub mod page;
pub mod pool;

use crate::clients::RateLimitedClient;
use crate::progress::ProgressHandle;
use crate::transform::MarkdownTranslator;
use crate::vault::{check_relative, VaultWriter};
use crate::Result;
use std::ops::AddAssign;
use std::sync::{Arc, Mutex};

pub use attachments::{AttachmentCollector, AttachmentFetcher, HttpFetcher};
pub use database::walk_database;
pub use orchestrator::{SyncOptions, SyncOrchestrator, SyncReport};
pub use page::walk_page;
pub use pool::FetchPool;

/// Everything a walker needs besides the state it mutates.
pub struct WalkContext {
    pub api: Arc<RateLimitedClient>,
    pub pool: FetchPool,
    pub writer: Arc<dyn VaultWriter>,
    pub translator: MarkdownTranslator,
    pub progress: ProgressHandle,
    held: Mutex<Vec<HeldDocument>>,
}

/// A rendered document whose attachment links are settled after downloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldDocument {
    pub id: String,
    pub rel_path: String,
    pub content: String,
}

impl HeldDocument {
    /// Points links at `local_path` back at `source_url`.
    pub fn restore_link(&mut self, local_path: &str, source_url: &str) {
        let local = format!("]({})", local_path);
        if self.content.contains(&local) {
            self.content = self
                .content
                .replace(&local, &format!("]({})", source_url));
        }
    }
}

impl WalkContext {
    pub fn new(
        api: Arc<RateLimitedClient>,
        pool: FetchPool,
        writer: Arc<dyn VaultWriter>,
        translator: MarkdownTranslator,
        progress: ProgressHandle,
    ) -> Self {
        Self {
            api,
            pool,
            writer,
            translator,
            progress,
            held: Mutex::new(Vec::new()),
        }
    }

    /// Writes a translated document. Documents linking attachments are held
    /// until the downloads settle; see [`WalkContext::take_held`].
    pub async fn commit(&self, id: &str, rel_path: &str, content: String) -> Result<()> {
        if !self.translator.links_attachments(id) {
            return self.writer.write(rel_path, content.into_bytes()).await;
        }
        check_relative(rel_path)?;
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HeldDocument {
                id: id.to_string(),
                rel_path: rel_path.to_string(),
                content,
            });
        Ok(())
    }

    pub fn take_held(&self) -> Vec<HeldDocument> {
        std::mem::take(&mut *self.held.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Per-walk counters, summed into the run report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub pages_written: usize,
    pub entries_written: usize,
    pub skipped: usize,
    /// Children or entries that failed while their root carried on.
    pub failed: usize,
}

impl AddAssign for WalkStats {
    fn add_assign(&mut self, other: Self) {
        self.pages_written += other.pages_written;
        self.entries_written += other.entries_written;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_link() {
        let mut doc = HeldDocument {
            id: "p".into(),
            rel_path: "Page.md".into(),
            content: concat!(
                "![cat](attachments/1_cat.png)\n\n",
                "[cat](attachments/1_cat.png)\n\n",
                "![dog](attachments/2_dog.png)\n\n",
            )
            .into(),
        };
        doc.restore_link("attachments/1_cat.png", "https://example.com/cat.png");
        assert_eq!(
            doc.content,
            concat!(
                "![cat](https://example.com/cat.png)\n\n",
                "[cat](https://example.com/cat.png)\n\n",
                "![dog](attachments/2_dog.png)\n\n",
            )
        );

        doc.restore_link("attachments/absent.png", "https://example.com/absent.png");
        assert!(doc.content.contains("](attachments/2_dog.png)"));
    }
}
