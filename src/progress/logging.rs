use super::ProgressEvent;
use std::collections::HashMap;

/// Structured log lines for non-interactive output.
#[derive(Default)]
pub struct LoggingRenderer {
    titles: HashMap<String, String>,
    done: usize,
    failed: usize,
}

impl LoggingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn title(&self, id: &str) -> String {
        self.titles.get(id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::AddRoot { id, title } => {
                tracing::info!(id = %id, title = %title, "Syncing root");
                self.titles.insert(id, title);
            }
            ProgressEvent::AddChild { parent, id, title } => {
                tracing::debug!(parent = %parent, id = %id, title = %title, "Queued");
                self.titles.insert(id, title);
            }
            ProgressEvent::Syncing(id) => {
                tracing::debug!(id = %id, title = %self.title(&id), "Syncing");
            }
            ProgressEvent::Done(id) => {
                self.done += 1;
                tracing::debug!(id = %id, title = %self.title(&id), "Done");
            }
            ProgressEvent::Error { id, message } => {
                self.failed += 1;
                tracing::warn!(id = %id, title = %self.title(&id), error = %message, "Failed");
            }
            ProgressEvent::Finished { error } => match error {
                Some(error) => tracing::error!(
                    done = self.done,
                    failed = self.failed,
                    error = %error,
                    "Sync finished with errors"
                ),
                None => tracing::info!(done = self.done, failed = self.failed, "Sync finished"),
            },
        }
    }
}
