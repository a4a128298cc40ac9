//! Lifecycle events for the sync tree, rendered off the sync task.
//!
//! Walkers and the orchestrator hold a cheap [`ProgressHandle`] and push
//! [`ProgressEvent`]s into an unbounded channel. A renderer task drains the
//! channel and draws either animated bars (TTY) or log lines (pipes, CI).

pub mod interactive;
pub mod logging;

use console::Term;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use interactive::InteractiveRenderer;
pub use logging::LoggingRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Syncing,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    AddRoot {
        id: String,
        title: String,
    },
    AddChild {
        parent: String,
        id: String,
        title: String,
    },
    Syncing(String),
    Done(String),
    Error {
        id: String,
        message: String,
    },
    /// Last event of a run; the renderer tears down after it.
    Finished {
        error: Option<String>,
    },
}

/// How events are drawn.
pub enum Renderer {
    Interactive(InteractiveRenderer),
    Logging(LoggingRenderer),
}

impl Renderer {
    /// Animated bars on a terminal, log lines otherwise.
    pub fn detect(quiet: bool) -> Self {
        if !quiet && Term::stdout().is_term() {
            Self::Interactive(InteractiveRenderer::new())
        } else {
            Self::Logging(LoggingRenderer::new())
        }
    }

    pub fn handle(&mut self, event: ProgressEvent) {
        match self {
            Self::Interactive(r) => r.handle(event),
            Self::Logging(r) => r.handle(event),
        }
    }

    pub fn finish(&mut self) {
        if let Self::Interactive(r) = self {
            r.finish();
        }
    }
}

/// Sending side of the progress channel. Clones share one renderer.
///
/// A disabled handle drops every event, which keeps walkers free of
/// `Option` checks.
#[derive(Clone, Default)]
pub struct ProgressHandle {
    tx: Option<UnboundedSender<ProgressEvent>>,
    task: Option<Arc<Mutex<Option<JoinHandle<()>>>>>,
}

impl ProgressHandle {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spawns the renderer task and returns a handle feeding it.
    pub fn spawn(mut renderer: Renderer) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let last = matches!(event, ProgressEvent::Finished { .. });
                renderer.handle(event);
                if last {
                    break;
                }
            }
            renderer.finish();
        });

        Self {
            tx: Some(tx),
            task: Some(Arc::new(Mutex::new(Some(task)))),
        }
    }

    /// A handle whose events are collected by the caller.
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                task: None,
            },
            rx,
        )
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // Renderer gone means nobody is watching; nothing to do.
            let _ = tx.send(event);
        }
    }

    pub fn add_root(&self, id: &str, title: &str) {
        self.send(ProgressEvent::AddRoot {
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    pub fn add_child(&self, parent: &str, id: &str, title: &str) {
        self.send(ProgressEvent::AddChild {
            parent: parent.to_string(),
            id: id.to_string(),
            title: title.to_string(),
        });
    }

    pub fn syncing(&self, id: &str) {
        self.send(ProgressEvent::Syncing(id.to_string()));
    }

    pub fn done(&self, id: &str) {
        self.send(ProgressEvent::Done(id.to_string()));
    }

    pub fn error(&self, id: &str, message: impl Into<String>) {
        self.send(ProgressEvent::Error {
            id: id.to_string(),
            message: message.into(),
        });
    }

    /// Sends the final event and waits for the renderer to tear down.
    pub async fn finish(&self, error: Option<String>) {
        self.send(ProgressEvent::Finished { error });
        if let Some(task) = &self.task {
            if let Some(handle) = task.lock().await.take() {
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_handle_delivers_in_order() {
        let (progress, mut rx) = ProgressHandle::channel();
        progress.add_root("r", "Root");
        progress.add_child("r", "c", "Child");
        progress.syncing("c");
        progress.error("c", "boom");
        progress.done("r");
        progress.finish(None).await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 6);
        assert_eq!(
            events[3],
            ProgressEvent::Error {
                id: "c".into(),
                message: "boom".into()
            }
        );
        assert_eq!(events[5], ProgressEvent::Finished { error: None });
    }

    #[tokio::test]
    async fn test_spawned_renderer_tears_down() {
        let progress = ProgressHandle::spawn(Renderer::Logging(LoggingRenderer::new()));
        progress.add_root("r", "Root");
        progress.done("r");
        progress.finish(Some("failed".into())).await;
        // A second finish finds no task left to await.
        progress.finish(None).await;
    }

    #[tokio::test]
    async fn test_disabled_handle_is_silent() {
        let progress = ProgressHandle::disabled();
        progress.add_root("r", "Root");
        progress.finish(None).await;
    }
}
