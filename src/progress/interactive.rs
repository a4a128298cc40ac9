use super::{ItemStatus, ProgressEvent};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;

struct RootState {
    bar: ProgressBar,
    title: String,
    status: ItemStatus,
    children: HashMap<String, ItemStatus>,
}

impl RootState {
    fn count(&self, status: ItemStatus) -> usize {
        self.children.values().filter(|s| **s == status).count()
    }

    fn refresh(&self) {
        let total = self.children.len() as u64;
        let settled = (self.count(ItemStatus::Done) + self.count(ItemStatus::Error)) as u64;
        if total > 0 {
            self.bar.set_length(total);
            self.bar.set_position(settled);
        }
        let failed = self.count(ItemStatus::Error);
        let msg = if failed > 0 {
            format!("{} ({} failed)", self.title, failed)
        } else {
            self.title.clone()
        };
        self.bar.set_message(msg);
    }
}

/// One bar per root; children advance their root's bar.
pub struct InteractiveRenderer {
    multi: MultiProgress,
    roots: Vec<String>,
    state: HashMap<String, RootState>,
    /// Child id to owning root id.
    owners: HashMap<String, String>,
}

impl InteractiveRenderer {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            roots: Vec::new(),
            state: HashMap::new(),
            owners: HashMap::new(),
        }
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
    }

    fn done_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    fn error_style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{prefix:.red} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
    }

    fn root_of(&self, id: &str) -> Option<String> {
        if self.state.contains_key(id) {
            return Some(id.to_string());
        }
        self.owners.get(id).cloned()
    }

    fn set_status(&mut self, id: &str, status: ItemStatus, message: Option<String>) {
        let Some(root_id) = self.root_of(id) else {
            return;
        };
        let Some(root) = self.state.get_mut(&root_id) else {
            return;
        };

        if root_id == id {
            root.status = status;
            match status {
                ItemStatus::Done => {
                    root.bar.set_style(Self::done_style());
                    root.bar.set_prefix("✓");
                    root.refresh();
                    root.bar.finish();
                }
                ItemStatus::Error => {
                    root.bar.set_style(Self::error_style());
                    root.bar.set_prefix("✗");
                    let detail = message.unwrap_or_default();
                    root.bar.finish_with_message(format!("{}: {}", root.title, detail));
                }
                _ => root.refresh(),
            }
            return;
        }

        root.children.insert(id.to_string(), status);
        root.refresh();
        if let Some(message) = message {
            let _ = self.multi.println(format!("  ✗ {}: {}", id, message));
        }
    }

    pub fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::AddRoot { id, title } => {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(Self::bar_style());
                bar.enable_steady_tick(Duration::from_millis(100));
                let root = RootState {
                    bar,
                    title,
                    status: ItemStatus::Pending,
                    children: HashMap::new(),
                };
                root.refresh();
                self.roots.push(id.clone());
                self.state.insert(id, root);
            }
            ProgressEvent::AddChild { parent, id, .. } => {
                let Some(root_id) = self.root_of(&parent) else {
                    return;
                };
                if let Some(root) = self.state.get_mut(&root_id) {
                    root.children.entry(id.clone()).or_insert(ItemStatus::Pending);
                    root.refresh();
                }
                self.owners.insert(id, root_id);
            }
            ProgressEvent::Syncing(id) => self.set_status(&id, ItemStatus::Syncing, None),
            ProgressEvent::Done(id) => self.set_status(&id, ItemStatus::Done, None),
            ProgressEvent::Error { id, message } => {
                self.set_status(&id, ItemStatus::Error, Some(message))
            }
            ProgressEvent::Finished { error } => {
                if let Some(error) = error {
                    let _ = self.multi.println(format!("✗ {}", error));
                }
            }
        }
    }

    /// Stops every bar still spinning, leaving its last state on screen.
    pub fn finish(&mut self) {
        for id in &self.roots {
            if let Some(root) = self.state.get(id) {
                if matches!(root.status, ItemStatus::Pending | ItemStatus::Syncing) {
                    root.bar.abandon();
                }
            }
        }
    }
}

impl Default for InteractiveRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_roll_up_to_root() {
        let mut renderer = InteractiveRenderer::new();
        renderer.handle(ProgressEvent::AddRoot {
            id: "r".into(),
            title: "Root".into(),
        });
        renderer.handle(ProgressEvent::AddChild {
            parent: "r".into(),
            id: "a".into(),
            title: "A".into(),
        });
        renderer.handle(ProgressEvent::AddChild {
            parent: "a".into(),
            id: "b".into(),
            title: "B".into(),
        });
        renderer.handle(ProgressEvent::Done("a".into()));
        renderer.handle(ProgressEvent::Error {
            id: "b".into(),
            message: "boom".into(),
        });

        let root = &renderer.state["r"];
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.count(ItemStatus::Done), 1);
        assert_eq!(root.count(ItemStatus::Error), 1);
        assert_eq!(renderer.owners["b"], "r");

        renderer.handle(ProgressEvent::Done("r".into()));
        assert_eq!(renderer.state["r"].status, ItemStatus::Done);
        renderer.finish();
    }
}
