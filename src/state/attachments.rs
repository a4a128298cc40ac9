use super::{AttachmentRecord, SyncState};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachmentStats {
    pub count: usize,
    pub total_bytes: u64,
}

impl SyncState {
    pub fn attachment(&self, source_url: &str) -> Option<&AttachmentRecord> {
        self.attachments.get(source_url)
    }

    pub fn update_attachment_state(
        &mut self,
        source_url: &str,
        content_hash: &str,
        local_path: &str,
        size_bytes: u64,
        expiry_hint: Option<DateTime<Utc>>,
    ) {
        self.attachments.insert(
            source_url.to_string(),
            AttachmentRecord {
                source_url: source_url.to_string(),
                content_hash: content_hash.to_string(),
                local_path: local_path.to_string(),
                size_bytes,
                expiry_hint,
            },
        );
    }

    /// Content-addressed: an unchanged body at the same path is not rewritten.
    pub fn attachment_needs_write(
        &self,
        source_url: &str,
        content_hash: &str,
        local_path: &str,
    ) -> bool {
        match self.attachment(source_url) {
            Some(record) => record.content_hash != content_hash || record.local_path != local_path,
            None => true,
        }
    }

    pub fn attachment_stats(&self) -> AttachmentStats {
        AttachmentStats {
            count: self.attachments.len(),
            total_bytes: self.attachments.values().map(|a| a.size_bytes).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_needs_write() {
        let mut state = SyncState::new();
        let url = "https://prod-files-secure.s3.us-west-2.amazonaws.com/ws/f/a.png";
        assert!(state.attachment_needs_write(url, "h1", "attachments/a.png"));

        state.update_attachment_state(url, "h1", "attachments/a.png", 10, None);
        assert!(!state.attachment_needs_write(url, "h1", "attachments/a.png"));
        assert!(state.attachment_needs_write(url, "h2", "attachments/a.png"));
        assert!(state.attachment_needs_write(url, "h1", "files/a.png"));

        state.update_attachment_state("https://x/b.pdf", "h3", "attachments/b.pdf", 5, None);
        assert_eq!(
            state.attachment_stats(),
            AttachmentStats {
                count: 2,
                total_bytes: 15
            }
        );
    }
}
