use crate::clients::ResourceKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Page,
    Database,
}

impl From<ResourceKind> for RecordKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Page => RecordKind::Page,
            ResourceKind::Database => RecordKind::Database,
        }
    }
}

/// A synced page or database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub title: String,
    pub last_modified: DateTime<Utc>,
    /// Vault-relative path of the page file or the database folder.
    pub local_path: String,
    /// Database entries keyed by page id. Always empty for pages.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entries: BTreeMap<String, EntryRecord>,
}

impl ResourceRecord {
    pub fn page(id: &str, title: &str, last_modified: DateTime<Utc>, local_path: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: RecordKind::Page,
            title: title.to_string(),
            last_modified,
            local_path: local_path.to_string(),
            entries: BTreeMap::new(),
        }
    }

    pub fn database(id: &str, title: &str, last_modified: DateTime<Utc>, folder: &str) -> Self {
        Self {
            kind: RecordKind::Database,
            ..Self::page(id, title, last_modified, folder)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub page_id: String,
    pub title: String,
    pub last_modified: DateTime<Utc>,
    /// Vault-relative path of the entry file.
    pub local_file: String,
}

/// A materialized attachment, keyed by its source URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub source_url: String,
    pub content_hash: String,
    pub local_path: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_hint: Option<DateTime<Utc>>,
}
