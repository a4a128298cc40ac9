pub mod attachments;
pub mod records;

use crate::clients::normalize_id;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub use attachments::AttachmentStats;
pub use records::{AttachmentRecord, EntryRecord, RecordKind, ResourceRecord};

pub const SCHEMA_VERSION: u32 = 1;

/// Durable record of what has been written to the vault.
///
/// Read once at start-up, mutated in memory by the orchestrator and walkers,
/// written atomically once at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    pub schema_version: u32,
    #[serde(default)]
    pub last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config_hash: String,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    #[serde(default)]
    pub attachments: BTreeMap<String, AttachmentRecord>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_sync_time: None,
            config_hash: String::new(),
            resources: BTreeMap::new(),
            attachments: BTreeMap::new(),
        }
    }

    /// A missing file yields an empty state; a malformed one is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting fresh", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let deserializer = &mut serde_json::Deserializer::from_str(&content);
        let state: SyncState = serde_path_to_error::deserialize(deserializer).map_err(|e| {
            Error::Validation(format!("state file {} is malformed: {}", path.display(), e))
        })?;

        if state.schema_version > SCHEMA_VERSION {
            return Err(Error::Validation(format!(
                "state file {} has schema version {}, newer than supported {}",
                path.display(),
                state.schema_version,
                SCHEMA_VERSION
            )));
        }

        debug!(
            "Loaded state from {}: {} resources, {} attachments",
            path.display(),
            state.resources.len(),
            state.attachments.len()
        );
        Ok(state)
    }

    /// Writes to a sibling temp file, syncs it, then renames over the target.
    /// Never mutates `self`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes())?;
        debug!("Saved state to {}", path.display());
        Ok(())
    }

    pub fn mark_synced(&mut self) {
        self.last_sync_time = Some(Utc::now());
    }

    pub fn check_config_changed(&self, fingerprint: &str) -> bool {
        self.config_hash != fingerprint
    }

    /// Drops every resource, entry and attachment record and adopts the new
    /// fingerprint, so the next pass rewrites everything.
    pub fn invalidate_for_config_change(&mut self, fingerprint: &str) {
        info!(
            "Sync-relevant configuration changed, discarding {} resources and {} attachments",
            self.resources.len(),
            self.attachments.len()
        );
        self.resources.clear();
        self.attachments.clear();
        self.config_hash = fingerprint.to_string();
    }

    pub fn update_config_hash(&mut self, fingerprint: &str) {
        self.config_hash = fingerprint.to_string();
    }

    pub fn resource(&self, id: &str) -> Option<&ResourceRecord> {
        self.resources.get(&normalize_id(id))
    }

    pub fn entry(&self, resource_id: &str, entry_id: &str) -> Option<&EntryRecord> {
        self.resource(resource_id)?.entries.get(&normalize_id(entry_id))
    }

    /// True when there is no record or upstream is strictly newer.
    pub fn needs_sync(&self, id: &str, last_modified: DateTime<Utc>) -> bool {
        match self.resource(id) {
            Some(record) => last_modified > record.last_modified,
            None => true,
        }
    }

    pub fn needs_entry_sync(
        &self,
        resource_id: &str,
        entry_id: &str,
        last_modified: DateTime<Utc>,
    ) -> bool {
        match self.entry(resource_id, entry_id) {
            Some(record) => last_modified > record.last_modified,
            None => true,
        }
    }

    pub fn set_resource(&mut self, mut record: ResourceRecord) {
        record.id = normalize_id(&record.id);
        self.resources.insert(record.id.clone(), record);
    }

    /// Fails if the parent is unknown or is not a database.
    pub fn set_entry(&mut self, resource_id: &str, mut entry: EntryRecord) -> Result<()> {
        let resource = self
            .resources
            .get_mut(&normalize_id(resource_id))
            .ok_or_else(|| Error::Sync(format!("database {} not found in state", resource_id)))?;

        if resource.kind != RecordKind::Database {
            return Err(Error::Sync(format!(
                "resource {} is not a database",
                resource_id
            )));
        }

        entry.page_id = normalize_id(&entry.page_id);
        resource.entries.insert(entry.page_id.clone(), entry);
        Ok(())
    }

    /// Forgets whichever record carries this id, resource or entry, so the
    /// next run syncs it again.
    pub fn invalidate(&mut self, id: &str) -> bool {
        let id = normalize_id(id);
        if self.resources.remove(&id).is_some() {
            return true;
        }
        self.resources
            .values_mut()
            .any(|resource| resource.entries.remove(&id).is_some())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn page_count(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.kind == RecordKind::Page)
            .count()
    }

    pub fn database_count(&self) -> usize {
        self.resources
            .values()
            .filter(|r| r.kind == RecordKind::Database)
            .count()
    }

    pub fn entry_count(&self) -> usize {
        self.resources.values().map(|r| r.entries.len()).sum()
    }

    /// Every vault-relative path the state knows about.
    pub fn all_local_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .resources
            .values()
            .flat_map(|r| {
                std::iter::once(r.local_path.as_str())
                    .chain(r.entries.values().map(|e| e.local_file.as_str()))
            })
            .chain(self.attachments.values().map(|a| a.local_path.as_str()))
            .collect();
        paths.sort_unstable();
        paths.dedup();
        paths
    }
}

/// Temp file in the same directory, fsync, rename, then fsync the directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    #[cfg(unix)]
    if let Some(parent) = parent {
        std::fs::File::open(parent)?.sync_all()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
    }

    const DB: &str = "0b7d7a8e-1111-2222-3333-444455556666";
    const ENTRY: &str = "9f9f9f9f-1111-2222-3333-444455556666";

    #[test]
    fn test_needs_sync_after_set_resource() {
        let mut state = SyncState::new();
        let id = "1e567c00-aaaa-bbbb-cccc-ddddeeeeffff";
        assert!(state.needs_sync(id, ts(10)));

        state.set_resource(ResourceRecord::page(id, "Hello", ts(10), "Hello.md"));
        assert!(!state.needs_sync(id, ts(10)));
        assert!(!state.needs_sync(id, ts(9)));
        assert!(state.needs_sync(id, ts(11)));

        // Undashed form addresses the same record.
        assert!(!state.needs_sync("1e567c00aaaabbbbccccddddeeeeffff", ts(10)));
    }

    #[test]
    fn test_set_entry_requires_database() {
        let mut state = SyncState::new();
        let entry = EntryRecord {
            page_id: ENTRY.into(),
            title: "Task".into(),
            last_modified: ts(10),
            local_file: "Tasks/Task.md".into(),
        };

        assert!(state.set_entry(DB, entry.clone()).is_err());

        state.set_resource(ResourceRecord::page(DB, "Page", ts(10), "Page.md"));
        assert!(state.set_entry(DB, entry.clone()).is_err());

        state.set_resource(ResourceRecord::database(DB, "Tasks", ts(10), "Tasks"));
        state.set_entry(DB, entry).unwrap();
        assert!(!state.needs_entry_sync(DB, ENTRY, ts(10)));
        assert!(state.needs_entry_sync(DB, ENTRY, ts(12)));
        assert_eq!(state.entry_count(), 1);
    }

    #[test]
    fn test_config_change_discards_records() {
        let mut state = SyncState::new();
        state.update_config_hash("aaa");
        state.set_resource(ResourceRecord::page("p", "P", ts(10), "P.md"));
        state.update_attachment_state("https://x/a.png", "h", "attachments/a.png", 3, None);

        assert!(!state.check_config_changed("aaa"));
        assert!(state.check_config_changed("bbb"));

        state.invalidate_for_config_change("bbb");
        assert_eq!(state.config_hash, "bbb");
        assert_eq!(state.resource_count(), 0);
        assert!(state.attachments.is_empty());
    }

    #[test]
    fn test_invalidate_removes_resource_or_entry() {
        let mut state = SyncState::new();
        state.set_resource(ResourceRecord::database(DB, "Tasks", ts(10), "Tasks"));
        state
            .set_entry(
                DB,
                EntryRecord {
                    page_id: ENTRY.into(),
                    title: "Task".into(),
                    last_modified: ts(10),
                    local_file: "Tasks/Task.md".into(),
                },
            )
            .unwrap();

        assert!(state.invalidate(ENTRY));
        assert!(state.entry(DB, ENTRY).is_none());
        assert!(state.resource(DB).is_some());

        assert!(state.invalidate(DB));
        assert!(!state.invalidate(DB));
    }

    #[test]
    fn test_missing_file_loads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = SyncState::load(dir.path().join("missing.json")).unwrap();
        assert_eq!(state, SyncState::new());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SyncState::load(&path).is_err());

        std::fs::write(&path, r#"{"schema_version": 99}"#).unwrap();
        let err = SyncState::load(&path).unwrap_err();
        assert!(err.to_string().contains("schema version 99"));
    }

    #[test]
    fn test_save_then_load_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let mut state = SyncState::new();
        state.update_config_hash("abc");
        state.set_resource(ResourceRecord::page("p2", "Second", ts(11), "Second.md"));
        state.set_resource(ResourceRecord::database(DB, "Tasks", ts(10), "Tasks"));
        state
            .set_entry(
                DB,
                EntryRecord {
                    page_id: ENTRY.into(),
                    title: "Task".into(),
                    last_modified: ts(10),
                    local_file: "Tasks/Task.md".into(),
                },
            )
            .unwrap();
        state.update_attachment_state(
            "https://files.example.com/a.png",
            "deadbeef",
            "attachments/a.png",
            42,
            Some(ts(12)),
        );
        state.mark_synced();
        state.save(&path).unwrap();

        let first = std::fs::read(&path).unwrap();
        let loaded = SyncState::load(&path).unwrap();
        assert_eq!(loaded, state);

        loaded.save(&path).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());
    }

    #[test]
    fn test_all_local_paths() {
        let mut state = SyncState::new();
        state.set_resource(ResourceRecord::page("p", "P", ts(10), "P.md"));
        state.update_attachment_state("u", "h", "attachments/a.png", 1, None);
        assert_eq!(state.all_local_paths(), vec!["P.md", "attachments/a.png"]);
        assert_eq!(state.page_count(), 1);
        assert_eq!(state.database_count(), 0);
    }
}
