use super::{WalkContext, WalkStats};
use crate::clients::normalize_id;
use crate::clients::types::Page;
use crate::state::{EntryRecord, RecordKind, ResourceRecord, SyncState};
use crate::transform::{is_id_prefix, sanitize_filename, BaseFile, DatabaseSchema, EntryData};
use crate::Result;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Sanitized name, or `None` when nothing usable as a path segment is left.
fn folder_name(name: &str) -> Option<String> {
    let name = sanitize_filename(name);
    if name.chars().all(|c| c == '.') {
        None
    } else {
        Some(name)
    }
}

/// Folder for a database's entries: the sanitized override when it is a
/// real name, otherwise the sanitized title, otherwise the id.
pub fn database_folder(title: &str, override_name: Option<&str>, id: &str) -> String {
    override_name
        .and_then(folder_name)
        .filter(|name| !is_id_prefix(name))
        .or_else(|| folder_name(title))
        .unwrap_or_else(|| normalize_id(id))
}

/// Syncs a database: sidecar, entries folder, and every stale entry.
///
/// Entry failures are reported to the progress sink and counted; only
/// failures before entries are dispatched are returned.
pub async fn walk_database(
    ctx: &WalkContext,
    state: &mut SyncState,
    database_id: &str,
    override_name: Option<&str>,
) -> Result<WalkStats> {
    let mut stats = WalkStats::default();
    let database_id = normalize_id(database_id);
    ctx.progress.syncing(&database_id);

    let database = ctx.api.get_database(&database_id).await?;
    let schema = DatabaseSchema::from_database(&database);
    let folder = database_folder(&schema.title, override_name, &database_id);
    info!("Syncing database '{}' into {}/", schema.title, folder);

    let entries = ctx.api.query_database(&database_id).await?;
    let mut lookup: HashMap<String, Page> = HashMap::with_capacity(entries.len());
    let mut stale = HashSet::new();
    for entry in entries {
        let id = normalize_id(&entry.id);
        if state.needs_entry_sync(&database_id, &id, entry.last_edited_time) {
            stale.insert(id.clone());
        }
        lookup.insert(id, entry);
    }

    let unchanged = matches!(
        state.resource(&database_id),
        Some(existing) if existing.kind == RecordKind::Database && existing.local_path == folder
    ) && !state.needs_sync(&database_id, database.last_edited_time);

    if unchanged {
        debug!("Schema of '{}' is unchanged, keeping its sidecar", schema.title);
    } else {
        let sidecar_name = folder_name(&schema.title).unwrap_or_else(|| folder.clone());
        let sidecar = BaseFile::new(&schema, &folder).to_yaml()?;
        ctx.writer
            .write(&format!("{}.base", sidecar_name), sidecar.into_bytes())
            .await?;
    }
    if !unchanged || !stale.is_empty() {
        ctx.writer.ensure_folder(&folder).await?;
    }

    // Keep entry records from earlier runs; refresh the rest.
    let mut record = match state.resource(&database_id) {
        Some(existing) if existing.kind == RecordKind::Database => existing.clone(),
        _ => ResourceRecord::database(
            &database_id,
            &schema.title,
            database.last_edited_time,
            &folder,
        ),
    };
    record.title = schema.title.clone();
    record.local_path = folder.clone();
    state.set_resource(record);

    for (id, entry) in &lookup {
        let data = EntryData::from_page(entry, &schema, ctx.translator.dates());
        ctx.progress.add_child(&database_id, id, &data.title);
        if !stale.contains(id) {
            stats.skipped += 1;
            ctx.progress.done(id);
        }
    }

    debug!(
        "{} of {} entries in '{}' need sync",
        stale.len(),
        lookup.len(),
        schema.title
    );
    let mut results = ctx.pool.fetch_blocks(stale.into_iter().collect());
    while let Some(fetched) = results.recv().await {
        let blocks = match fetched.result {
            Ok(blocks) => blocks,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                warn!("Failed to fetch entry {}: {}", fetched.id, e);
                stats.failed += 1;
                ctx.progress.error(&fetched.id, e.to_string());
                continue;
            }
        };
        let Some(entry) = lookup.get(&fetched.id) else {
            continue;
        };

        match write_entry(ctx, state, &database_id, &schema, &folder, entry, &blocks).await {
            Ok(()) => {
                stats.entries_written += 1;
                ctx.progress.done(&fetched.id);
            }
            Err(e) => {
                warn!("Failed to write entry {}: {}", fetched.id, e);
                stats.failed += 1;
                ctx.progress.error(&fetched.id, e.to_string());
            }
        }
    }

    if let Some(existing) = state.resource(&database_id) {
        let mut record = existing.clone();
        record.last_modified = database.last_edited_time;
        state.set_resource(record);
    }

    ctx.progress.done(&database_id);
    Ok(stats)
}

async fn write_entry(
    ctx: &WalkContext,
    state: &mut SyncState,
    database_id: &str,
    schema: &DatabaseSchema,
    folder: &str,
    entry: &Page,
    blocks: &[crate::clients::types::Block],
) -> Result<()> {
    let data = EntryData::from_page(entry, schema, ctx.translator.dates());
    let front_matter = data.front_matter()?;
    let body = ctx.translator.translate(&entry.id, blocks);
    let content = if front_matter.is_empty() {
        body
    } else {
        format!("{}\n{}", front_matter, body)
    };

    let local_file = format!("{}/{}", folder, data.filename());
    ctx.commit(&entry.id, &local_file, content).await?;
    state.set_entry(
        database_id,
        EntryRecord {
            page_id: entry.id.clone(),
            title: data.title,
            last_modified: entry.last_edited_time,
            local_file,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_folder() {
        let id = "1e567c00-aaaa-bbbb-cccc-ddddeeeeffff";
        assert_eq!(database_folder("Tasks", None, id), "Tasks");
        assert_eq!(database_folder("Tasks", Some("My: Tasks"), id), "My- Tasks");
        assert_eq!(database_folder("Tasks", Some("1e567c00..."), id), "Tasks");
        assert_eq!(database_folder("Tasks", Some("  "), id), "Tasks");
        assert_eq!(database_folder("", None, id), id);
        assert_eq!(database_folder("..", None, id), id);
        assert_eq!(database_folder("Tasks", Some("."), id), "Tasks");
        assert_eq!(database_folder("...", Some(".."), id), id);
        assert_eq!(database_folder("v1.2", None, id), "v1.2");
    }
}
