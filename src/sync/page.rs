use super::{WalkContext, WalkStats};
use crate::clients::normalize_id;
use crate::clients::types::{Block, BlockKind, Page};
use crate::state::{ResourceRecord, SyncState};
use crate::transform::base::entry_filename;
use crate::Result;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Child-page references anywhere in an expanded tree, in document order.
/// Never descends into a child page itself.
pub fn child_pages(blocks: &[Block]) -> Vec<(String, String)> {
    let mut found = Vec::new();
    let mut stack: Vec<&Block> = blocks.iter().rev().collect();
    while let Some(block) = stack.pop() {
        if let BlockKind::ChildPage { child_page } = &block.kind {
            found.push((block.id.clone(), child_page.title.clone()));
            continue;
        }
        stack.extend(block.children.iter().rev());
    }
    found
}

async fn write_page(
    ctx: &WalkContext,
    state: &mut SyncState,
    page: &Page,
    blocks: &[Block],
) -> Result<()> {
    let title = page.title();
    let filename = entry_filename(&title, &page.id);
    let markdown = ctx.translator.translate(&page.id, blocks);

    ctx.commit(&page.id, &filename, markdown).await?;
    state.set_resource(ResourceRecord::page(
        &page.id,
        &title,
        page.last_edited_time,
        &filename,
    ));
    debug!("Wrote page {} to {}", page.id, filename);
    Ok(())
}

/// Registers unseen child pages as pending and returns their ids.
fn enqueue_children(
    ctx: &WalkContext,
    visited: &mut HashSet<String>,
    parent_id: &str,
    blocks: &[Block],
) -> Vec<String> {
    let mut queued = Vec::new();
    for (id, title) in child_pages(blocks) {
        let id = normalize_id(&id);
        if visited.insert(id.clone()) {
            ctx.progress.add_child(parent_id, &id, &title);
            queued.push(id);
        }
    }
    queued
}

/// Syncs a root page and every page reachable through child-page blocks.
///
/// All files land at the vault root. Each id is fetched at most once per
/// call, so reference cycles terminate. Only a failure on the root itself is
/// returned; child failures go to the progress sink.
pub async fn walk_page(
    ctx: &WalkContext,
    state: &mut SyncState,
    root_id: &str,
) -> Result<WalkStats> {
    let mut stats = WalkStats::default();
    let mut visited = HashSet::new();
    let root_id = normalize_id(root_id);
    visited.insert(root_id.clone());

    ctx.progress.syncing(&root_id);
    let page = ctx.api.get_page(&root_id).await?;
    if !state.needs_sync(&root_id, page.last_edited_time) {
        info!("Page '{}' is up to date", page.title());
        stats.skipped += 1;
        ctx.progress.done(&root_id);
        return Ok(stats);
    }

    let blocks = ctx.api.get_block_tree(&root_id).await?;
    write_page(ctx, state, &page, &blocks).await?;
    stats.pages_written += 1;

    let mut level = enqueue_children(ctx, &mut visited, &root_id, &blocks);
    while !level.is_empty() && !ctx.api.cancel_token().is_cancelled() {
        debug!("Fetching {} child pages of {}", level.len(), root_id);
        let mut next = Vec::new();
        let mut results = ctx.pool.fetch_pages_with_blocks(level);

        while let Some(fetched) = results.recv().await {
            let (page, blocks) = match fetched.result {
                Ok(found) => found,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    warn!("Failed to fetch child page {}: {}", fetched.id, e);
                    stats.failed += 1;
                    ctx.progress.error(&fetched.id, e.to_string());
                    continue;
                }
            };

            if state.needs_sync(&page.id, page.last_edited_time) {
                match write_page(ctx, state, &page, &blocks).await {
                    Ok(()) => stats.pages_written += 1,
                    Err(e) => {
                        warn!("Failed to write child page {}: {}", fetched.id, e);
                        stats.failed += 1;
                        ctx.progress.error(&fetched.id, e.to_string());
                        continue;
                    }
                }
            } else {
                stats.skipped += 1;
            }
            ctx.progress.done(&fetched.id);

            // Unchanged children may still have changed grandchildren.
            next.extend(enqueue_children(ctx, &mut visited, &fetched.id, &blocks));
        }
        level = next;
    }

    ctx.progress.done(&root_id);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::types::{ChildTitle, TextBlock};

    fn child(id: &str, title: &str) -> Block {
        Block::new(
            id,
            BlockKind::ChildPage {
                child_page: ChildTitle {
                    title: title.into(),
                },
            },
        )
    }

    #[test]
    fn test_child_pages_in_document_order() {
        let toggle = Block::new("t", BlockKind::Toggle { toggle: TextBlock::default() })
            .with_children(vec![child("b", "B")]);
        let nested_page = child("c", "C").with_children(vec![child("hidden", "Hidden")]);
        let blocks = vec![
            child("a", "A"),
            toggle,
            nested_page,
            Block::new("p", BlockKind::Paragraph { paragraph: TextBlock::default() }),
        ];

        let found: Vec<String> = child_pages(&blocks).into_iter().map(|(id, _)| id).collect();
        assert_eq!(found, vec!["a", "b", "c"]);
    }
}
