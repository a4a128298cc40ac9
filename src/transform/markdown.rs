use super::dates::DateFormatter;
use super::richtext::rich_text_to_markdown;
use crate::clients::types::{plain_text, Block, BlockKind, LinkToPage, MediaBlock, RichText};
use crate::sync::attachments::{AttachmentCollector, AttachmentKind, NoteOutcome};
use std::sync::Arc;

/// Converts an expanded block tree into Obsidian-flavoured markdown.
///
/// Pure and synchronous: nested children must already be attached to their
/// parents. Media URLs are routed through the attachment collector when one
/// is configured, which only records them.
pub struct MarkdownTranslator {
    dates: DateFormatter,
    attachments: Option<Arc<AttachmentCollector>>,
}

impl MarkdownTranslator {
    pub fn new(dates: DateFormatter, attachments: Option<Arc<AttachmentCollector>>) -> Self {
        Self { dates, attachments }
    }

    /// Whether markdown translated for `page_id` links a downloadable file.
    pub fn links_attachments(&self, page_id: &str) -> bool {
        self.attachments
            .as_ref()
            .is_some_and(|c| c.has_links_from(page_id))
    }

    pub fn dates(&self) -> &DateFormatter {
        &self.dates
    }

    pub fn translate(&self, page_id: &str, blocks: &[Block]) -> String {
        self.render_blocks(page_id, blocks, 0)
    }

    fn text(&self, segments: &[RichText]) -> String {
        rich_text_to_markdown(segments, &self.dates)
    }

    fn render_blocks(&self, page_id: &str, blocks: &[Block], depth: usize) -> String {
        let mut out = String::new();
        let mut previous: Option<&str> = None;

        for block in blocks {
            let md = self.render_block(page_id, block, depth);
            let kind = block.type_name();
            if previous.is_some_and(|p| p != kind) {
                out.push('\n');
            }
            out.push_str(&md);
            previous = Some(kind);
        }
        out
    }

    fn render_children(&self, page_id: &str, block: &Block, depth: usize) -> String {
        if block.children.is_empty() {
            String::new()
        } else {
            self.render_blocks(page_id, &block.children, depth)
        }
    }

    /// Renders children flush-left and prefixes every non-empty line with `> `.
    fn quoted_children(&self, page_id: &str, block: &Block, indent: &str) -> String {
        let mut out = String::new();
        for child in &block.children {
            let md = self.render_block(page_id, child, 0);
            for line in md.lines().filter(|l| !l.is_empty()) {
                out.push_str(indent);
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }

    fn foldable(&self, page_id: &str, block: &Block, title: &str, indent: &str) -> String {
        let mut out = format!("{}> [!faq]- {}\n", indent, title);
        out.push_str(&self.quoted_children(page_id, block, indent));
        out.push('\n');
        out
    }

    fn render_block(&self, page_id: &str, block: &Block, depth: usize) -> String {
        let indent = "\t".repeat(depth);

        match &block.kind {
            BlockKind::Paragraph { paragraph } => {
                let mut out = format!("{}{}\n\n", indent, self.text(&paragraph.rich_text));
                out.push_str(&self.render_children(page_id, block, depth + 1));
                out
            }
            BlockKind::Heading1 { heading_1: h } => self.heading(page_id, block, h, 1, &indent),
            BlockKind::Heading2 { heading_2: h } => self.heading(page_id, block, h, 2, &indent),
            BlockKind::Heading3 { heading_3: h } => self.heading(page_id, block, h, 3, &indent),
            BlockKind::BulletedListItem { bulleted_list_item } => {
                let mut out = format!("{}- {}\n", indent, self.text(&bulleted_list_item.rich_text));
                out.push_str(&self.render_children(page_id, block, depth + 1));
                out
            }
            BlockKind::NumberedListItem { numbered_list_item } => {
                let text = self.text(&numbered_list_item.rich_text);
                let mut out = format!("{}1. {}\n", indent, text);
                out.push_str(&self.render_children(page_id, block, depth + 1));
                out
            }
            BlockKind::ToDo { to_do } => {
                let mark = if to_do.checked { "[x]" } else { "[ ]" };
                let mut out = format!("{}- {} {}\n", indent, mark, self.text(&to_do.rich_text));
                out.push_str(&self.render_children(page_id, block, depth + 1));
                out
            }
            BlockKind::Toggle { toggle } => {
                let title = self.text(&toggle.rich_text);
                self.foldable(page_id, block, &title, &indent)
            }
            BlockKind::Code { code } => {
                let body = plain_text(&code.rich_text);
                let lang = code.language.to_lowercase();
                let lang = if lang == "plain text" || lang == "plain_text" {
                    ""
                } else {
                    lang.as_str()
                };
                let mut out = format!("{}```{}\n{}", indent, lang, body);
                if !body.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&format!("{}```\n\n", indent));
                if !code.caption.is_empty() {
                    out.push_str(&format!("{}*{}*\n\n", indent, self.text(&code.caption)));
                }
                out
            }
            BlockKind::Quote { quote } => {
                let mut out = String::new();
                for line in self.text(&quote.rich_text).split('\n') {
                    out.push_str(&format!("{}> {}\n", indent, line));
                }
                out.push_str(&self.quoted_children(page_id, block, &indent));
                out.push('\n');
                out
            }
            BlockKind::Callout { callout } => {
                let kind = callout
                    .icon
                    .as_ref()
                    .and_then(|icon| icon.emoji.as_deref())
                    .map(callout_type)
                    .unwrap_or("note");
                let mut out = format!("{}> [!{}]\n", indent, kind);
                for line in self.text(&callout.rich_text).split('\n') {
                    out.push_str(&format!("{}> {}\n", indent, line));
                }
                out.push_str(&self.quoted_children(page_id, block, &indent));
                out.push('\n');
                out
            }
            BlockKind::Divider => format!("{}---\n\n", indent),
            BlockKind::Table { table } => {
                let mut out = String::new();
                let rows = block.children.iter().filter_map(|child| match &child.kind {
                    BlockKind::TableRow { table_row } => Some(table_row),
                    _ => None,
                });
                for (i, row) in rows.enumerate() {
                    out.push_str(&indent);
                    out.push('|');
                    for cell in &row.cells {
                        out.push_str(&format!(" {} |", self.text(cell)));
                    }
                    out.push('\n');
                    if i == 0 && table.has_column_header {
                        out.push_str(&indent);
                        out.push('|');
                        out.push_str(&" --- |".repeat(row.cells.len()));
                        out.push('\n');
                    }
                }
                if !out.is_empty() {
                    out.push('\n');
                }
                out
            }
            BlockKind::TableRow { .. } => String::new(),
            BlockKind::Image { image } => {
                self.media(page_id, image, AttachmentKind::Image, "", true, &indent)
            }
            BlockKind::Video { video } => {
                self.media(page_id, video, AttachmentKind::Video, "", true, &indent)
            }
            BlockKind::Pdf { pdf } => {
                self.media(page_id, pdf, AttachmentKind::Pdf, "PDF", true, &indent)
            }
            BlockKind::Audio { audio } => {
                self.media(page_id, audio, AttachmentKind::Audio, "audio", true, &indent)
            }
            BlockKind::File { file } => {
                self.media(page_id, file, AttachmentKind::File, "file", false, &indent)
            }
            BlockKind::Bookmark { bookmark: link }
            | BlockKind::LinkPreview { link_preview: link } => {
                let title = if link.caption.is_empty() {
                    link.url.clone()
                } else {
                    plain_text(&link.caption)
                };
                format!("{}[{}]({})\n\n", indent, title, link.url)
            }
            BlockKind::Embed { embed } => {
                let caption = if embed.caption.is_empty() {
                    embed.url.clone()
                } else {
                    plain_text(&embed.caption)
                };
                let bang = if embed.url.contains("youtube.com") || embed.url.contains("youtu.be") {
                    "!"
                } else {
                    ""
                };
                format!("{}{}[{}]({})\n\n", indent, bang, caption, embed.url)
            }
            BlockKind::Equation { equation } => {
                format!("{}$$\n{}\n$$\n\n", indent, equation.expression)
            }
            BlockKind::ChildPage { child_page: child }
            | BlockKind::ChildDatabase {
                child_database: child,
            } => {
                format!("{}[[{}]]\n\n", indent, child.title)
            }
            BlockKind::LinkToPage { link_to_page } => match link_to_page {
                LinkToPage::PageId { page_id: id } | LinkToPage::DatabaseId { database_id: id } => {
                    format!("{}[[{}]]\n\n", indent, id)
                }
                LinkToPage::Unknown => String::new(),
            },
            BlockKind::SyncedBlock { .. } | BlockKind::Column => {
                self.render_blocks(page_id, &block.children, 0)
            }
            BlockKind::ColumnList => block
                .children
                .iter()
                .map(|column| self.render_block(page_id, column, 0))
                .collect(),
            BlockKind::TableOfContents | BlockKind::Breadcrumb | BlockKind::Template => {
                String::new()
            }
            BlockKind::Unsupported => format!("{}<!-- Unsupported Notion block -->\n", indent),
        }
    }

    fn heading(
        &self,
        page_id: &str,
        block: &Block,
        heading: &crate::clients::types::HeadingBlock,
        level: usize,
        indent: &str,
    ) -> String {
        let text = self.text(&heading.rich_text);
        if heading.is_toggleable {
            return self.foldable(page_id, block, &text, indent);
        }
        format!("{}{} {}\n\n", indent, "#".repeat(level), text)
    }

    fn media(
        &self,
        page_id: &str,
        media: &MediaBlock,
        kind: AttachmentKind,
        default_caption: &str,
        embed: bool,
        indent: &str,
    ) -> String {
        let caption = if media.caption.is_empty() {
            default_caption.to_string()
        } else {
            plain_text(&media.caption)
        };

        let remote = media.url();
        let target = match &self.attachments {
            Some(collector) => match collector.note(remote, kind, page_id, media.expiry()) {
                NoteOutcome::Local { local_path, .. } => local_path,
                NoteOutcome::Ineligible => remote.to_string(),
            },
            None => remote.to_string(),
        };

        let bang = if embed { "!" } else { "" };
        format!("{}{}[{}]({})\n\n", indent, bang, caption, target)
    }
}

fn callout_type(emoji: &str) -> &'static str {
    match emoji {
        "💨" | "📘" => "note",
        "📗" | "💡" | "⭐" => "tip",
        "📙" => "example",
        "📕" | "⚠️" | "⚠" => "warning",
        "🚨" | "🔥" => "danger",
        "ℹ️" | "ℹ" => "info",
        "✅" => "success",
        "❌" => "failure",
        "❗" | "🎯" => "important",
        "❓" => "question",
        "⚙️" | "⚙" => "abstract",
        "🔖" => "quote",
        _ => "note",
    }
}
