use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parent {
    Workspace {
        #[serde(default)]
        workspace: bool,
    },
    PageId {
        page_id: String,
    },
    DatabaseId {
        database_id: String,
    },
    BlockId {
        block_id: String,
    },
    #[serde(other)]
    Unknown,
}

impl Parent {
    pub fn is_workspace(&self) -> bool {
        matches!(self, Parent::Workspace { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Icon {
    #[serde(rename = "type")]
    pub kind: String,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub last_edited_time: DateTime<Utc>,
    pub parent: Parent,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    pub url: Option<String>,
    #[serde(default)]
    pub archived: bool,
    pub icon: Option<Icon>,
}

impl Page {
    /// Concatenated plain text of the first title-typed property.
    pub fn title(&self) -> String {
        self.properties
            .values()
            .find_map(|value| match value {
                PropertyValue::Title { title } => Some(plain_text(title)),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    #[serde(default)]
    pub title: Vec<RichText>,
    pub last_edited_time: DateTime<Utc>,
    pub parent: Parent,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    pub icon: Option<Icon>,
}

impl Database {
    pub fn title(&self) -> String {
        plain_text(&self.title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    Title,
    RichText,
    Number,
    Select,
    MultiSelect,
    Status,
    Date,
    People,
    Files,
    Checkbox,
    Url,
    Email,
    PhoneNumber,
    Formula,
    Relation,
    Rollup,
    CreatedTime,
    CreatedBy,
    LastEditedTime,
    LastEditedBy,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateValue {
    pub start: String,
    pub end: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub expiry_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalRef {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileObject {
    #[serde(default)]
    pub name: String,
    pub file: Option<FileRef>,
    pub external: Option<ExternalRef>,
}

impl FileObject {
    pub fn url(&self) -> Option<&str> {
        self.file
            .as_ref()
            .map(|f| f.url.as_str())
            .or_else(|| self.external.as_ref().map(|e| e.url.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormulaValue {
    String { string: Option<String> },
    Number { number: Option<f64> },
    Boolean { boolean: Option<bool> },
    Date { date: Option<DateValue> },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RollupValue {
    Number { number: Option<f64> },
    Date { date: Option<DateValue> },
    Array { array: Vec<PropertyValue> },
    #[serde(other)]
    Unsupported,
}

/// A property value on a page, tagged by its `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Title { title: Vec<RichText> },
    RichText { rich_text: Vec<RichText> },
    Number { number: Option<f64> },
    Select { select: Option<SelectOption> },
    MultiSelect { multi_select: Vec<SelectOption> },
    Status { status: Option<SelectOption> },
    Date { date: Option<DateValue> },
    Checkbox { checkbox: bool },
    Url { url: Option<String> },
    Email { email: Option<String> },
    PhoneNumber { phone_number: Option<String> },
    Relation { relation: Vec<Reference> },
    People { people: Vec<User> },
    Files { files: Vec<FileObject> },
    Formula { formula: FormulaValue },
    Rollup { rollup: RollupValue },
    CreatedTime { created_time: String },
    LastEditedTime { last_edited_time: String },
    CreatedBy { created_by: User },
    LastEditedBy { last_edited_by: User },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub italic: bool,
    #[serde(default)]
    pub strikethrough: bool,
    #[serde(default)]
    pub underline: bool,
    #[serde(default)]
    pub code: bool,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    #[serde(rename = "type")]
    pub kind: String,
    pub page: Option<Reference>,
    pub database: Option<Reference>,
    pub user: Option<User>,
    pub date: Option<DateValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Equation {
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichText {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub plain_text: String,
    pub href: Option<String>,
    #[serde(default)]
    pub annotations: Annotations,
    pub mention: Option<Mention>,
    pub equation: Option<Equation>,
}

impl RichText {
    /// Unannotated text segment, mostly useful for building fixtures.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            plain_text: text.into(),
            href: None,
            annotations: Annotations::default(),
            mention: None,
            equation: None,
        }
    }
}

pub fn plain_text(segments: &[RichText]) -> String {
    segments.iter().map(|rt| rt.plain_text.as_str()).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeadingBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default)]
    pub is_toggleable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToDoBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default)]
    pub checked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    #[serde(default)]
    pub caption: Vec<RichText>,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalloutBlock {
    #[serde(default)]
    pub rich_text: Vec<RichText>,
    pub icon: Option<Icon>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableBlock {
    #[serde(default)]
    pub table_width: usize,
    #[serde(default)]
    pub has_column_header: bool,
    #[serde(default)]
    pub has_row_header: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableRowBlock {
    #[serde(default)]
    pub cells: Vec<Vec<RichText>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaBlock {
    pub file: Option<FileRef>,
    pub external: Option<ExternalRef>,
    #[serde(default)]
    pub caption: Vec<RichText>,
    pub name: Option<String>,
}

impl MediaBlock {
    pub fn url(&self) -> &str {
        self.file
            .as_ref()
            .map(|f| f.url.as_str())
            .or_else(|| self.external.as_ref().map(|e| e.url.as_str()))
            .unwrap_or_default()
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.file.as_ref().and_then(|f| f.expiry_time)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkBlock {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub caption: Vec<RichText>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildTitle {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkToPage {
    PageId { page_id: String },
    DatabaseId { database_id: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedFrom {
    pub block_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncedBlock {
    pub synced_from: Option<SyncedFrom>,
}

/// Block payload, tagged by the block `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    Paragraph {
        paragraph: TextBlock,
    },
    #[serde(rename = "heading_1")]
    Heading1 {
        heading_1: HeadingBlock,
    },
    #[serde(rename = "heading_2")]
    Heading2 {
        heading_2: HeadingBlock,
    },
    #[serde(rename = "heading_3")]
    Heading3 {
        heading_3: HeadingBlock,
    },
    BulletedListItem {
        bulleted_list_item: TextBlock,
    },
    NumberedListItem {
        numbered_list_item: TextBlock,
    },
    ToDo {
        to_do: ToDoBlock,
    },
    Toggle {
        toggle: TextBlock,
    },
    Code {
        code: CodeBlock,
    },
    Quote {
        quote: TextBlock,
    },
    Callout {
        callout: CalloutBlock,
    },
    Divider,
    Table {
        table: TableBlock,
    },
    TableRow {
        table_row: TableRowBlock,
    },
    Image {
        image: MediaBlock,
    },
    Video {
        video: MediaBlock,
    },
    File {
        file: MediaBlock,
    },
    Pdf {
        pdf: MediaBlock,
    },
    Audio {
        audio: MediaBlock,
    },
    Bookmark {
        bookmark: LinkBlock,
    },
    Embed {
        embed: LinkBlock,
    },
    LinkPreview {
        link_preview: LinkBlock,
    },
    Equation {
        equation: Equation,
    },
    ChildPage {
        child_page: ChildTitle,
    },
    ChildDatabase {
        child_database: ChildTitle,
    },
    LinkToPage {
        link_to_page: LinkToPage,
    },
    SyncedBlock {
        synced_block: SyncedBlock,
    },
    ColumnList,
    Column,
    TableOfContents,
    Breadcrumb,
    Template,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub kind: BlockKind,
    /// Nested blocks, filled in by the API adapter when it expands the tree.
    #[serde(skip)]
    pub children: Vec<Block>,
}

impl Block {
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            has_children: false,
            kind,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Block>) -> Self {
        self.has_children = !children.is_empty();
        self.children = children;
        self
    }

    /// Discriminant used to separate runs of differing block types.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            BlockKind::Paragraph { .. } => "paragraph",
            BlockKind::Heading1 { .. } => "heading_1",
            BlockKind::Heading2 { .. } => "heading_2",
            BlockKind::Heading3 { .. } => "heading_3",
            BlockKind::BulletedListItem { .. } => "bulleted_list_item",
            BlockKind::NumberedListItem { .. } => "numbered_list_item",
            BlockKind::ToDo { .. } => "to_do",
            BlockKind::Toggle { .. } => "toggle",
            BlockKind::Code { .. } => "code",
            BlockKind::Quote { .. } => "quote",
            BlockKind::Callout { .. } => "callout",
            BlockKind::Divider => "divider",
            BlockKind::Table { .. } => "table",
            BlockKind::TableRow { .. } => "table_row",
            BlockKind::Image { .. } => "image",
            BlockKind::Video { .. } => "video",
            BlockKind::File { .. } => "file",
            BlockKind::Pdf { .. } => "pdf",
            BlockKind::Audio { .. } => "audio",
            BlockKind::Bookmark { .. } => "bookmark",
            BlockKind::Embed { .. } => "embed",
            BlockKind::LinkPreview { .. } => "link_preview",
            BlockKind::Equation { .. } => "equation",
            BlockKind::ChildPage { .. } => "child_page",
            BlockKind::ChildDatabase { .. } => "child_database",
            BlockKind::LinkToPage { .. } => "link_to_page",
            BlockKind::SyncedBlock { .. } => "synced_block",
            BlockKind::ColumnList => "column_list",
            BlockKind::Column => "column",
            BlockKind::TableOfContents => "table_of_contents",
            BlockKind::Breadcrumb => "breadcrumb",
            BlockKind::Template => "template",
            BlockKind::Unsupported => "unsupported",
        }
    }

    /// Child-page blocks reference separate pages; their children are never inlined.
    pub fn is_page_reference(&self) -> bool {
        matches!(
            self.kind,
            BlockKind::ChildPage { .. } | BlockKind::ChildDatabase { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedList<T> {
    pub results: Vec<T>,
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> PaginatedList<T> {
    pub fn single(results: Vec<T>) -> Self {
        Self {
            results,
            next_cursor: None,
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "object", rename_all = "snake_case")]
pub enum SearchResult {
    Page(Page),
    Database(Database),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    Page,
    Database,
}

impl SearchFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchFilter::Page => "page",
            SearchFilter::Database => "database",
        }
    }
}
