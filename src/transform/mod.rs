pub mod base;
pub mod dates;
pub mod markdown;
pub mod richtext;
pub mod sanitize;

pub use base::{BaseFile, DatabaseSchema, EntryData, FieldType};
pub use dates::DateFormatter;
pub use markdown::MarkdownTranslator;
pub use sanitize::{is_id_prefix, sanitize_filename};
