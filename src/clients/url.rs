use crate::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// Identifier pulled out of a Notion URL or raw id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// Dashed 8-4-4-4-12 form, lowercase.
    pub id: String,
    /// The same id with dashes removed.
    pub raw_id: String,
}

fn hex_id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)[0-9a-f]{32}").ok())
        .as_ref()
}

/// Accepts a raw 32-hex id, a dashed UUID, or a workspace URL such as
/// `https://www.notion.so/acme/Title-<id>?v=<view>`.
pub fn parse_notion_url(input: &str) -> Result<ParsedId> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidUrl("empty URL".to_string()));
    }

    if let Some(raw) = extract_raw_id(input) {
        return to_parsed(&raw);
    }

    let parsed = url::Url::parse(input)
        .map_err(|e| Error::InvalidUrl(format!("{}: {}", input, e)))?;

    parsed
        .path_segments()
        .into_iter()
        .flatten()
        .rev()
        .find_map(extract_raw_id)
        .map(|raw| to_parsed(&raw))
        .unwrap_or_else(|| {
            Err(Error::InvalidUrl(format!(
                "no valid Notion ID found in URL: {}",
                input
            )))
        })
}

fn extract_raw_id(segment: &str) -> Option<String> {
    let compact = segment.replace('-', "");
    if compact.len() == 32 && compact.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(compact.to_ascii_lowercase());
    }

    // Plain ids only ever show up in the path; skip anything with a query.
    if segment.contains('?') || segment.contains("://") {
        return None;
    }

    if let Some(found) = hex_id_pattern().and_then(|re| re.find(segment)) {
        return Some(found.as_str().to_ascii_lowercase());
    }

    if segment.len() >= 36 && segment.is_char_boundary(segment.len() - 36) {
        let tail = segment[segment.len() - 36..].replace('-', "");
        if tail.len() == 32 && tail.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some(tail.to_ascii_lowercase());
        }
    }

    None
}

fn to_parsed(raw: &str) -> Result<ParsedId> {
    let uuid = Uuid::parse_str(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
    Ok(ParsedId {
        id: uuid.hyphenated().to_string(),
        raw_id: uuid.simple().to_string(),
    })
}

/// Normalizes a dashed or undashed id to the dashed form. Unparseable input is
/// returned lowercased so comparisons stay total.
pub fn normalize_id(id: &str) -> String {
    match Uuid::parse_str(id.trim()) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => id.trim().to_ascii_lowercase(),
    }
}

pub fn ids_equal(a: &str, b: &str) -> bool {
    normalize_id(a) == normalize_id(b)
}

/// Canonical browser URL for an id.
pub fn page_url(id: &str) -> String {
    format!("https://notion.so/{}", normalize_id(id).replace('-', ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "1e567c00aaaabbbbccccddddeeeeffff";
    const DASHED: &str = "1e567c00-aaaa-bbbb-cccc-ddddeeeeffff";

    #[test]
    fn test_parse_raw_and_dashed_ids() {
        let raw = parse_notion_url(RAW).unwrap();
        assert_eq!(raw.id, DASHED);
        assert_eq!(raw.raw_id, RAW);

        let dashed = parse_notion_url(&format!("  {}  ", DASHED)).unwrap();
        assert_eq!(dashed, raw);
    }

    #[test]
    fn test_parse_workspace_urls() {
        let with_title = parse_notion_url(&format!(
            "https://www.notion.so/acme/Hello-World-{}",
            RAW
        ))
        .unwrap();
        assert_eq!(with_title.id, DASHED);

        let with_view = parse_notion_url(&format!(
            "https://acme.notion.site/{}?v=0123456789abcdef0123456789abcdef",
            RAW
        ))
        .unwrap();
        assert_eq!(with_view.id, DASHED);

        let uppercase = parse_notion_url(&format!("https://notion.so/{}", RAW.to_uppercase()))
            .unwrap();
        assert_eq!(uppercase.id, DASHED);
    }

    #[test]
    fn test_parse_rejects_missing_id() {
        assert!(parse_notion_url("").is_err());
        assert!(parse_notion_url("   ").is_err());

        let err = parse_notion_url("https://www.notion.so/acme/No-Id-Here").unwrap_err();
        assert!(err.to_string().contains("no valid Notion ID"));
        assert!(parse_notion_url("not a url").is_err());
    }

    #[test]
    fn test_ids_equal_ignores_dashes() {
        assert!(ids_equal(RAW, DASHED));
        assert!(ids_equal(&DASHED.to_uppercase(), RAW));
        assert!(!ids_equal(RAW, "ffffffffaaaabbbbccccddddeeeeffff"));
        assert_eq!(page_url(DASHED), format!("https://notion.so/{}", RAW));
    }
}
