use super::dates::DateFormatter;
use crate::clients::types::{Annotations, Mention, RichText};

const HIGHLIGHT_COLORS: [&str; 9] = [
    "yellow_background",
    "blue_background",
    "green_background",
    "orange_background",
    "pink_background",
    "purple_background",
    "red_background",
    "gray_background",
    "brown_background",
];

pub fn rich_text_to_markdown(segments: &[RichText], dates: &DateFormatter) -> String {
    segments
        .iter()
        .map(|segment| segment_to_markdown(segment, dates))
        .collect()
}

fn segment_to_markdown(segment: &RichText, dates: &DateFormatter) -> String {
    if let Some(equation) = &segment.equation {
        return format!("${}$", equation.expression);
    }

    let text = match &segment.mention {
        Some(mention) => mention_to_markdown(mention, dates).unwrap_or_default(),
        None => segment.plain_text.clone(),
    };
    let text = apply_annotations(text, &segment.annotations);

    match segment.href.as_deref() {
        Some(href) if is_internal_link(href) => {
            let label = segment.plain_text.trim();
            format!("[[{}]]", if label.is_empty() { "link" } else { label })
        }
        Some(href) if !href.is_empty() => format!("[{}]({})", text, href),
        _ => text,
    }
}

fn is_internal_link(href: &str) -> bool {
    href.contains("notion.so") || href.starts_with('/')
}

fn mention_to_markdown(mention: &Mention, dates: &DateFormatter) -> Option<String> {
    match mention.kind.as_str() {
        "page" => mention.page.as_ref().map(|p| format!("[[{}]]", p.id)),
        "database" => mention.database.as_ref().map(|d| format!("[[{}]]", d.id)),
        "user" => mention
            .user
            .as_ref()
            .and_then(|u| u.name.as_ref())
            .map(|name| format!("@{}", name)),
        "date" => mention.date.as_ref().map(|d| dates.format_mention(d)),
        _ => None,
    }
}

/// Order matters: code is innermost, highlight outermost.
fn apply_annotations(mut text: String, annotations: &Annotations) -> String {
    if text.is_empty() {
        return text;
    }
    if annotations.code {
        text = format!("`{}`", text);
    }
    if annotations.strikethrough {
        text = format!("~~{}~~", text);
    }
    if annotations.italic {
        text = format!("*{}*", text);
    }
    if annotations.bold {
        text = format!("**{}**", text);
    }
    if annotations.underline {
        text = format!("<u>{}</u>", text);
    }
    if HIGHLIGHT_COLORS.contains(&annotations.color.as_str()) {
        text = format!("=={}==", text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::types::{DateValue, Equation, Reference, User};

    fn styled(text: &str, f: impl FnOnce(&mut Annotations)) -> RichText {
        let mut rt = RichText::plain(text);
        f(&mut rt.annotations);
        rt
    }

    #[test]
    fn test_annotations_nest_in_order() {
        let dates = DateFormatter::default();
        let segments = vec![
            RichText::plain("plain "),
            styled("bold", |a| a.bold = true),
            RichText::plain(" "),
            styled("all", |a| {
                a.bold = true;
                a.italic = true;
                a.code = true;
                a.strikethrough = true;
                a.underline = true;
                a.color = "yellow_background".into();
            }),
        ];

        assert_eq!(
            rich_text_to_markdown(&segments, &dates),
            "plain **bold** ==<u>***~~`all`~~***</u>=="
        );
    }

    #[test]
    fn test_links() {
        let dates = DateFormatter::default();
        let mut external = RichText::plain("docs");
        external.href = Some("https://example.com".into());
        let mut internal = RichText::plain("Other Page");
        internal.href = Some("https://www.notion.so/Other-Page-abc".into());
        let mut relative = RichText::plain(" ");
        relative.href = Some("/abc".into());

        assert_eq!(
            rich_text_to_markdown(&[external, internal, relative], &dates),
            "[docs](https://example.com)[[Other Page]][[link]]"
        );
    }

    #[test]
    fn test_mentions_and_equations() {
        let dates = DateFormatter::default();
        let mention = |kind: &str| Mention {
            kind: kind.into(),
            page: Some(Reference { id: "page-id".into() }),
            database: None,
            user: Some(User {
                id: "u".into(),
                name: Some("Ada".into()),
                kind: None,
            }),
            date: Some(DateValue {
                start: "2024-01-15".into(),
                end: None,
                time_zone: None,
            }),
        };

        let mut page = RichText::plain("ignored");
        page.mention = Some(mention("page"));
        let mut user = RichText::plain("ignored");
        user.mention = Some(mention("user"));
        let mut date = RichText::plain("ignored");
        date.mention = Some(mention("date"));
        let mut equation = RichText::plain("E");
        equation.equation = Some(Equation {
            expression: "E=mc^2".into(),
        });

        assert_eq!(
            rich_text_to_markdown(&[page, user, date, equation], &dates),
            "[[page-id]]@Ada15-01-2024$E=mc^2$"
        );
    }
}
