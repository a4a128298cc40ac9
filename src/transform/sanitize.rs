pub const MAX_FILENAME_BYTES: usize = 200;

/// Makes a title safe to use as a file or folder name.
///
/// `/ \ :` become `-`, `* ? " < > |` and carriage returns are dropped,
/// newlines become spaces. The result is trimmed and cut to at most
/// [`MAX_FILENAME_BYTES`] bytes on a character boundary. Idempotent.
pub fn sanitize_filename(name: &str) -> String {
    let mapped: String = name
        .chars()
        .filter_map(|c| match c {
            '/' | '\\' | ':' => Some('-'),
            '*' | '?' | '"' | '<' | '>' | '|' | '\r' => None,
            '\n' => Some(' '),
            other => Some(other),
        })
        .collect();

    let trimmed = mapped.trim();
    truncate_bytes(trimmed, MAX_FILENAME_BYTES).trim().to_string()
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// True when the name begins with eight lowercase hex characters, the way an
/// auto-generated folder name derived from an id does.
pub fn is_id_prefix(name: &str) -> bool {
    name.len() >= 8
        && name
            .bytes()
            .take(8)
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Lowercased with spaces turned into underscores; used for front-matter keys.
pub fn sanitize_property_name(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Hello World"), "Hello World");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a-b-c-d");
        assert_eq!(sanitize_filename("what? *really* <yes> | \"no\""), "what really yes  no");
        assert_eq!(sanitize_filename("line\r\nbreak"), "line break");
        assert_eq!(sanitize_filename("  padded  "), "padded");
        assert_eq!(sanitize_filename(""), "");
    }

    #[test]
    fn test_sanitize_truncates_to_200_bytes() {
        let long = "a".repeat(201);
        assert_eq!(sanitize_filename(&long).len(), 200);

        // Multi-byte characters are never split.
        let wide = "é".repeat(150);
        let cut = sanitize_filename(&wide);
        assert!(cut.len() <= 200);
        assert_eq!(cut.chars().count(), 100);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let samples = [
            "Plain",
            "a/b:c",
            "  lead and trail  ",
            "tab\tnewline\n",
            &format!("{} tail", "x".repeat(199)),
            &"ü".repeat(120),
            "?*|",
        ];
        for sample in samples {
            let once = sanitize_filename(sample);
            assert_eq!(sanitize_filename(&once), once, "input {:?}", sample);
        }
    }

    #[test]
    fn test_is_id_prefix() {
        assert!(is_id_prefix("1e567c00"));
        assert!(is_id_prefix("abcdef01-rest"));
        assert!(!is_id_prefix("1e567c0"));
        assert!(!is_id_prefix("Projects"));
        assert!(!is_id_prefix("ABCDEF01"));
        assert!(!is_id_prefix("abcdefg1"));
    }

    #[test]
    fn test_sanitize_property_name() {
        assert_eq!(sanitize_property_name("Due Date"), "due_date");
        assert_eq!(sanitize_property_name("Status"), "status");
    }
}
