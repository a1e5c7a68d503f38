/// Decode bytes as UTF-8, replacing invalid sequences.
///
/// Best effort: a binary file with a text-ish extension produces garbage, not an error.
pub fn decode_plain_text(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    sanitize_extracted_text(text.strip_prefix('\u{FEFF}').unwrap_or(&text))
}

/// Strip control characters (keeping newlines and tabs) and normalize line endings.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect::<String>()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_and_strips_bom() {
        let bytes = "\u{FEFF}Rent received: 1 200 €".as_bytes();
        assert_eq!(decode_plain_text(bytes), "Rent received: 1 200 €");
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let text = decode_plain_text(&[b'o', b'k', 0xFF, 0xFE, b'!']);
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('!'));
    }

    #[test]
    fn strips_nul_and_control_characters() {
        let clean = sanitize_extracted_text("Amount\x00: 500\x01\x02\r\nDate: 2024-01-15");
        assert_eq!(clean, "Amount: 500\nDate: 2024-01-15");
    }

    #[test]
    fn keeps_tabs_and_blank_lines() {
        let clean = sanitize_extracted_text("a\tb\n\nc  ");
        assert_eq!(clean, "a\tb\n\nc");
    }
}
