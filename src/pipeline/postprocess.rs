//! Post-processing: deterministic cleanup of recognised page text.
//!
//! tesseract output is already plain text, but it carries engine quirks
//! that make downstream diffing and indexing noisy:
//!
//! - Windows or bare `\r` line endings from some traineddata builds
//! - Zero-width and soft-hyphen characters picked up from the glyph set
//! - Typographic ligatures (`ﬁ`, `ﬂ`) and non-breaking spaces
//! - Trailing spaces and runs of empty lines around detected blocks
//!
//! Each rule is a pure `&str → String` pass, applied in the order below.
//! Line endings are normalised first so the line-based rules see `\n` only.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one page's recognised text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Expand ligatures and non-breaking spaces
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines down to one
/// 6. Drop leading and trailing blank lines
///
/// Empty input stays empty.
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = expand_typographic_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    trim_blank_edges(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Expand ligatures and non-breaking spaces ────────────────────────

fn expand_typographic_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            '\u{00A0}' | '\u{202F}' => out.push(' '),
            other => out.push(other),
        }
    }
    out
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 6: Drop blank edges ─────────────────────────────────────────────────

fn trim_blank_edges(input: &str) -> String {
    input.trim_matches('\n').to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(
            trim_trailing_whitespace("  hello   \nworld  "),
            "  hello\nworld"
        );
    }

    #[test]
    fn test_collapse_blank_lines() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_remove_invisible() {
        assert_eq!(remove_invisible_chars("he\u{200B}llo\u{00AD}"), "hello");
    }

    #[test]
    fn test_expand_ligatures() {
        assert_eq!(expand_typographic_chars("\u{FB01}nal of\u{FB03}ce"), "final office");
        assert_eq!(expand_typographic_chars("R$\u{00A0}10"), "R$ 10");
    }

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(clean_text(""), "");
        assert_eq!(clean_text("\n\n  \n"), "");
    }

    #[test]
    fn test_clean_text_full_pipeline() {
        let input = "\r\n\r\nTitle  \r\n\r\n\r\n\r\nBody \u{FEFF}text\u{00A0}here\r\n\r\n";
        assert_eq!(clean_text(input), "Title\n\nBody text here");
    }

    #[test]
    fn test_keeps_indentation() {
        assert_eq!(clean_text("  indented\nline"), "  indented\nline");
    }
}
