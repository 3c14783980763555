// ============================================================
// Layer 4 — Text Cleaner
// ============================================================
// Cleans raw report text scraped from PDF/HTML exports before
// tokenisation. The raw exports contain:
//   - leftover HTML/XML tags
//   - the browser XML error banner that some scrapes captured
//     instead of (or in front of) the page text
//   - table-of-contents leader dots ("Wstęp ........ 3")
//   - zero-width spaces, BOMs, soft hyphens, PDF bullet glyphs
//     from the private-use area
//   - Windows line endings, tabs, runs of spaces
//
// Cleaning steps (applied in order):
//   1. Strip tags and the error banner (regex)
//   2. Map artifact characters to nothing / whitespace
//   3. Collapse leader dots
//   4. Collapse spaces per line and trim lines
//   5. Allow at most one blank line in a row
//
// Everything is pattern based; sentence text is never rewritten.

use regex::Regex;

/// Result of cleaning one document.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedText {
    pub text:          String,
    /// Characters removed relative to the input, for auditing
    pub removed_chars: usize,
}

pub struct Preprocessor {
    tags:         Regex,
    error_banner: Regex,
    dot_runs:     Regex,
    spaced_dots:  Regex,
}

impl Preprocessor {
    /// Create a new Preprocessor with its patterns compiled.
    pub fn new() -> Self {
        Self {
            tags: Regex::new(r"</?[A-Za-z][A-Za-z0-9:_-]*(?:\s[^<>]*)?/?>").expect("tag pattern"),
            error_banner: Regex::new(
                r"This page contains the following errors:\s*error on line.{0,10}at column.{0,10}:\s*Extra content at the end of the document\s*Below is a rendering of the page up to the first error\.",
            )
            .expect("error banner pattern"),
            dot_runs:    Regex::new(r"\.{2,}").expect("dot run pattern"),
            spaced_dots: Regex::new(r"(?:\.[ \t]*){2,}").expect("spaced dot pattern"),
        }
    }

    /// Clean one document's text.
    pub fn clean(&self, text: &str) -> CleanedText {
        let before = text.chars().count();

        // ── Step 1: markup ────────────────────────────────────────────────────
        let text  = text.replace("\r\n", "\n");
        let step1 = self.error_banner.replace_all(&text, "");
        let step1 = self.tags.replace_all(&step1, " ");

        // ── Step 2: artifact characters ───────────────────────────────────────
        let step2: String = step1
            .chars()
            .filter_map(|c| match c {
                // Invisible artifacts are dropped outright
                '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}' => None,
                // PDF bullet glyphs (Symbol/Wingdings private-use range)
                '\u{F000}'..='\u{F0FF}' => None,
                '\t' | '\u{00A0}' | '\u{2007}' | '\u{202F}' => Some(' '),
                '\r' => Some('\n'),
                c if c.is_control() && c != '\n' => Some(' '),
                c => Some(c),
            })
            .collect();

        // ── Step 3: leader dots ───────────────────────────────────────────────
        let step3 = self.dot_runs.replace_all(&step2, ".");
        let step3 = self.spaced_dots.replace_all(&step3, ". ");

        // ── Step 4: spaces per line ───────────────────────────────────────────
        let step4: String = step3
            .lines()
            .map(|line| {
                let mut out        = String::with_capacity(line.len());
                let mut last_space = false;
                for c in line.chars() {
                    if c == ' ' {
                        if !last_space {
                            out.push(' ');
                        }
                        last_space = true;
                    } else {
                        out.push(c);
                        last_space = false;
                    }
                }
                out.trim().to_string()
            })
            .collect::<Vec<_>>()
            .join("\n");

        // ── Step 5: blank lines ───────────────────────────────────────────────
        let mut result        = String::with_capacity(step4.len());
        let mut newline_count = 0usize;
        for c in step4.chars() {
            if c == '\n' {
                newline_count += 1;
                if newline_count <= 2 {
                    result.push(c);
                }
            } else {
                newline_count = 0;
                result.push(c);
            }
        }

        let text          = result.trim().to_string();
        let removed_chars = before.saturating_sub(text.chars().count());
        CleanedText { text, removed_chars }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn clean(s: &str) -> String {
        Preprocessor::new().clean(s).text
    }

    #[test]
    fn test_collapses_multiple_spaces() {
        assert_eq!(clean("hello   world"), "hello world");
    }

    #[test]
    fn test_strips_tags_without_gluing_words() {
        assert_eq!(clean("<p>Emisje CO<sub>2</sub> spadły</p><br/>o 5%"), "Emisje CO 2 spadły o 5%");
    }

    #[test]
    fn test_comparison_signs_are_not_tags() {
        assert_eq!(clean("wzrost < 5% i > 2%"), "wzrost < 5% i > 2%");
    }

    #[test]
    fn test_removes_error_banner() {
        let raw = "This page contains the following errors: error on line 1 at column 20: \
                   Extra content at the end of the document Below is a rendering of the page \
                   up to the first error. Raport roczny";
        assert_eq!(clean(raw), "Raport roczny");
    }

    #[test]
    fn test_collapses_leader_dots() {
        assert_eq!(clean("Wstęp........3"), "Wstęp.3");
        assert_eq!(clean("Strategia . . . . 7"), "Strategia . 7");
    }

    #[test]
    fn test_drops_invisible_artifacts() {
        assert_eq!(clean("zrówno\u{200B}ważony\u{00AD} \u{F0B7} rozwój"), "zrównoważony rozwój");
    }

    #[test]
    fn test_collapses_blank_lines() {
        let out = clean("line1\r\n\r\n\r\n\r\nline2");
        assert_eq!(out, "line1\n\nline2");
    }

    #[test]
    fn test_reports_removed_chars() {
        let c = Preprocessor::new().clean("  a  b  ");
        assert_eq!(c.text, "a b");
        assert_eq!(c.removed_chars, 5);
    }

    #[test]
    fn test_empty_string() {
        assert_eq!(clean(""), "");
    }
}
