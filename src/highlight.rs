//! Code highlighting adapter over syntect.
//!
//! Turns a `(language, source)` pair into highlighted HTML. An unrecognized
//! language tag retries once as plain text, so a code block never fails to
//! render — worst case it degrades to unstyled monospace. Highlighting runs
//! on a worker thread; while a result is pending the document shows the raw
//! source, and stale results are dropped by the app's sequence guard.

use log::debug;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::SyntaxSet;

use crate::theme::Theme;

pub struct Highlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
}

impl Default for Highlighter {
    fn default() -> Self {
        Self::new()
    }
}

impl Highlighter {
    /// Loads the bundled grammars and themes. Constructed once per worker;
    /// the load is too expensive to repeat per block.
    pub fn new() -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
        }
    }

    /// Highlight `source` as `language` under `theme`.
    ///
    /// Falls back to plain text when the language is unknown, and to an
    /// escaped `<pre>` when the highlighting engine itself fails.
    pub fn highlight(&self, language: &str, source: &str, theme: Theme) -> String {
        let syntax = match self.syntax_set.find_syntax_by_token(language) {
            Some(s) => s,
            None => {
                debug!("highlight: unknown language '{language}', retrying as plain text");
                self.syntax_set.find_syntax_plain_text()
            }
        };
        let st = match self.theme_set.themes.get(theme.syntect) {
            Some(t) => t,
            None => return plain_block(source),
        };
        match highlighted_html_for_string(source, &self.syntax_set, syntax, st) {
            Ok(html) => html,
            Err(e) => {
                debug!("highlight: engine failed for '{language}': {e}");
                plain_block(source)
            }
        }
    }
}

/// Unstyled preformatted fallback, also shown while highlighting is pending
/// so content is never blank.
pub fn plain_block(source: &str) -> String {
    let mut escaped = String::with_capacity(source.len());
    for ch in source.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    format!("<pre><code>{escaped}</code></pre>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme;

    fn light() -> Theme {
        theme::get("light").unwrap()
    }

    #[test]
    fn known_language_produces_markup() {
        let h = Highlighter::new();
        let html = h.highlight("rust", "fn main() {}\n", light());
        assert!(html.contains("<pre"));
        assert!(html.contains("main"));
    }

    #[test]
    fn unknown_language_falls_back_to_plain_text() {
        let h = Highlighter::new();
        let html = h.highlight("no-such-language", "plain enough\n", light());
        assert!(html.contains("plain enough"));
    }

    #[test]
    fn plain_block_escapes_markup() {
        let html = plain_block("<script>&x</script>");
        assert_eq!(
            html,
            "<pre><code>&lt;script&gt;&amp;x&lt;/script&gt;</code></pre>"
        );
    }

    #[test]
    fn dark_theme_highlights_too() {
        let h = Highlighter::new();
        let html = h.highlight("rust", "let x = 1;\n", theme::get("dark").unwrap());
        assert!(html.contains("<pre"));
    }
}
