//! Table-of-contents derivation from a single render pass.
//!
//! Each formatted render collects every heading that received a non-empty
//! anchor id, in document order. The outline is republished to the host only
//! when its shape actually changes, so scrolling and in-flight highlight
//! results do not cause redundant TOC updates.

use std::collections::HashMap;

use log::debug;

/// One entry of the document outline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    /// Anchor id. Always non-empty; headings whose slug collapses to the
    /// empty string are rendered but never tracked.
    pub id: String,
    /// Flattened text content of the heading.
    pub text: String,
    /// 1..=6.
    pub level: u8,
}

/// GitHub-style anchor slugger, scoped to one render pass.
///
/// Lowercases, keeps alphanumerics / `-` / `_`, maps whitespace to `-` and
/// drops everything else. Duplicate slugs get `-1`, `-2`, ... suffixes so
/// every heading in a document has a distinct anchor.
#[derive(Default)]
pub struct Slugger {
    seen: HashMap<String, usize>,
}

impl Slugger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slug(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if ch.is_whitespace() {
                out.push('-');
            } else if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                for lower in ch.to_lowercase() {
                    out.push(lower);
                }
            }
            // Other punctuation contributes nothing.
        }
        match self.seen.get_mut(&out) {
            Some(count) => {
                *count += 1;
                let n = *count;
                format!("{out}-{n}")
            }
            None => {
                self.seen.insert(out.clone(), 0);
                out
            }
        }
    }
}

/// Derived identity of an outline: ordered `id:level` pairs.
pub fn outline_key(headings: &[Heading]) -> String {
    let pairs: Vec<String> = headings
        .iter()
        .map(|h| format!("{}:{}", h.id, h.level))
        .collect();
    pairs.join(",")
}

/// Publishes an outline to the host only when its key changed.
#[derive(Default)]
pub struct OutlinePublisher {
    last_key: Option<String>,
}

impl OutlinePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the outline differs from the last published one.
    /// The caller forwards the headings to the TOC consumers only on `true`.
    pub fn publish(&mut self, headings: &[Heading]) -> bool {
        let key = outline_key(headings);
        if self.last_key.as_deref() == Some(key.as_str()) {
            return false;
        }
        debug!("outline: publishing {} headings (key={key})", headings.len());
        self.last_key = Some(key);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(id: &str, level: u8) -> Heading {
        Heading {
            id: id.into(),
            text: id.into(),
            level,
        }
    }

    #[test]
    fn slug_basic() {
        let mut s = Slugger::new();
        assert_eq!(s.slug("Hello World"), "hello-world");
    }

    #[test]
    fn slug_strips_punctuation() {
        let mut s = Slugger::new();
        assert_eq!(s.slug("What's new? (v2)"), "whats-new-v2");
    }

    #[test]
    fn slug_duplicates_get_suffixes() {
        let mut s = Slugger::new();
        assert_eq!(s.slug("Setup"), "setup");
        assert_eq!(s.slug("Setup"), "setup-1");
        assert_eq!(s.slug("Setup"), "setup-2");
    }

    #[test]
    fn slug_punctuation_only_is_empty() {
        let mut s = Slugger::new();
        assert_eq!(s.slug("!!!"), "");
    }

    #[test]
    fn slug_unicode_lowercased() {
        let mut s = Slugger::new();
        assert_eq!(s.slug("Überblick"), "überblick");
    }

    #[test]
    fn key_encodes_order_and_level() {
        let key = outline_key(&[h("a", 1), h("b", 2)]);
        assert_eq!(key, "a:1,b:2");
    }

    #[test]
    fn publisher_suppresses_identical_outline() {
        let mut p = OutlinePublisher::new();
        let headings = vec![h("a", 1), h("b", 2)];
        assert!(p.publish(&headings));
        assert!(!p.publish(&headings));
        // Level change alone is a new outline.
        assert!(p.publish(&[h("a", 1), h("b", 3)]));
    }

    #[test]
    fn publisher_publishes_initial_empty_outline() {
        let mut p = OutlinePublisher::new();
        assert!(p.publish(&[]));
        assert!(!p.publish(&[]));
    }
}
