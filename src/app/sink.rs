//! Where the assembled view goes.
//!
//! The visual layer (styling, widgets) is out of scope for this client, so
//! the app hands each settled view to a [`ViewSink`]. The bundled
//! [`FileSink`] mirrors the view into an HTML file that can be watched or
//! inspected; hosts embedding the library provide their own sink.

use std::path::PathBuf;

use log::{debug, error};

use crate::document::escape_html;
use crate::outline::Heading;

/// One assembled view of the client state.
pub struct ViewSnapshot<'a> {
    pub title: String,
    /// Rendered document body (or the loading / empty placeholder).
    pub html: String,
    pub outline: &'a [Heading],
    pub active_heading: Option<String>,
    pub sidebar_visible: bool,
    /// Navigable location encoding the active group.
    pub location: String,
    pub loading: bool,
}

pub trait ViewSink {
    fn present(&mut self, view: &ViewSnapshot);
}

/// Mirrors each view into a single HTML file (atomically via rename).
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn page(view: &ViewSnapshot) -> String {
        let mut toc = String::new();
        if !view.outline.is_empty() {
            toc.push_str("<nav class=\"toc\"><ul>\n");
            for h in view.outline {
                let class = if view.active_heading.as_deref() == Some(h.id.as_str()) {
                    " class=\"active\""
                } else {
                    ""
                };
                toc.push_str(&format!(
                    "<li data-level=\"{}\"{class}><a href=\"#{}\">{}</a></li>\n",
                    h.level,
                    h.id,
                    escape_html(&h.text)
                ));
            }
            toc.push_str("</ul></nav>\n");
        }
        format!(
            "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n\
             <body>\n{toc}<article class=\"markdown-body\">\n{}</article>\n</body>\n</html>\n",
            escape_html(&view.title),
            view.html
        )
    }
}

impl ViewSink for FileSink {
    fn present(&mut self, view: &ViewSnapshot) {
        let page = Self::page(view);
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::write(&tmp, &page).and_then(|()| std::fs::rename(&tmp, &self.path));
        match result {
            Ok(()) => debug!(
                "sink: wrote {} ({} bytes, title='{}')",
                self.path.display(),
                page.len(),
                view.title
            ),
            Err(e) => error!("sink: failed to write {}: {e}", self.path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(outline: &[Heading]) -> ViewSnapshot<'_> {
        ViewSnapshot {
            title: "a.md".into(),
            html: "<p>hi</p>\n".into(),
            outline,
            active_heading: Some("first".into()),
            sidebar_visible: false,
            location: "/".into(),
            loading: false,
        }
    }

    #[test]
    fn page_includes_toc_and_active_marker() {
        let outline = vec![
            Heading {
                id: "first".into(),
                text: "First".into(),
                level: 1,
            },
            Heading {
                id: "second".into(),
                text: "Second".into(),
                level: 2,
            },
        ];
        let page = FileSink::page(&snapshot(&outline));
        assert!(page.contains("<title>a.md</title>"));
        assert!(page.contains("<li data-level=\"1\" class=\"active\"><a href=\"#first\">First</a></li>"));
        assert!(page.contains("<a href=\"#second\">Second</a>"));
        assert!(page.contains("<p>hi</p>"));
    }

    #[test]
    fn page_without_outline_has_no_toc() {
        let page = FileSink::page(&snapshot(&[]));
        assert!(!page.contains("<nav"));
    }
}
