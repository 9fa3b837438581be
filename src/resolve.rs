//! Link and asset classification for rendered documents.
//!
//! Every href/src that appears in a document is classified into exactly one
//! category, with no I/O. Local file references are rewritten to the server's
//! raw-asset endpoint so that images and downloads resolve relative to the
//! document they appear in.

/// How a link target should be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    /// Absent href, or an absolute `http(s)://` URL. Opens outside the viewer.
    External,
    /// Same-page anchor (`#...`), left unmodified.
    Hash,
    /// Another markdown document, resolved server-side relative to the
    /// current document. `href_path` has any `#fragment` stripped.
    Markdown { href_path: String },
    /// A non-markdown local file, rewritten to the raw-asset endpoint.
    File { raw_url: String },
    /// No file extension; assumed to be a directory-like reference the
    /// server does not serve. Left unmodified.
    Passthrough,
}

/// Build the raw-asset URL for `path` scoped to the document `file_id`.
pub fn raw_url(file_id: u64, path: &str) -> String {
    format!("/_/api/files/{file_id}/raw/{path}")
}

/// Classify a link href appearing in the document `file_id`.
pub fn resolve_link(href: Option<&str>, file_id: u64) -> LinkResolution {
    let href = match href {
        Some(h) if !h.is_empty() => h,
        _ => return LinkResolution::External,
    };
    if href.starts_with("http://") || href.starts_with("https://") {
        return LinkResolution::External;
    }
    if href.starts_with('#') {
        return LinkResolution::Hash;
    }
    // Strip a trailing #fragment before looking at the path itself.
    let href_path = href.split('#').next().unwrap_or(href);
    if href_path.ends_with(".md") {
        return LinkResolution::Markdown {
            href_path: href_path.to_string(),
        };
    }
    let basename = href_path.rsplit('/').next().unwrap_or("");
    if basename.contains('.') {
        // The fragment (if any) stays in the rewritten URL.
        return LinkResolution::File {
            raw_url: raw_url(file_id, href),
        };
    }
    LinkResolution::Passthrough
}

/// Rewrite an image src appearing in the document `file_id`.
///
/// Non-absolute sources are rewritten to the raw-asset endpoint; absolute
/// `http(s)://` sources and absent sources pass through unchanged. Images
/// never take the markdown or hash paths.
pub fn resolve_image_src(src: Option<&str>, file_id: u64) -> Option<String> {
    match src {
        Some(s) if !s.is_empty() && !s.starts_with("http://") && !s.starts_with("https://") => {
            Some(raw_url(file_id, s))
        }
        Some(s) => Some(s.to_string()),
        None => None,
    }
}
