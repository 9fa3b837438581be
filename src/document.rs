//! Document pipeline: markdown source → renderable block list + outline.
//!
//! One render pass walks the pulldown-cmark event stream and produces a
//! sequence of blocks. Static markup becomes `Block::Html` segments; fenced
//! code and diagrams become their own blocks so their asynchronous results
//! (highlighting, diagram SVG) can replace them without re-walking the
//! document. Headings, links and images are intercepted during the walk:
//! headings collect the outline and receive anchor ids, links and images go
//! through the resolver so local references hit the raw-asset endpoint.
//!
//! Raw view skips the transformation entirely: the whole source becomes a
//! single code block highlighted as markdown, and the outline is empty.

use pulldown_cmark::{
    Alignment, BlockQuoteKind, CodeBlockKind, Event, Options, Parser, Tag, TagEnd,
};

use crate::outline::{Heading, Slugger};
use crate::resolve::{self, LinkResolution};
use crate::tracker::HeadingPosition;

/// Literal fallback shown when a content fetch fails.
pub const LOAD_FAILED_TEXT: &str = "Failed to load file.";

/// Vertical pixels assigned to one source line when estimating heading
/// positions for the scroll tracker.
const LINE_HEIGHT_PX: f32 = 24.0;

/// Which rendering the viewer shows for the open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    Formatted,
    Raw,
}

/// Per-open-file state. Destroyed and recreated whenever the active file id
/// changes; the revision is bumped by external change notifications to force
/// a re-fetch without changing file identity.
#[derive(Debug, Default)]
pub struct RenderState {
    pub content: String,
    pub revision: u64,
    pub view_mode: ViewMode,
}

/// One unit of the rendered document.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// Static markup, final as soon as the render pass ends.
    Html(String),
    /// Fenced code awaiting (or holding) a highlight result.
    Code { language: String, source: String },
    /// Diagram source awaiting (or holding) an SVG from the render queue.
    Diagram { source: String },
}

/// Result of one render pass.
#[derive(Debug, Default)]
pub struct RenderedDocument {
    pub blocks: Vec<Block>,
    /// Headings with non-empty anchors, in document order.
    pub outline: Vec<Heading>,
    /// Estimated vertical positions of the outline entries, for the
    /// active-heading tracker. Parallel to `outline`.
    pub anchors: Vec<HeadingPosition>,
}

impl RenderedDocument {
    /// Indexes of blocks that need a highlight result.
    pub fn code_blocks(&self) -> impl Iterator<Item = (usize, &str, &str)> {
        self.blocks.iter().enumerate().filter_map(|(i, b)| match b {
            Block::Code { language, source } => Some((i, language.as_str(), source.as_str())),
            _ => None,
        })
    }

    /// Indexes of blocks that need a diagram render.
    pub fn diagram_blocks(&self) -> impl Iterator<Item = (usize, &str)> {
        self.blocks.iter().enumerate().filter_map(|(i, b)| match b {
            Block::Diagram { source } => Some((i, source.as_str())),
            _ => None,
        })
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub(crate) fn escape_attr(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn alert_meta(kind: BlockQuoteKind) -> (&'static str, &'static str) {
    match kind {
        BlockQuoteKind::Note => ("note", "Note"),
        BlockQuoteKind::Tip => ("tip", "Tip"),
        BlockQuoteKind::Important => ("important", "Important"),
        BlockQuoteKind::Warning => ("warning", "Warning"),
        BlockQuoteKind::Caution => ("caution", "Caution"),
    }
}

/// Capture state for an open heading: inline HTML plus flattened text.
struct HeadingCapture {
    level: u8,
    html: String,
    text: String,
    source_line: usize,
}

/// Capture state for an open image: alt text is flattened from the inline
/// content between the start and end events.
struct ImageCapture {
    src: Option<String>,
    title: String,
    alt: String,
}

/// Render markdown to blocks in formatted mode.
///
/// Enabled extensions match the GitHub-flavored surface the backend's users
/// write: tables, strikethrough, task lists and alert blockquotes. Raw HTML
/// passes through untouched.
pub fn render_formatted(content: &str, file_id: u64) -> RenderedDocument {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_GFM);
    let parser = Parser::new_ext(content, options);

    // Byte offset → source line, for heading position estimates.
    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(content.char_indices().filter_map(|(i, c)| {
            if c == '\n' { Some(i + 1) } else { None }
        }))
        .collect();
    let line_of = |offset: usize| line_starts.partition_point(|&s| s <= offset).saturating_sub(1);

    let mut doc = RenderedDocument::default();
    let mut out = String::new();
    let mut slugger = Slugger::new();
    let mut heading: Option<HeadingCapture> = None;
    let mut image: Option<ImageCapture> = None;
    let mut code_buf: Option<(String, String)> = None; // (language, source)
    let mut table_alignments: Vec<Alignment> = Vec::new();
    let mut table_cell_index = 0usize;
    let mut in_table_head = false;

    // Route inline markup to the innermost open capture.
    macro_rules! push {
        ($s:expr) => {{
            let s: &str = $s;
            if let Some(h) = heading.as_mut() {
                h.html.push_str(s);
            } else {
                out.push_str(s);
            }
        }};
    }

    let flush_html = |out: &mut String, doc: &mut RenderedDocument| {
        if !out.is_empty() {
            doc.blocks.push(Block::Html(std::mem::take(out)));
        }
    };

    for (event, range) in parser.into_offset_iter() {
        match event {
            // === Captured content ===
            Event::Text(text) => {
                if let Some((_, buf)) = code_buf.as_mut() {
                    buf.push_str(&text);
                } else if let Some(img) = image.as_mut() {
                    img.alt.push_str(&text);
                } else if let Some(h) = heading.as_mut() {
                    h.text.push_str(&text);
                    h.html.push_str(&escape_html(&text));
                } else {
                    out.push_str(&escape_html(&text));
                }
            }
            Event::Code(code) => {
                if let Some(img) = image.as_mut() {
                    img.alt.push_str(&code);
                } else if let Some(h) = heading.as_mut() {
                    h.text.push_str(&code);
                    h.html
                        .push_str(&format!("<code>{}</code>", escape_html(&code)));
                } else {
                    out.push_str(&format!("<code>{}</code>", escape_html(&code)));
                }
            }

            // === Headings ===
            Event::Start(Tag::Heading { level, .. }) => {
                heading = Some(HeadingCapture {
                    level: level as u8,
                    html: String::new(),
                    text: String::new(),
                    source_line: line_of(range.start),
                });
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some(h) = heading.take() {
                    let slug = slugger.slug(&h.text);
                    let level = h.level;
                    if slug.is_empty() {
                        out.push_str(&format!("<h{level}>{}</h{level}>\n", h.html));
                    } else {
                        out.push_str(&format!(
                            "<h{level} id=\"{}\">{}</h{level}>\n",
                            escape_attr(&slug),
                            h.html
                        ));
                        doc.outline.push(Heading {
                            id: slug.clone(),
                            text: h.text,
                            level,
                        });
                        doc.anchors.push(HeadingPosition {
                            id: slug,
                            y: h.source_line as f32 * LINE_HEIGHT_PX,
                        });
                    }
                }
            }

            // === Fenced code / diagrams ===
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .unwrap_or("")
                        .to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                code_buf = Some((language, String::new()));
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some((language, mut source)) = code_buf.take() {
                    if source.ends_with('\n') {
                        source.pop();
                    }
                    if language.is_empty() {
                        out.push_str(&format!(
                            "<pre><code>{}</code></pre>\n",
                            escape_html(&source)
                        ));
                    } else {
                        flush_html(&mut out, &mut doc);
                        if language == "mermaid" {
                            doc.blocks.push(Block::Diagram { source });
                        } else {
                            doc.blocks.push(Block::Code { language, source });
                        }
                    }
                }
            }

            // === Links ===
            Event::Start(Tag::Link { dest_url, title, .. }) => {
                let title_attr = if title.is_empty() {
                    String::new()
                } else {
                    format!(" title=\"{}\"", escape_attr(&title))
                };
                let tag = match resolve::resolve_link(Some(&dest_url), file_id) {
                    LinkResolution::External => format!(
                        "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\"{title_attr}>",
                        escape_attr(&dest_url)
                    ),
                    LinkResolution::Hash | LinkResolution::Passthrough => {
                        format!("<a href=\"{}\"{title_attr}>", escape_attr(&dest_url))
                    }
                    LinkResolution::Markdown { href_path } => format!(
                        "<a href=\"{}\" data-md-path=\"{}\"{title_attr}>",
                        escape_attr(&dest_url),
                        escape_attr(&href_path)
                    ),
                    LinkResolution::File { raw_url } => {
                        format!("<a href=\"{}\"{title_attr}>", escape_attr(&raw_url))
                    }
                };
                push!(&tag);
            }
            Event::End(TagEnd::Link) => push!("</a>"),

            // === Images ===
            Event::Start(Tag::Image { dest_url, title, .. }) => {
                image = Some(ImageCapture {
                    src: resolve::resolve_image_src(Some(&dest_url), file_id),
                    title: title.to_string(),
                    alt: String::new(),
                });
            }
            Event::End(TagEnd::Image) => {
                if let Some(img) = image.take() {
                    let mut tag = String::from("<img");
                    if let Some(src) = img.src {
                        tag.push_str(&format!(" src=\"{}\"", escape_attr(&src)));
                    }
                    tag.push_str(&format!(" alt=\"{}\"", escape_attr(&img.alt)));
                    if !img.title.is_empty() {
                        tag.push_str(&format!(" title=\"{}\"", escape_attr(&img.title)));
                    }
                    tag.push_str(" />");
                    push!(&tag);
                }
            }

            // === Block structure ===
            Event::Start(Tag::Paragraph) => push!("<p>"),
            Event::End(TagEnd::Paragraph) => push!("</p>\n"),
            Event::Start(Tag::BlockQuote(Some(kind))) => {
                let (class, label) = alert_meta(kind);
                out.push_str(&format!(
                    "<div class=\"markdown-alert markdown-alert-{class}\">\
                     <p class=\"markdown-alert-title\">{label}</p>\n"
                ));
            }
            Event::Start(Tag::BlockQuote(None)) => push!("<blockquote>\n"),
            Event::End(TagEnd::BlockQuote(kind)) => {
                if kind.is_some() {
                    out.push_str("</div>\n");
                } else {
                    push!("</blockquote>\n");
                }
            }
            Event::Start(Tag::List(Some(start))) => {
                if start == 1 {
                    push!("<ol>\n");
                } else {
                    push!(&format!("<ol start=\"{start}\">\n"));
                }
            }
            Event::Start(Tag::List(None)) => push!("<ul>\n"),
            Event::End(TagEnd::List(ordered)) => {
                if ordered {
                    push!("</ol>\n");
                } else {
                    push!("</ul>\n");
                }
            }
            Event::Start(Tag::Item) => push!("<li>"),
            Event::End(TagEnd::Item) => push!("</li>\n"),
            Event::TaskListMarker(checked) => {
                if checked {
                    push!("<input type=\"checkbox\" disabled checked /> ");
                } else {
                    push!("<input type=\"checkbox\" disabled /> ");
                }
            }

            // === Tables ===
            Event::Start(Tag::Table(alignments)) => {
                table_alignments = alignments;
                out.push_str("<table>");
            }
            Event::End(TagEnd::Table) => out.push_str("</tbody></table>\n"),
            Event::Start(Tag::TableHead) => {
                in_table_head = true;
                table_cell_index = 0;
                out.push_str("<thead><tr>");
            }
            Event::End(TagEnd::TableHead) => {
                in_table_head = false;
                out.push_str("</tr></thead><tbody>");
            }
            Event::Start(Tag::TableRow) => {
                table_cell_index = 0;
                out.push_str("<tr>");
            }
            Event::End(TagEnd::TableRow) => out.push_str("</tr>\n"),
            Event::Start(Tag::TableCell) => {
                let tag = if in_table_head { "th" } else { "td" };
                let align = match table_alignments.get(table_cell_index) {
                    Some(Alignment::Left) => " align=\"left\"",
                    Some(Alignment::Center) => " align=\"center\"",
                    Some(Alignment::Right) => " align=\"right\"",
                    _ => "",
                };
                table_cell_index += 1;
                out.push_str(&format!("<{tag}{align}>"));
            }
            Event::End(TagEnd::TableCell) => {
                let tag = if in_table_head { "th" } else { "td" };
                out.push_str(&format!("</{tag}>"));
            }

            // === Inline emphasis ===
            Event::Start(Tag::Strong) => push!("<strong>"),
            Event::End(TagEnd::Strong) => push!("</strong>"),
            Event::Start(Tag::Emphasis) => push!("<em>"),
            Event::End(TagEnd::Emphasis) => push!("</em>"),
            Event::Start(Tag::Strikethrough) => push!("<del>"),
            Event::End(TagEnd::Strikethrough) => push!("</del>"),

            // === Raw HTML passthrough ===
            Event::Html(html) | Event::InlineHtml(html) => push!(&html),
            Event::Start(Tag::HtmlBlock) | Event::End(TagEnd::HtmlBlock) => {}

            Event::SoftBreak => push!("\n"),
            Event::HardBreak => push!("<br />\n"),
            Event::Rule => push!("<hr />\n"),

            // Footnotes, math, metadata: extensions not enabled.
            _ => {}
        }
    }
    flush_html(&mut out, &mut doc);
    doc
}

/// Render the untransformed source for raw view: one code block highlighted
/// as markdown. The outline of a raw view is always empty.
pub fn render_raw(content: &str) -> RenderedDocument {
    RenderedDocument {
        blocks: vec![Block::Code {
            language: "markdown".to_string(),
            source: content.to_string(),
        }],
        outline: Vec::new(),
        anchors: Vec::new(),
    }
}

/// Compose the final HTML from blocks plus any resolved async results,
/// keyed by block index. Blocks without a result yet (or whose diagram
/// failed) show the raw source in an unstyled preformatted block.
pub fn compose(blocks: &[Block], resolved: &std::collections::HashMap<usize, String>) -> String {
    let mut html = String::new();
    for (i, block) in blocks.iter().enumerate() {
        match block {
            Block::Html(s) => html.push_str(s),
            Block::Code { source, .. } | Block::Diagram { source } => {
                match resolved.get(&i) {
                    Some(s) => html.push_str(s),
                    None => html.push_str(&crate::highlight::plain_block(source)),
                }
                html.push('\n');
            }
        }
    }
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn html_of(doc: &RenderedDocument) -> String {
        compose(&doc.blocks, &HashMap::new())
    }

    #[test]
    fn paragraph_renders() {
        let doc = render_formatted("hello *world*", 1);
        assert_eq!(html_of(&doc), "<p>hello <em>world</em></p>\n");
    }

    #[test]
    fn headings_get_anchor_ids_and_outline() {
        let doc = render_formatted("# First\n\n## Second Part\n", 1);
        let html = html_of(&doc);
        assert!(html.contains("<h1 id=\"first\">First</h1>"));
        assert!(html.contains("<h2 id=\"second-part\">Second Part</h2>"));
        assert_eq!(doc.outline.len(), 2);
        assert_eq!(doc.outline[0].id, "first");
        assert_eq!(doc.outline[0].level, 1);
        assert_eq!(doc.outline[1].id, "second-part");
        assert_eq!(doc.outline[1].level, 2);
    }

    #[test]
    fn duplicate_headings_get_distinct_anchors() {
        let doc = render_formatted("# Setup\n\n# Setup\n", 1);
        assert_eq!(doc.outline[0].id, "setup");
        assert_eq!(doc.outline[1].id, "setup-1");
    }

    #[test]
    fn heading_text_flattens_inline_markup() {
        let doc = render_formatted("# Using `mdlive` *now*\n", 1);
        assert_eq!(doc.outline[0].text, "Using mdlive now");
        assert_eq!(doc.outline[0].id, "using-mdlive-now");
    }

    #[test]
    fn punctuation_only_heading_is_not_tracked() {
        let doc = render_formatted("# !!!\n\n# Real\n", 1);
        assert_eq!(doc.outline.len(), 1);
        assert_eq!(doc.outline[0].id, "real");
        // The heading itself still renders, without an id.
        assert!(html_of(&doc).contains("<h1>!!!</h1>"));
    }

    #[test]
    fn anchors_are_ordered_by_document_position() {
        let doc = render_formatted("# A\n\ntext\n\n## B\n", 1);
        assert_eq!(doc.anchors.len(), 2);
        assert!(doc.anchors[0].y < doc.anchors[1].y);
    }

    #[test]
    fn fenced_code_becomes_code_block() {
        let doc = render_formatted("```rust\nfn main() {}\n```\n", 1);
        let codes: Vec<_> = doc.code_blocks().collect();
        assert_eq!(codes, vec![(0, "rust", "fn main() {}")]);
    }

    #[test]
    fn mermaid_fence_takes_the_diagram_path() {
        let doc = render_formatted("```mermaid\ngraph TD; A-->B;\n```\n", 1);
        let diagrams: Vec<_> = doc.diagram_blocks().collect();
        assert_eq!(diagrams, vec![(0, "graph TD; A-->B;")]);
        assert!(doc.code_blocks().next().is_none());
    }

    #[test]
    fn untagged_fence_renders_inline_escaped() {
        let doc = render_formatted("```\na < b\n```\n", 1);
        assert_eq!(html_of(&doc), "<pre><code>a &lt; b</code></pre>\n");
        assert!(doc.code_blocks().next().is_none());
    }

    #[test]
    fn external_link_opens_in_new_tab() {
        let doc = render_formatted("[site](https://example.invalid)", 1);
        assert!(html_of(&doc).contains(
            "<a href=\"https://example.invalid\" target=\"_blank\" rel=\"noopener noreferrer\">"
        ));
    }

    #[test]
    fn markdown_link_carries_resolved_path() {
        let doc = render_formatted("[guide](docs/guide.md#setup)", 3);
        let html = html_of(&doc);
        assert!(html.contains("data-md-path=\"docs/guide.md\""));
        assert!(html.contains("href=\"docs/guide.md#setup\""));
    }

    #[test]
    fn file_link_rewrites_to_raw_url() {
        let doc = render_formatted("[logo](assets/logo.svg)", 4);
        assert!(html_of(&doc).contains("href=\"/_/api/files/4/raw/assets/logo.svg\""));
    }

    #[test]
    fn hash_link_is_unmodified() {
        let doc = render_formatted("[jump](#section)", 1);
        assert!(html_of(&doc).contains("<a href=\"#section\">jump</a>"));
    }

    #[test]
    fn local_image_src_rewritten() {
        let doc = render_formatted("![a cat](img/cat.png)", 2);
        assert!(
            html_of(&doc)
                .contains("<img src=\"/_/api/files/2/raw/img/cat.png\" alt=\"a cat\" />")
        );
    }

    #[test]
    fn remote_image_src_untouched() {
        let doc = render_formatted("![c](https://example.invalid/c.png)", 2);
        assert!(html_of(&doc).contains("src=\"https://example.invalid/c.png\""));
    }

    #[test]
    fn alert_blockquote_recognized() {
        let doc = render_formatted("> [!NOTE]\n> Careful here.\n", 1);
        let html = html_of(&doc);
        assert!(html.contains("markdown-alert-note"));
        assert!(html.contains("<p class=\"markdown-alert-title\">Note</p>"));
        assert!(html.contains("Careful here."));
    }

    #[test]
    fn plain_blockquote_stays_blockquote() {
        let doc = render_formatted("> quoted\n", 1);
        assert!(html_of(&doc).contains("<blockquote>"));
    }

    #[test]
    fn gfm_table_renders() {
        let doc = render_formatted("| a | b |\n|:--|--:|\n| 1 | 2 |\n", 1);
        let html = html_of(&doc);
        assert!(html.contains("<th align=\"left\">a</th>"));
        assert!(html.contains("<th align=\"right\">b</th>"));
        assert!(html.contains("<td align=\"left\">1</td>"));
    }

    #[test]
    fn strikethrough_renders() {
        let doc = render_formatted("~~gone~~", 1);
        assert!(html_of(&doc).contains("<del>gone</del>"));
    }

    #[test]
    fn task_list_renders_checkboxes() {
        let doc = render_formatted("- [x] done\n- [ ] todo\n", 1);
        let html = html_of(&doc);
        assert!(html.contains("<input type=\"checkbox\" disabled checked />"));
        assert!(html.contains("<input type=\"checkbox\" disabled />"));
    }

    #[test]
    fn raw_html_passes_through() {
        let doc = render_formatted("before\n\n<div class=\"x\">kept</div>\n\nafter\n", 1);
        assert!(html_of(&doc).contains("<div class=\"x\">kept</div>"));
    }

    #[test]
    fn text_is_escaped() {
        let doc = render_formatted("a < b & c\n", 1);
        assert!(html_of(&doc).contains("a &lt; b &amp; c"));
    }

    #[test]
    fn raw_view_is_one_markdown_code_block_with_empty_outline() {
        let doc = render_raw("# Title\n\ncontent\n");
        assert!(doc.outline.is_empty());
        let codes: Vec<_> = doc.code_blocks().collect();
        assert_eq!(codes.len(), 1);
        assert_eq!(codes[0].1, "markdown");
    }

    #[test]
    fn compose_prefers_resolved_results() {
        let doc = render_formatted("```rust\nlet x = 1;\n```\n", 1);
        let mut resolved = HashMap::new();
        resolved.insert(0usize, "<pre class=\"hl\">done</pre>".to_string());
        let html = compose(&doc.blocks, &resolved);
        assert!(html.contains("class=\"hl\""));
        // Without the result the raw source shows instead of a blank.
        let pending = compose(&doc.blocks, &HashMap::new());
        assert!(pending.contains("let x = 1;"));
    }

    #[test]
    fn link_in_heading_still_collects_text() {
        let doc = render_formatted("## See [the guide](docs/guide.md)\n", 1);
        assert_eq!(doc.outline[0].text, "See the guide");
        assert!(html_of(&doc).contains("data-md-path=\"docs/guide.md\""));
    }
}
