//! Main event loop.
//!
//! All mutable state lives on this thread. Workers are I/O-only and report
//! back through one mpsc fan-in:
//!
//!   fetch worker     — catalog and content requests, processed FIFO
//!   highlight worker — syntect runs, one per code block
//!   diagram worker   — serialized by the render queue (see `diagram`)
//!   channel thread   — the SSE connection, one per connection attempt
//!
//! Stale-result protection: content fetches are stamped with the document
//! sequence current at submission (advanced when the open file or its
//! revision changes), and highlight/diagram requests are stamped with the
//! render pass (advanced on every re-render, including view-mode and theme
//! changes). Results that arrive for a superseded stamp are dropped on
//! receipt. Last request wins; nothing is aborted in flight.

mod sink;

pub use sink::{FileSink, ViewSink, ViewSnapshot};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, error, info};

use crate::api::{Backend, FileContent, Group};
use crate::catalog::CatalogState;
use crate::config::{self, PanelConfig};
use crate::diagram::{DiagramQueue, DiagramResult};
use crate::document::{self, LOAD_FAILED_TEXT, RenderState, RenderedDocument, ViewMode};
use crate::events::{self, ChannelEvent};
use crate::highlight::Highlighter;
use crate::outline::{Heading, OutlinePublisher};
use crate::resolve::{self, LinkResolution};
use crate::theme::Theme;
use crate::tracker::{ActiveHeadingTracker, Viewport};

/// Delay before the single recovery refresh after a channel failure.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

const IDLE_TIMEOUT: Duration = Duration::from_secs(86400);

/// Fan-in event for the main loop.
pub enum AppEvent {
    Channel(ChannelEvent),
    CatalogFetched(Result<Vec<Group>>),
    ContentFetched {
        seq: u64,
        result: Result<FileContent>,
    },
    HighlightDone {
        pass: u64,
        block: usize,
        html: String,
    },
    DiagramDone(DiagramResult),
}

enum FetchJob {
    Catalog,
    Content { seq: u64, file_id: u64 },
}

struct HighlightJob {
    pass: u64,
    block: usize,
    language: String,
    source: String,
    theme: Theme,
}

/// State of the open document. Replaced wholesale when the active file
/// changes.
struct OpenDocument {
    file_id: u64,
    state: RenderState,
    rendered: RenderedDocument,
    /// Async results keyed by block index, for the current sequence only.
    resolved: HashMap<usize, String>,
    loading: bool,
}

pub struct App<S: ViewSink> {
    backend: Arc<dyn Backend>,
    tx: Sender<AppEvent>,
    rx: Receiver<AppEvent>,
    fetch_tx: Sender<FetchJob>,
    highlight_tx: Sender<HighlightJob>,
    diagrams: DiagramQueue,
    catalog: CatalogState,
    doc: Option<OpenDocument>,
    /// Bumped whenever the open file or its revision changes.
    doc_seq: u64,
    /// Bumped on every render; invalidates in-flight highlight and diagram
    /// results from superseded passes.
    render_pass: u64,
    outline_pub: OutlinePublisher,
    outline: Vec<Heading>,
    tracker: ActiveHeadingTracker,
    theme: Theme,
    panels: PanelConfig,
    /// Deadline of the single scheduled recovery refresh, if any.
    scheduled_refresh: Option<Instant>,
    sink: S,
}

impl<S: ViewSink> App<S> {
    pub fn new(
        backend: Arc<dyn Backend>,
        initial_location: &str,
        theme: Theme,
        panels: PanelConfig,
        sink: S,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<AppEvent>();

        // Fetch worker: FIFO over catalog and content requests. Results
        // carry the sequence they were submitted under; the main loop
        // discards anything stale.
        let (fetch_tx, fetch_rx) = mpsc::channel::<FetchJob>();
        {
            let backend = Arc::clone(&backend);
            let tx = tx.clone();
            thread::spawn(move || {
                debug!("fetch worker: started");
                while let Ok(job) = fetch_rx.recv() {
                    let event = match job {
                        FetchJob::Catalog => AppEvent::CatalogFetched(backend.fetch_groups()),
                        FetchJob::Content { seq, file_id } => AppEvent::ContentFetched {
                            seq,
                            result: backend.fetch_content(file_id),
                        },
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                debug!("fetch worker: channel closed, exiting");
            });
        }

        // Highlight worker: owns the grammar set (expensive to load).
        let (highlight_tx, highlight_rx) = mpsc::channel::<HighlightJob>();
        {
            let tx = tx.clone();
            thread::spawn(move || {
                debug!("highlight worker: started");
                let highlighter = Highlighter::new();
                while let Ok(job) = highlight_rx.recv() {
                    let html = highlighter.highlight(&job.language, &job.source, job.theme);
                    let event = AppEvent::HighlightDone {
                        pass: job.pass,
                        block: job.block,
                        html,
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                debug!("highlight worker: channel closed, exiting");
            });
        }

        let diagrams = {
            let tx = tx.clone();
            DiagramQueue::spawn(move |res| {
                let _ = tx.send(AppEvent::DiagramDone(res));
            })
        };

        Self {
            backend,
            tx,
            rx,
            fetch_tx,
            highlight_tx,
            diagrams,
            catalog: CatalogState::new(initial_location),
            doc: None,
            doc_seq: 0,
            render_pass: 0,
            outline_pub: OutlinePublisher::new(),
            outline: Vec::new(),
            tracker: ActiveHeadingTracker::new(),
            theme,
            panels,
            scheduled_refresh: None,
            sink,
        }
    }

    /// Initial catalog refresh plus the first channel connection.
    pub fn start(&mut self) {
        self.submit_catalog_refresh();
        self.connect_channel();
        self.emit();
    }

    /// Run until every event source has gone away.
    pub fn run(mut self) -> Result<()> {
        self.start();
        loop {
            let timeout = match self.scheduled_refresh {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => IDLE_TIMEOUT,
            };
            match self.rx.recv_timeout(timeout) {
                Ok(event) => self.handle(event),
                Err(RecvTimeoutError::Timeout) => self.fire_scheduled_refresh(),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }

    /// Handle at most one pending event. Returns false when none arrived
    /// within `timeout`. Drives the same paths as `run`; used by tests.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        self.fire_scheduled_refresh();
        match self.rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle(event);
                true
            }
            Err(_) => false,
        }
    }

    fn fire_scheduled_refresh(&mut self) {
        if let Some(deadline) = self.scheduled_refresh {
            if Instant::now() >= deadline {
                info!("app: channel recovery — refreshing catalog and reconnecting");
                self.scheduled_refresh = None;
                self.submit_catalog_refresh();
                self.connect_channel();
            }
        }
    }

    /// Open a fresh channel connection. A dropped connection is never
    /// resumed in place; each attempt gets its own thread and reader.
    fn connect_channel(&self) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();
        thread::spawn(move || {
            let deliver = move |ev| {
                let _ = tx.send(AppEvent::Channel(ev));
            };
            match backend.open_events() {
                Ok(reader) => events::run_channel(reader, deliver),
                Err(e) => {
                    info!("app: channel connect failed: {e:#}");
                    deliver(ChannelEvent::Closed);
                }
            }
        });
    }

    fn submit_catalog_refresh(&self) {
        if self.fetch_tx.send(FetchJob::Catalog).is_err() {
            error!("app: fetch worker gone");
        }
    }

    pub fn handle(&mut self, event: AppEvent) {
        match event {
            AppEvent::Channel(ChannelEvent::CatalogChanged) => {
                debug!("app: catalog changed server-side");
                self.submit_catalog_refresh();
            }
            AppEvent::Channel(ChannelEvent::FileChanged { id }) => self.on_file_changed(id),
            AppEvent::Channel(ChannelEvent::Closed) => {
                // One recovery action per closed channel; content is fetched
                // lazily, so nothing else needs repair here.
                info!(
                    "app: channel closed, scheduling refresh in {}s",
                    RECONNECT_DELAY.as_secs()
                );
                self.scheduled_refresh = Some(Instant::now() + RECONNECT_DELAY);
            }
            AppEvent::CatalogFetched(Ok(groups)) => {
                self.catalog.apply_refresh(groups);
                self.sync_open_document();
            }
            AppEvent::CatalogFetched(Err(e)) => {
                // Server may not be ready yet; the next trigger retries.
                debug!("app: catalog refresh failed: {e:#}");
            }
            AppEvent::ContentFetched { seq, result } => self.on_content(seq, result),
            AppEvent::HighlightDone { pass, block, html } => {
                if pass != self.render_pass {
                    debug!("app: dropping stale highlight (pass {pass} != {})", self.render_pass);
                    return;
                }
                if let Some(doc) = self.doc.as_mut() {
                    doc.resolved.insert(block, html);
                    self.emit();
                }
            }
            AppEvent::DiagramDone(res) => {
                if res.pass != self.render_pass {
                    debug!(
                        "app: dropping stale diagram render {} (pass {} != {})",
                        res.render_id, res.pass, self.render_pass
                    );
                    return;
                }
                match res.outcome {
                    Ok(svg) => {
                        if let Some(doc) = self.doc.as_mut() {
                            doc.resolved.insert(res.block, svg);
                            self.emit();
                        }
                    }
                    // Leaving the block unresolved keeps the raw-source
                    // fallback visible.
                    Err(e) => debug!("app: diagram render {} failed: {e}", res.render_id),
                }
            }
        }
    }

    fn on_file_changed(&mut self, id: u64) {
        let Some(doc) = self.doc.as_mut() else {
            return;
        };
        if doc.file_id != id {
            // Unopened files are fetched lazily; nothing to invalidate.
            return;
        }
        doc.state.revision += 1;
        self.doc_seq += 1;
        doc.loading = true;
        info!(
            "app: open file {id} changed externally, re-fetching (revision {})",
            doc.state.revision
        );
        let job = FetchJob::Content {
            seq: self.doc_seq,
            file_id: id,
        };
        if self.fetch_tx.send(job).is_err() {
            error!("app: fetch worker gone");
        }
        self.emit();
    }

    fn on_content(&mut self, seq: u64, result: Result<FileContent>) {
        if seq != self.doc_seq {
            debug!("app: dropping stale content fetch (seq {seq} != {})", self.doc_seq);
            return;
        }
        let Some(doc) = self.doc.as_mut() else {
            return;
        };
        doc.loading = false;
        doc.state.content = match result {
            Ok(content) => content.content,
            Err(e) => {
                debug!("app: content fetch failed: {e:#}");
                LOAD_FAILED_TEXT.to_string()
            }
        };
        self.render_document();
    }

    /// Align the open document with the catalog's selection.
    fn sync_open_document(&mut self) {
        match self.catalog.active_file_id() {
            Some(id) => {
                let already_open = self.doc.as_ref().is_some_and(|d| d.file_id == id);
                if !already_open {
                    self.open_file(id);
                    return;
                }
            }
            None => {
                self.doc = None;
                self.publish_outline(RenderedDocument::default());
            }
        }
        self.emit();
    }

    /// Replace the open document with a fresh one and fetch its content.
    fn open_file(&mut self, id: u64) {
        info!("app: opening file {id}");
        self.doc_seq += 1;
        self.doc = Some(OpenDocument {
            file_id: id,
            state: RenderState::default(),
            rendered: RenderedDocument::default(),
            resolved: HashMap::new(),
            loading: true,
        });
        let job = FetchJob::Content {
            seq: self.doc_seq,
            file_id: id,
        };
        if self.fetch_tx.send(job).is_err() {
            error!("app: fetch worker gone");
        }
        self.emit();
    }

    /// One settled render: rebuild blocks, submit async work, republish the
    /// outline exactly once, present. Advancing the render pass invalidates
    /// highlight and diagram results still in flight for the previous pass,
    /// so a view-mode or theme change never shows superseded output.
    fn render_document(&mut self) {
        self.render_pass += 1;
        let pass = self.render_pass;
        let theme = self.theme;
        let dark = theme.dark;
        let Some(doc) = self.doc.as_mut() else {
            return;
        };
        doc.rendered = match doc.state.view_mode {
            ViewMode::Formatted => document::render_formatted(&doc.state.content, doc.file_id),
            ViewMode::Raw => document::render_raw(&doc.state.content),
        };
        doc.resolved.clear();

        for (block, language, source) in doc.rendered.code_blocks() {
            let job = HighlightJob {
                pass,
                block,
                language: language.to_string(),
                source: source.to_string(),
                theme,
            };
            if self.highlight_tx.send(job).is_err() {
                error!("app: highlight worker gone");
            }
        }
        for (block, source) in doc.rendered.diagram_blocks() {
            self.diagrams.submit(pass, block, source.to_string(), dark);
        }

        let outline = RenderedDocument {
            blocks: Vec::new(),
            outline: doc.rendered.outline.clone(),
            anchors: doc.rendered.anchors.clone(),
        };
        self.publish_outline(outline);
        self.emit();
    }

    fn publish_outline(&mut self, rendered: RenderedDocument) {
        if self.outline_pub.publish(&rendered.outline) {
            self.outline = rendered.outline;
            self.tracker.set_headings(rendered.anchors);
        }
    }

    // --- host surface -----------------------------------------------------

    /// Switch between formatted and raw view. Reuses loaded content; never
    /// triggers a fetch.
    pub fn toggle_view_mode(&mut self) {
        let Some(doc) = self.doc.as_mut() else {
            return;
        };
        doc.state.view_mode = match doc.state.view_mode {
            ViewMode::Formatted => ViewMode::Raw,
            ViewMode::Raw => ViewMode::Formatted,
        };
        debug!("app: view mode -> {:?}", doc.state.view_mode);
        self.render_document();
    }

    /// Activate a link from the rendered document.
    ///
    /// Markdown links resolve server-side relative to the open document and
    /// switch the selection on success; resolution failure leaves the link
    /// inert. External links are handed to the OS. Hash and passthrough
    /// links are the host's concern.
    pub fn activate_link(&mut self, href: &str) {
        let Some(file_id) = self.doc.as_ref().map(|d| d.file_id) else {
            return;
        };
        match resolve::resolve_link(Some(href), file_id) {
            LinkResolution::Markdown { href_path } => {
                match self.backend.open_relative(file_id, &href_path) {
                    Ok(entry) => {
                        debug!("app: opened {href_path} as file {}", entry.id);
                        self.catalog.select_file(entry.id);
                        self.sync_open_document();
                    }
                    Err(e) => debug!("app: open-relative failed for {href_path}: {e:#}"),
                }
            }
            LinkResolution::External => {
                if let Err(e) = open::that_detached(href) {
                    debug!("app: could not open external link: {e}");
                }
            }
            _ => {}
        }
    }

    pub fn switch_group(&mut self, name: &str) {
        self.catalog.switch_group(name);
        self.sync_open_document();
    }

    pub fn select_file(&mut self, id: u64) {
        self.catalog.select_file(id);
        self.sync_open_document();
    }

    /// Report the content viewport (scroll offset and height) so the
    /// active heading can track it.
    pub fn set_scroll(&mut self, scroll_y: f32, height: f32) {
        self.tracker.set_viewport(Some(Viewport { scroll_y, height }));
        self.emit();
    }

    /// Change the color theme: persists the preference and re-renders every
    /// displayed diagram and code block under the new palette.
    pub fn set_theme(&mut self, theme: Theme) {
        if self.theme == theme {
            return;
        }
        info!("app: theme -> {}", theme.name);
        self.theme = theme;
        self.save_preferences();
        if self.doc.is_some() {
            self.render_document();
        }
    }

    /// Resize the side panels; widths are clamped and persisted.
    pub fn set_panel_widths(&mut self, sidebar: u32, outline: u32) {
        self.panels = PanelConfig {
            sidebar_width: config::clamp_panel_width(sidebar),
            outline_width: config::clamp_panel_width(outline),
        };
        self.save_preferences();
    }

    fn save_preferences(&self) {
        if let Err(e) = config::save_preferences(self.theme.name, self.panels) {
            debug!("app: could not save preferences: {e:#}");
        }
    }

    // --- view assembly ----------------------------------------------------

    fn title(&self) -> String {
        self.catalog
            .active_file()
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "mdlive".to_string())
    }

    fn emit(&mut self) {
        let html = match self.doc.as_ref() {
            None => "<p>No file selected</p>".to_string(),
            Some(doc) if doc.loading => "<p>Loading...</p>".to_string(),
            Some(doc) => document::compose(&doc.rendered.blocks, &doc.resolved),
        };
        let snapshot = ViewSnapshot {
            title: self.title(),
            html,
            outline: &self.outline,
            active_heading: self.tracker.active().map(str::to_string),
            sidebar_visible: self.catalog.sidebar_visible(),
            location: self.catalog.location().to_string(),
            loading: self.doc.as_ref().is_some_and(|d| d.loading),
        };
        self.sink.present(&snapshot);
    }

    // --- read side (hosts and tests) --------------------------------------

    pub fn catalog(&self) -> &CatalogState {
        &self.catalog
    }

    pub fn outline(&self) -> &[Heading] {
        &self.outline
    }

    pub fn active_heading(&self) -> Option<&str> {
        self.tracker.active()
    }

    pub fn view_mode(&self) -> Option<ViewMode> {
        self.doc.as_ref().map(|d| d.state.view_mode)
    }

    pub fn revision(&self) -> Option<u64> {
        self.doc.as_ref().map(|d| d.state.revision)
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn panels(&self) -> PanelConfig {
        self.panels
    }
}
