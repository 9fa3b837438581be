//! Diagram render queue.
//!
//! The diagram engine keeps process-wide measurement state and is not safe
//! to drive from several places at once, so every render goes through one
//! FIFO queue drained by a single worker: one render in flight at a time,
//! each awarded a fresh monotonically increasing render id that is never
//! reused. Each render gets a detached scratch directory that is removed
//! when the render finishes, success or failure, so a failed render leaves
//! no stray artifacts behind. Engine failures degrade to the raw diagram
//! source; a theme change re-submits every displayed diagram.

use std::panic;
use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::thread;

use log::{debug, error};
use mermaid_rs_renderer::{
    config::LayoutConfig,
    layout::compute_layout,
    parser::parse_mermaid,
    render::render_svg,
    theme::Theme as MermaidTheme,
};

/// A queued diagram render.
pub struct DiagramJob {
    /// Globally unique per invocation, strictly increasing.
    pub render_id: u64,
    /// Render pass current at submission; results from superseded passes
    /// are dropped by the app.
    pub pass: u64,
    /// Block index within the rendered document.
    pub block: usize,
    pub source: String,
    pub dark: bool,
}

/// Outcome of one render. `Err` carries the engine's message; the app falls
/// back to showing the raw source.
pub struct DiagramResult {
    pub render_id: u64,
    pub pass: u64,
    pub block: usize,
    pub outcome: Result<String, String>,
}

/// Owner of the queue state: next render id and the submission side of the
/// single worker. Constructed once at startup and passed by handle; the
/// worker thread exits when the queue is dropped.
pub struct DiagramQueue {
    tx: Sender<DiagramJob>,
    next_render_id: u64,
}

impl DiagramQueue {
    /// Spawn the worker against the real diagram engine.
    pub fn spawn<F>(deliver: F) -> Self
    where
        F: FnMut(DiagramResult) + Send + 'static,
    {
        Self::spawn_with_renderer(deliver, render_diagram)
    }

    /// Worker with an injectable render function (used by tests to observe
    /// serialization without the engine).
    pub fn spawn_with_renderer<F, R>(mut deliver: F, render: R) -> Self
    where
        F: FnMut(DiagramResult) + Send + 'static,
        R: Fn(&str, bool) -> Result<String, String> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<DiagramJob>();
        // FIFO: each job is processed to completion before the next starts.
        thread::spawn(move || {
            debug!("diagram worker: started");
            while let Ok(job) = rx.recv() {
                debug!(
                    "diagram worker: render {} (pass={}, block={})",
                    job.render_id, job.pass, job.block
                );
                let scratch = ScratchSlot::create(job.render_id);
                let outcome = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    render(&job.source, job.dark)
                }))
                .unwrap_or_else(|_| Err("diagram renderer panicked".to_string()));
                drop(scratch);
                if let Err(ref e) = outcome {
                    debug!("diagram worker: render {} failed: {e}", job.render_id);
                }
                deliver(DiagramResult {
                    render_id: job.render_id,
                    pass: job.pass,
                    block: job.block,
                    outcome,
                });
            }
            debug!("diagram worker: channel closed, exiting");
        });
        Self {
            tx,
            next_render_id: 1,
        }
    }

    /// Append a render request to the queue.
    pub fn submit(&mut self, pass: u64, block: usize, source: String, dark: bool) -> u64 {
        let render_id = self.next_render_id;
        self.next_render_id += 1;
        let job = DiagramJob {
            render_id,
            pass,
            block,
            source,
            dark,
        };
        if self.tx.send(job).is_err() {
            error!("diagram queue: worker gone, dropping render {render_id}");
        }
        render_id
    }
}

/// Detached scratch directory for one render, removed on drop regardless of
/// how the render ended. Named by render id, so slots never collide.
struct ScratchSlot {
    dir: Option<PathBuf>,
}

impl ScratchSlot {
    fn create(render_id: u64) -> Self {
        let dir = std::env::temp_dir().join(format!("mdlive-diagram-{render_id}"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Self { dir: Some(dir) },
            Err(e) => {
                debug!("diagram: scratch dir unavailable: {e}");
                Self { dir: None }
            }
        }
    }
}

impl Drop for ScratchSlot {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Render one diagram source to SVG markup.
fn render_diagram(source: &str, dark: bool) -> Result<String, String> {
    let parsed = parse_mermaid(source).map_err(|e| format!("parse error: {e}"))?;
    let theme = if dark {
        dark_theme()
    } else {
        MermaidTheme::modern()
    };
    let layout_config = LayoutConfig::default();
    let layout = compute_layout(&parsed.graph, &theme, &layout_config);
    Ok(render_svg(&layout, &theme, &layout_config))
}

/// Dark palette for the diagram engine (GitHub dark colors).
fn dark_theme() -> MermaidTheme {
    MermaidTheme {
        background: "#0d1117".to_string(),
        primary_color: "#21262d".to_string(),
        primary_text_color: "#e6edf3".to_string(),
        primary_border_color: "#30363d".to_string(),
        line_color: "#8b949e".to_string(),
        secondary_color: "#161b22".to_string(),
        text_color: "#e6edf3".to_string(),
        edge_label_background: "#0d1117".to_string(),
        ..MermaidTheme::modern()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc as std_mpsc};
    use std::time::Duration;

    #[test]
    fn renders_complete_in_submission_order() {
        let (tx, rx) = std_mpsc::channel();
        let mut queue = DiagramQueue::spawn_with_renderer(
            move |res| {
                let _ = tx.send(res);
            },
            |source, _dark| Ok(format!("<svg>{source}</svg>")),
        );
        queue.submit(1, 0, "first".into(), false);
        queue.submit(1, 1, "second".into(), false);
        queue.submit(1, 2, "third".into(), false);

        let results: Vec<DiagramResult> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        let blocks: Vec<usize> = results.iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![0, 1, 2]);
        let ids: Vec<u64> = results.iter().map(|r| r.render_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn at_most_one_render_in_flight() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = std_mpsc::channel();

        let in_flight2 = Arc::clone(&in_flight);
        let max_seen2 = Arc::clone(&max_seen);
        let mut queue = DiagramQueue::spawn_with_renderer(
            move |res| {
                let _ = tx.send(res);
            },
            move |_, _| {
                let now = in_flight2.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen2.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                in_flight2.fetch_sub(1, Ordering::SeqCst);
                Ok("<svg/>".into())
            },
        );
        for i in 0..4 {
            queue.submit(1, i, format!("d{i}"), false);
        }
        for _ in 0..4 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn render_ids_are_never_reused() {
        let (tx, rx) = std_mpsc::channel();
        let mut queue = DiagramQueue::spawn_with_renderer(
            move |res| {
                let _ = tx.send(res);
            },
            |_, _| Err("invalid".into()),
        );
        let a = queue.submit(1, 0, "x".into(), false);
        let b = queue.submit(2, 0, "x".into(), false);
        assert!(b > a);
        // Failed renders still deliver results (for the raw-source fallback).
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(res.outcome.is_err());
    }

    #[test]
    fn panicking_renderer_degrades_to_error() {
        let (tx, rx) = std_mpsc::channel();
        let mut queue = DiagramQueue::spawn_with_renderer(
            move |res| {
                let _ = tx.send(res);
            },
            |_, _| panic!("engine bug"),
        );
        queue.submit(1, 0, "x".into(), false);
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(res.outcome.is_err());
        // Worker survives the panic and serves the next request.
        queue.submit(1, 1, "y".into(), false);
        let res = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(res.block, 1);
    }

    #[test]
    fn scratch_slot_removed_after_drop() {
        let slot = ScratchSlot::create(u64::MAX);
        let dir = slot.dir.clone().unwrap();
        assert!(dir.exists());
        drop(slot);
        assert!(!dir.exists());
    }
}
