//! Live-update channel — parses the backend's persistent event stream.
//!
//! The reader thread bridges stream events to the main loop via a caller
//! supplied delivery callback (same shape as the watcher bridge the rest of
//! the loop uses for workers). A dropped connection is never resumed in
//! place: the thread reports `Closed` once and exits, and the app is
//! responsible for scheduling the recovery refresh and opening a fresh
//! connection.

use std::io::{BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use log::{debug, info};
use serde::Deserialize;

/// Events delivered by the live-update channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The catalog changed server-side; the client should refresh it.
    CatalogChanged,
    /// A served file's content changed on disk.
    FileChanged { id: u64 },
    /// The connection failed or ended. Sent exactly once per channel.
    Closed,
}

#[derive(Deserialize)]
struct FileChangedPayload {
    id: u64,
}

/// Incremental parser for the `text/event-stream` framing the backend emits.
///
/// Only the `event:`/`data:` fields are significant; comments and unknown
/// fields are skipped. A blank line dispatches the accumulated frame.
/// Malformed `file-changed` payloads are ignored, not fatal.
#[derive(Default)]
pub(crate) struct SseParser {
    event: String,
    data: String,
}

impl SseParser {
    fn dispatch(&mut self) -> Option<ChannelEvent> {
        let event = std::mem::take(&mut self.event);
        let data = std::mem::take(&mut self.data);
        match event.as_str() {
            "update" => Some(ChannelEvent::CatalogChanged),
            "file-changed" => match serde_json::from_str::<FileChangedPayload>(&data) {
                Ok(payload) => Some(ChannelEvent::FileChanged { id: payload.id }),
                Err(e) => {
                    debug!("events: ignoring malformed file-changed payload: {e}");
                    None
                }
            },
            "" => None,
            other => {
                debug!("events: ignoring unknown event kind '{other}'");
                None
            }
        }
    }

    /// Feed one line (without trailing newline). Returns an event when the
    /// line completes a frame.
    pub(crate) fn feed_line(&mut self, line: &str) -> Option<ChannelEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None; // comment / keep-alive
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                if !self.data.is_empty() {
                    self.data.push('\n');
                }
                self.data.push_str(value);
            }
            _ => {}
        }
        None
    }
}

/// Drive an open event-stream body until it fails or ends, delivering each
/// parsed event. Always delivers `Closed` last, exactly once.
pub fn run_channel<R, F>(reader: R, mut deliver: F)
where
    R: Read,
    F: FnMut(ChannelEvent),
{
    info!("events: channel open");
    let mut parser = SseParser::default();
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next() {
            Some(Ok(line)) => {
                if let Some(event) = parser.feed_line(&line) {
                    debug!("events: {event:?}");
                    deliver(event);
                }
            }
            Some(Err(e)) => {
                info!("events: channel read failed: {e}");
                break;
            }
            None => {
                info!("events: channel ended");
                break;
            }
        }
    }
    deliver(ChannelEvent::Closed);
}

/// Spawn the channel reader thread over an open event-stream body.
///
/// `deliver` is called on the reader thread for each parsed event; it
/// forwards into the main loop's mpsc fan-in. The thread exits after
/// delivering `Closed`.
pub fn spawn_channel<R, F>(reader: R, deliver: F) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    F: FnMut(ChannelEvent) + Send + 'static,
{
    thread::spawn(move || run_channel(reader, deliver))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn feed(parser: &mut SseParser, text: &str) -> Vec<ChannelEvent> {
        text.lines().filter_map(|l| parser.feed_line(l)).collect()
    }

    #[test]
    fn update_event_parses() {
        let mut p = SseParser::default();
        let events = feed(&mut p, "event: update\ndata: {}\n\n");
        assert_eq!(events, vec![ChannelEvent::CatalogChanged]);
    }

    #[test]
    fn file_changed_event_parses_id() {
        let mut p = SseParser::default();
        let events = feed(&mut p, "event: file-changed\ndata: {\"id\": 42}\n\n");
        assert_eq!(events, vec![ChannelEvent::FileChanged { id: 42 }]);
    }

    #[test]
    fn malformed_payload_is_ignored() {
        let mut p = SseParser::default();
        let events = feed(&mut p, "event: file-changed\ndata: not json\n\n");
        assert!(events.is_empty());
        // The parser survives and handles the next frame.
        let events = feed(&mut p, "event: update\n\n");
        assert_eq!(events, vec![ChannelEvent::CatalogChanged]);
    }

    #[test]
    fn comment_lines_are_skipped() {
        let mut p = SseParser::default();
        let events = feed(&mut p, ": keep-alive\n\nevent: update\n\n");
        assert_eq!(events, vec![ChannelEvent::CatalogChanged]);
    }

    #[test]
    fn unknown_event_kinds_are_skipped() {
        let mut p = SseParser::default();
        let events = feed(&mut p, "event: shutdown\ndata: {}\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn reader_thread_delivers_closed_at_eof() {
        let stream = b"event: update\n\nevent: file-changed\ndata: {\"id\":7}\n\n".to_vec();
        let (tx, rx) = mpsc::channel();
        let handle = spawn_channel(std::io::Cursor::new(stream), move |ev| {
            let _ = tx.send(ev);
        });
        handle.join().unwrap();
        let events: Vec<ChannelEvent> = rx.iter().collect();
        assert_eq!(
            events,
            vec![
                ChannelEvent::CatalogChanged,
                ChannelEvent::FileChanged { id: 7 },
                ChannelEvent::Closed,
            ]
        );
    }
}
