//! mdlive library crate.
//!
//! A live-reloading Markdown previewer client. The `app` event loop drives
//! the whole pipeline: it keeps the catalog in sync with the file-serving
//! backend, renders the open document, farms code highlighting and diagram
//! rendering out to workers, and hands each settled view to a `ViewSink`.

pub mod api;
pub mod app;
pub mod catalog;
pub mod config;
pub mod diagram;
pub mod document;
pub mod events;
pub mod highlight;
pub mod outline;
pub mod resolve;
pub mod theme;
pub mod tracker;
