//! HTTP client for the file-serving backend.
//!
//! The backend owns catalog storage, file watching and raw byte serving;
//! this module only speaks its JSON API. Everything network-facing sits
//! behind [`Backend`] so the synchronization logic can be driven by an
//! in-memory double in tests.

use std::io::Read;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// One served file. Ids are server-assigned, stable and unique for the
/// lifetime of the server process; entries are replaced wholesale on every
/// catalog refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FileEntry {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// A named ordered set of files. `"default"` is the distinguished group
/// selected when no group is specified. Server-assigned file order must be
/// preserved.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Group {
    pub name: String,
    pub files: Vec<FileEntry>,
}

/// Content of one document as served by the backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileContent {
    pub content: String,
    #[serde(rename = "baseDir", default)]
    pub base_dir: String,
}

/// The backend surface the client consumes. Implementations must be usable
/// from the I/O worker threads.
pub trait Backend: Send + Sync {
    /// `GET /_/api/groups` — the full catalog, in server order.
    fn fetch_groups(&self) -> Result<Vec<Group>>;

    /// `GET /_/api/files/{id}/content` — non-success status is a hard
    /// failure for this fetch.
    fn fetch_content(&self, id: u64) -> Result<FileContent>;

    /// `POST /_/api/files/open` — resolve `path` relative to the document
    /// `file_id` and return the (possibly newly registered) entry.
    fn open_relative(&self, file_id: u64, path: &str) -> Result<FileEntry>;

    /// `POST /_/api/files` — register a local file with a group.
    fn register_file(&self, path: &str, group: &str) -> Result<()>;

    /// `GET /_/events` — the persistent live-update stream body.
    fn open_events(&self) -> Result<Box<dyn Read + Send>>;
}

/// `Backend` over HTTP via ureq.
pub struct HttpBackend {
    agent: ureq::Agent,
    base: String,
}

impl HttpBackend {
    /// `base` is the server root, e.g. `http://localhost:6275`.
    pub fn new(base: String) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

impl Backend for HttpBackend {
    fn fetch_groups(&self) -> Result<Vec<Group>> {
        let url = self.url("/_/api/groups");
        debug!("api: GET {url}");
        let mut resp = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("failed to fetch {url}"))?;
        let groups = resp
            .body_mut()
            .read_json::<Vec<Group>>()
            .context("failed to decode catalog")?;
        Ok(groups)
    }

    fn fetch_content(&self, id: u64) -> Result<FileContent> {
        let url = self.url(&format!("/_/api/files/{id}/content"));
        debug!("api: GET {url}");
        let mut resp = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("failed to fetch {url}"))?;
        let content = resp
            .body_mut()
            .read_json::<FileContent>()
            .context("failed to decode file content")?;
        Ok(content)
    }

    fn open_relative(&self, file_id: u64, path: &str) -> Result<FileEntry> {
        let url = self.url("/_/api/files/open");
        debug!("api: POST {url} fileId={file_id} path={path}");
        let mut resp = self
            .agent
            .post(&url)
            .send_json(serde_json::json!({ "fileId": file_id, "path": path }))
            .with_context(|| format!("failed to open {path} relative to file {file_id}"))?;
        let entry = resp
            .body_mut()
            .read_json::<FileEntry>()
            .context("failed to decode file entry")?;
        Ok(entry)
    }

    fn register_file(&self, path: &str, group: &str) -> Result<()> {
        let url = self.url("/_/api/files");
        debug!("api: POST {url} path={path} group={group}");
        self.agent
            .post(&url)
            .send_json(serde_json::json!({ "path": path, "group": group }))
            .with_context(|| format!("failed to register {path}"))?;
        Ok(())
    }

    fn open_events(&self) -> Result<Box<dyn Read + Send>> {
        let url = self.url("/_/events");
        debug!("api: GET {url} (event stream)");
        let resp = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("failed to open {url}"))?;
        Ok(Box::new(resp.into_body().into_reader()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_decodes_from_server_json() {
        let json = r#"[{"name":"default","files":[{"id":1,"name":"a.md","path":"/tmp/a.md"},{"id":2,"name":"b.md"}]}]"#;
        let groups: Vec<Group> = serde_json::from_str(json).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "default");
        assert_eq!(groups[0].files[0].id, 1);
        // path is optional on the wire
        assert_eq!(groups[0].files[1].path, "");
    }

    #[test]
    fn file_content_decodes_base_dir() {
        let json = r##"{"content":"# hi","baseDir":"/docs"}"##;
        let content: FileContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.content, "# hi");
        assert_eq!(content.base_dir, "/docs");
    }
}
