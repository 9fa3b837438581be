//! Catalog synchronization: groups, selection, and newly-added detection.
//!
//! The catalog is refreshed atomically — every refresh replaces the prior
//! snapshot in full. The only cross-snapshot state is the process-lifetime
//! set of known file ids, used to detect additions, and the user's
//! selection, which is preserved or repaired rather than reset.

use std::collections::HashSet;

use log::{debug, info};

use crate::api::{FileEntry, Group};

/// The distinguished group selected when no group is specified.
pub const DEFAULT_GROUP: &str = "default";

/// Extract the group name from a navigable location path.
/// Root (`/`) means the default group; `/name` selects a named group.
pub fn parse_group_from_path(pathname: &str) -> String {
    let path = pathname.trim_start_matches('/').trim_end_matches('/');
    if path.is_empty() {
        DEFAULT_GROUP.to_string()
    } else {
        path.to_string()
    }
}

fn location_for_group(name: &str) -> String {
    if name == DEFAULT_GROUP {
        "/".to_string()
    } else {
        format!("/{name}")
    }
}

fn all_file_ids(groups: &[Group]) -> HashSet<u64> {
    groups
        .iter()
        .flat_map(|g| g.files.iter().map(|f| f.id))
        .collect()
}

/// State machine over `{catalog, selection, known ids}`.
pub struct CatalogState {
    groups: Vec<Group>,
    /// Every file id ever seen by this client. Monotonically grows.
    known_ids: HashSet<u64>,
    active_group: String,
    active_file_id: Option<u64>,
    /// Navigable location encoding the active group.
    location: String,
}

impl CatalogState {
    /// Start from a location path (e.g. restored on reload).
    pub fn new(initial_location: &str) -> Self {
        let active_group = parse_group_from_path(initial_location);
        let location = location_for_group(&active_group);
        Self {
            groups: Vec::new(),
            known_ids: HashSet::new(),
            active_group,
            active_file_id: None,
            location,
        }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn active_group_name(&self) -> &str {
        &self.active_group
    }

    pub fn active_file_id(&self) -> Option<u64> {
        self.active_file_id
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn active_group(&self) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == self.active_group)
    }

    /// The selected file entry, once selection has settled.
    pub fn active_file(&self) -> Option<&FileEntry> {
        let group = self.active_group()?;
        let id = self.active_file_id?;
        group.files.iter().find(|f| f.id == id)
    }

    /// Sidebar visibility is derived, never toggled here: shown when the
    /// active group has at least two files.
    pub fn sidebar_visible(&self) -> bool {
        self.active_group().is_some_and(|g| g.files.len() >= 2)
    }

    /// Replace the catalog with a freshly fetched snapshot.
    ///
    /// Newly-added ids are computed against the known-id set *before* it is
    /// extended — the order matters for the correctness of future diffs. If
    /// any addition landed in the active group, the most recently created
    /// one (maximum id; the server assigns ids in increasing order) becomes
    /// the selection. A refresh never changes the active group.
    pub fn apply_refresh(&mut self, groups: Vec<Group>) {
        let new_ids = all_file_ids(&groups);
        let added: HashSet<u64> = new_ids.difference(&self.known_ids).copied().collect();
        self.known_ids.extend(new_ids);
        self.groups = groups;

        if !added.is_empty() {
            if let Some(group) = self.active_group() {
                let newest = group
                    .files
                    .iter()
                    .map(|f| f.id)
                    .filter(|id| added.contains(id))
                    .max();
                if let Some(id) = newest {
                    info!("catalog: auto-selecting newly added file {id}");
                    self.active_file_id = Some(id);
                }
            }
        }
        self.repair_selection();
    }

    /// Switch the active group, clearing the file selection so it resolves
    /// against the new group's file list, and record the group in the
    /// navigable location.
    pub fn switch_group(&mut self, name: &str) {
        debug!("catalog: switching group '{}' -> '{name}'", self.active_group);
        self.active_group = name.to_string();
        self.active_file_id = None;
        self.location = location_for_group(name);
        self.repair_selection();
    }

    /// Select a file directly (sidebar click, markdown link open).
    pub fn select_file(&mut self, id: u64) {
        self.active_file_id = Some(id);
    }

    /// If the selection does not name a file of the active group, fall back
    /// to the group's first file; an empty group leaves selection empty.
    fn repair_selection(&mut self) {
        let Some(group) = self.active_group() else {
            return;
        };
        if group.files.is_empty() {
            self.active_file_id = None;
            return;
        }
        let still_exists = self
            .active_file_id
            .is_some_and(|id| group.files.iter().any(|f| f.id == id));
        if !still_exists {
            let first = group.files[0].id;
            debug!(
                "catalog: selection {:?} not in group '{}', falling back to {first}",
                self.active_file_id, self.active_group
            );
            self.active_file_id = Some(first);
        }
    }
}
