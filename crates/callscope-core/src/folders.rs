//! Folder index for grouping captured calls
//!
//! Folders map a unique name to a set of request ids and are persisted
//! under their own key. The index is authoritative for membership: a
//! record's `moved_to` tag is always re-derived from it, never the other
//! way round.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::record::CallRecord;
use crate::storage::{load_json, save_json, PersistentStore, FOLDERS_KEY};

type FolderMap = BTreeMap<String, BTreeSet<String>>;

/// Named groups of request ids
pub struct FolderIndex {
    folders: FolderMap,
    store: Arc<dyn PersistentStore>,
}

impl FolderIndex {
    /// Load the index from `store`, starting empty if nothing usable is stored
    pub async fn load(store: Arc<dyn PersistentStore>) -> Self {
        let folders = match load_json::<FolderMap>(store.as_ref(), FOLDERS_KEY).await {
            Ok(folders) => folders.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("Failed to load folders, starting empty: {}", e);
                BTreeMap::new()
            }
        };

        Self { folders, store }
    }

    /// Add an empty folder. Returns `false` if the name is already taken.
    ///
    /// Nothing changes in memory unless the store accepts the write.
    pub async fn create_folder(&mut self, name: &str) -> Result<bool> {
        if name.is_empty() {
            return Err(AppError::Other("Folder name cannot be empty".to_string()));
        }
        if self.folders.contains_key(name) {
            return Ok(false);
        }

        let mut next = self.folders.clone();
        next.insert(name.to_string(), BTreeSet::new());
        self.commit(next).await?;

        tracing::info!("Created folder '{}'", name);
        Ok(true)
    }

    /// Put a request id into a folder.
    ///
    /// Returns `false` when the folder does not exist or already holds
    /// the id.
    pub async fn assign(&mut self, request_id: &str, name: &str) -> Result<bool> {
        match self.folders.get(name) {
            Some(members) if !members.contains(request_id) => {}
            _ => return Ok(false),
        }

        let mut next = self.folders.clone();
        if let Some(members) = next.get_mut(name) {
            members.insert(request_id.to_string());
        }
        self.commit(next).await?;

        tracing::info!("Moved {} to folder '{}'", request_id, name);
        Ok(true)
    }

    /// Remove every folder. Returns how many were removed.
    pub async fn clear(&mut self) -> Result<usize> {
        let removed = self.folders.len();
        self.commit(FolderMap::new()).await?;

        tracing::info!("Cleared {} folders", removed);
        Ok(removed)
    }

    pub fn folder_names(&self) -> Vec<String> {
        self.folders.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.folders.contains_key(name)
    }

    pub fn members(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.folders.get(name)
    }

    /// First folder (by name) that holds `request_id`
    pub fn folder_of(&self, request_id: &str) -> Option<&str> {
        self.folders
            .iter()
            .find(|(_, members)| members.contains(request_id))
            .map(|(name, _)| name.as_str())
    }

    /// Stamp `moved_to` on each record from current membership.
    ///
    /// Tags left over from a previous index state are cleared.
    pub fn annotate(&self, records: &mut [CallRecord]) {
        for record in records.iter_mut() {
            record.moved_to = self.folder_of(&record.request_id).map(str::to_string);
        }
    }

    /// Records belonging to `name`, in input order
    pub fn records_in(&self, name: &str, records: &[CallRecord]) -> Result<Vec<CallRecord>> {
        let members = self
            .folders
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("folder '{name}'")))?;

        Ok(records
            .iter()
            .filter(|r| members.contains(&r.request_id))
            .cloned()
            .collect())
    }

    async fn commit(&mut self, next: FolderMap) -> Result<()> {
        save_json(self.store.as_ref(), FOLDERS_KEY, &next).await?;
        self.folders = next;
        Ok(())
    }
}
