//! Record filtering for presenters

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::folders::FolderIndex;
use crate::record::CallRecord;

/// Filter for querying captured calls
///
/// Every criterion that is set must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallFilter {
    /// Case-insensitive substring of the URL
    #[serde(default)]
    pub search: Option<String>,
    /// HTTP method, case-insensitive
    #[serde(default)]
    pub method: Option<String>,
    /// Exact response status
    #[serde(default)]
    pub status_code: Option<u16>,
    /// Only records in this folder
    #[serde(default)]
    pub folder: Option<String>,
    /// Skip records that have been moved into a folder
    #[serde(default)]
    pub hide_moved: bool,
    /// Keep only the first record seen for each URL
    #[serde(default)]
    pub unique: bool,
}

impl CallFilter {
    pub fn matches(&self, record: &CallRecord, folders: Option<&FolderIndex>) -> bool {
        if let Some(ref search) = self.search {
            if !record.url.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }

        if let Some(ref method) = self.method {
            if !record.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }

        if let Some(status) = self.status_code {
            if record.status_code != Some(status) {
                return false;
            }
        }

        if let Some(ref folder) = self.folder {
            let member = folders
                .and_then(|index| index.members(folder))
                .map(|members| members.contains(&record.request_id))
                .unwrap_or(false);
            if !member {
                return false;
            }
        }

        if self.hide_moved && record.moved_to.is_some() {
            return false;
        }

        true
    }

    /// Matching records, in input order.
    ///
    /// URL de-duplication runs over the whole input before the other
    /// criteria, so a URL whose first record fails them is dropped.
    pub fn apply(&self, records: &[CallRecord], folders: Option<&FolderIndex>) -> Vec<CallRecord> {
        let mut seen = HashSet::new();
        records
            .iter()
            .filter(|r| !self.unique || seen.insert(r.url.as_str()))
            .filter(|r| self.matches(r, folders))
            .cloned()
            .collect()
    }
}
