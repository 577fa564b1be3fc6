use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults;

/// Engine configuration
///
/// Serde-friendly with builder methods; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Maximum records kept in the log, oldest dropped first. 0 disables the cap.
    #[serde(default = "default_max_records")]
    pub max_records: usize,

    /// Which request URLs are never recorded
    #[serde(default)]
    pub exclusion: ExclusionPolicy,

    /// Buffer size of the new-call notification channel
    #[serde(default = "default_notify_capacity")]
    pub notify_capacity: usize,
}

fn default_max_records() -> usize {
    defaults::DEFAULT_MAX_RECORDS
}

fn default_notify_capacity() -> usize {
    defaults::DEFAULT_NOTIFY_CAPACITY
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_records: defaults::DEFAULT_MAX_RECORDS,
            exclusion: ExclusionPolicy::default(),
            notify_capacity: defaults::DEFAULT_NOTIFY_CAPACITY,
        }
    }
}

impl CaptureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_exclusion(mut self, exclusion: ExclusionPolicy) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity.max(1);
        self
    }

    /// Whether the log cap is active
    pub fn is_capped(&self) -> bool {
        self.max_records > 0
    }
}

/// URL exclusion rules applied to request start events
///
/// The default substring rule (`cdn`) is deliberately coarse: it also
/// drops legitimate API hosts that happen to contain those letters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionPolicy {
    /// A URL starting with any of these is excluded
    #[serde(default)]
    pub prefixes: Vec<String>,
    /// A URL containing any of these is excluded
    #[serde(default)]
    pub substrings: Vec<String>,
}

impl Default for ExclusionPolicy {
    fn default() -> Self {
        Self {
            prefixes: to_owned(defaults::DEFAULT_EXCLUDED_PREFIXES),
            substrings: to_owned(defaults::DEFAULT_EXCLUDED_SUBSTRINGS),
        }
    }
}

impl ExclusionPolicy {
    /// Policy that records everything
    pub fn none() -> Self {
        Self {
            prefixes: Vec::new(),
            substrings: Vec::new(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    pub fn with_substring(mut self, substring: impl Into<String>) -> Self {
        self.substrings.push(substring.into());
        self
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
            || self.substrings.iter().any(|s| url.contains(s.as_str()))
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Default database location under the platform data directory
pub fn default_storage_path() -> PathBuf {
    let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(defaults::DATA_DIR_NAME);
    path.push(defaults::STORE_FILE_NAME);
    path
}
