/// Default maximum number of records kept in the log
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Default capacity of the new-call notification channel
pub const DEFAULT_NOTIFY_CAPACITY: usize = 256;

/// URL prefixes excluded by default (the browser's own extension pages)
pub const DEFAULT_EXCLUDED_PREFIXES: &[&str] = &["chrome-extension"];

/// URL substrings excluded by default (coarse CDN noise filter)
pub const DEFAULT_EXCLUDED_SUBSTRINGS: &[&str] = &["cdn"];

/// Directory name under the platform data dir
pub const DATA_DIR_NAME: &str = "callscope";

/// Database file name inside the data directory
pub const STORE_FILE_NAME: &str = "store.db";
