//! Store configuration: every option a `DataStore` constructor accepts,
//! collected into one typed builder surface. Generalises a small-enum-plus
//! builder idiom (`DurabilityMode` elsewhere in this style of codebase) to a
//! struct, since this configuration has more than one independent axis.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

use crate::persistence::{SerializationHook, DEFAULT_CORRUPT_ALERT_THRESHOLD};

pub type StringComparator = Arc<dyn Fn(&str, &str) -> Ordering + Send + Sync>;

/// Configuration for opening a `DataStore`.
#[derive(Clone, Default)]
pub struct DataStoreConfig {
    pub(crate) filename: Option<PathBuf>,
    pub(crate) in_memory_only: bool,
    pub(crate) autoload: bool,
    pub(crate) timestamp_data: bool,
    pub(crate) corrupt_alert_threshold: Option<f64>,
    pub(crate) before_serialization: Option<SerializationHook>,
    pub(crate) after_serialization: Option<SerializationHook>,
    pub(crate) compare_strings: Option<StringComparator>,
}

impl DataStoreConfig {
    /// A fresh, in-memory-only configuration with no filename.
    pub fn new() -> Self {
        DataStoreConfig::default()
    }

    /// Convenience: an in-memory store that is ready to use immediately,
    /// without requiring a separate `load_database` call.
    pub fn in_memory() -> Self {
        DataStoreConfig::new().with_in_memory_only(true).with_autoload(true)
    }

    /// Convenience: a file-backed store that autoloads synchronously during
    /// `DataStore::open`.
    pub fn file(filename: impl Into<PathBuf>) -> Self {
        DataStoreConfig::new().with_filename(filename).with_autoload(true)
    }

    pub fn with_filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_in_memory_only(mut self, value: bool) -> Self {
        self.in_memory_only = value;
        self
    }

    pub fn with_autoload(mut self, value: bool) -> Self {
        self.autoload = value;
        self
    }

    pub fn with_timestamp_data(mut self, value: bool) -> Self {
        self.timestamp_data = value;
        self
    }

    pub fn with_corrupt_alert_threshold(mut self, ratio: f64) -> Self {
        self.corrupt_alert_threshold = Some(ratio);
        self
    }

    pub fn with_before_serialization(mut self, hook: SerializationHook) -> Self {
        self.before_serialization = Some(hook);
        self
    }

    pub fn with_after_serialization(mut self, hook: SerializationHook) -> Self {
        self.after_serialization = Some(hook);
        self
    }

    pub fn with_compare_strings(mut self, cmp: StringComparator) -> Self {
        self.compare_strings = Some(cmp);
        self
    }

    pub(crate) fn effective_corrupt_alert_threshold(&self) -> f64 {
        self.corrupt_alert_threshold.unwrap_or(DEFAULT_CORRUPT_ALERT_THRESHOLD)
    }

    pub(crate) fn is_in_memory_only(&self) -> bool {
        self.in_memory_only || self.filename.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_in_memory_with_no_autoload() {
        let cfg = DataStoreConfig::new();
        assert!(cfg.is_in_memory_only());
        assert!(!cfg.autoload);
    }

    #[test]
    fn file_config_carries_filename_and_autoloads() {
        let cfg = DataStoreConfig::file("data.db");
        assert_eq!(cfg.filename, Some(PathBuf::from("data.db")));
        assert!(cfg.autoload);
        assert!(!cfg.is_in_memory_only());
    }

    #[test]
    fn in_memory_only_overrides_a_present_filename() {
        let cfg = DataStoreConfig::file("data.db").with_in_memory_only(true);
        assert!(cfg.is_in_memory_only());
    }
}
