//! Configuration for the tree service and its store
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for traversal depth; deeper trees are rejected as corrupt
const MAX_SUPPORTED_TREE_DEPTH: usize = 65_536;

/// Runtime configuration for `TreeService`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bound on every multi-document transaction, in milliseconds
    pub transaction_timeout_ms: u64,

    /// Traversal bound for ancestor walks, breadcrumbs and cascades
    pub max_tree_depth: usize,

    /// Reject prerequisite lists that would close a cycle
    pub check_prerequisite_cycles: bool,

    /// Number of idempotency keys remembered for replay
    pub idempotency_cache_capacity: usize,

    /// Broadcast buffer for domain events
    pub event_channel_capacity: usize,

    /// libsql database file; `None` selects the in-memory store
    pub database_path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_ms: 5000,
            max_tree_depth: 256,
            check_prerequisite_cycles: true,
            idempotency_cache_capacity: 1024,
            event_channel_capacity: 128,
            database_path: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, raw: String) -> Result<T, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("{} has an invalid value: '{}'", name, raw))
}

impl StoreConfig {
    /// Defaults overlaid with `FOLIO_*` environment variables
    ///
    /// - `FOLIO_TRANSACTION_TIMEOUT_MS`
    /// - `FOLIO_MAX_TREE_DEPTH`
    /// - `FOLIO_CHECK_PREREQUISITE_CYCLES`
    /// - `FOLIO_IDEMPOTENCY_CACHE_CAPACITY`
    /// - `FOLIO_DATABASE_PATH`
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(raw) = lookup("FOLIO_TRANSACTION_TIMEOUT_MS") {
            config.transaction_timeout_ms = parse_var("FOLIO_TRANSACTION_TIMEOUT_MS", raw)?;
        }
        if let Some(raw) = lookup("FOLIO_MAX_TREE_DEPTH") {
            config.max_tree_depth = parse_var("FOLIO_MAX_TREE_DEPTH", raw)?;
        }
        if let Some(raw) = lookup("FOLIO_CHECK_PREREQUISITE_CYCLES") {
            config.check_prerequisite_cycles = parse_var("FOLIO_CHECK_PREREQUISITE_CYCLES", raw)?;
        }
        if let Some(raw) = lookup("FOLIO_IDEMPOTENCY_CACHE_CAPACITY") {
            config.idempotency_cache_capacity =
                parse_var("FOLIO_IDEMPOTENCY_CACHE_CAPACITY", raw)?;
        }
        if let Some(raw) = lookup("FOLIO_DATABASE_PATH") {
            if !raw.trim().is_empty() {
                config.database_path = Some(PathBuf::from(raw.trim()));
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.transaction_timeout_ms == 0 {
            return Err("transaction_timeout_ms must be greater than 0".to_string());
        }

        if self.max_tree_depth == 0 {
            return Err("max_tree_depth must be greater than 0".to_string());
        }

        if self.max_tree_depth > MAX_SUPPORTED_TREE_DEPTH {
            return Err(format!(
                "max_tree_depth cannot exceed {}",
                MAX_SUPPORTED_TREE_DEPTH
            ));
        }

        if self.idempotency_cache_capacity == 0 {
            return Err("idempotency_cache_capacity must be greater than 0".to_string());
        }

        if self.event_channel_capacity == 0 {
            return Err("event_channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
