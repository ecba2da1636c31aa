use std::collections::HashMap;
use std::env;
use std::sync::RwLock;

use lazy_static::lazy_static;
use log::debug;

use crate::constants::{DEFAULT_POOL_SIZE, MAX_POOL_SIZE, MAX_POOL_SIZE_KEY, MIN_POOL_SIZE};

lazy_static! {
    static ref OPTIONS: RwLock<HashMap<String, String>> = RwLock::new(HashMap::new());
}

/// Set (or with `None`, clear) a process-wide configuration option
pub fn set_config_option(key: &str, value: Option<&str>) {
    let mut options = OPTIONS.write().unwrap_or_else(|e| e.into_inner());
    match value {
        Some(v) => {
            options.insert(key.to_string(), v.to_string());
        }
        None => {
            options.remove(key);
        }
    }
}

/// Read a configuration option, falling back to the environment variable
pub fn get_config_option(key: &str) -> Option<String> {
    let options = OPTIONS.read().unwrap_or_else(|e| e.into_inner());
    if let Some(v) = options.get(key) {
        return Some(v.clone());
    }
    env::var(key).ok()
}

/// Pool configuration, read once when a pool is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of simultaneously tracked resources
    pub max_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl PoolConfig {
    /// Configuration with an explicit capacity, sanitized like a configured value
    pub fn with_max_size(max_size: usize) -> Self {
        PoolConfig {
            max_size: sanitize_max_size(Some(max_size)),
        }
    }

    /// Read `MAX_DATASET_POOL_SIZE` from the process configuration
    pub fn from_config() -> Self {
        let raw = get_config_option(MAX_POOL_SIZE_KEY);
        let parsed = raw.as_deref().and_then(|v| v.trim().parse::<usize>().ok());
        if raw.is_some() && parsed.is_none() {
            debug!("ignoring unparsable {}={:?}", MAX_POOL_SIZE_KEY, raw);
        }
        PoolConfig {
            max_size: sanitize_max_size(parsed),
        }
    }
}

// Out-of-range values fall back to the default rather than the nearest bound
fn sanitize_max_size(value: Option<usize>) -> usize {
    match value {
        Some(v) if (MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&v) => v,
        Some(v) => {
            debug!(
                "{}={} outside [{}, {}], using {}",
                MAX_POOL_SIZE_KEY, v, MIN_POOL_SIZE, MAX_POOL_SIZE, DEFAULT_POOL_SIZE
            );
            DEFAULT_POOL_SIZE
        }
        None => DEFAULT_POOL_SIZE,
    }
}
