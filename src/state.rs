//! Process configuration and the state shared by every handler.

use std::env;
use std::path::PathBuf;
use tracing::warn;

use crate::service::DeviceService;

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind_address: String,
    /// JSON snapshot of routers and connections. Memory only when unset.
    pub data_file: Option<PathBuf>,
    /// Seed for the simulation RNG. OS entropy when unset.
    pub seed: Option<u64>,
    /// Directory of a web front end served for non-API paths.
    pub static_dir: Option<PathBuf>,
}

impl Config {
    /// Creates Config from environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".into()),
            data_file: non_empty_var("DATA_FILE").map(PathBuf::from),
            seed: non_empty_var("SIM_SEED").and_then(|s| match s.parse() {
                Ok(seed) => Some(seed),
                Err(e) => {
                    warn!("Ignoring SIM_SEED '{}': {}", s, e);
                    None
                }
            }),
            static_dir: non_empty_var("STATIC_DIR").map(PathBuf::from),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Shared application state passed to all request handlers.
pub struct AppState {
    pub devices: DeviceService,
}

impl AppState {
    pub fn new(devices: DeviceService) -> Self {
        Self { devices }
    }
}
