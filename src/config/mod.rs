use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3001").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Maximum number of concurrent browser sessions. The SACS tolerates
    /// very little load; one serialized session is the safe default.
    #[serde(default = "default_max_concurrent_scrapes")]
    pub max_concurrent_scrapes: usize,

    /// Maximum number of in-flight verifications (running + queued) before
    /// new requests are rejected with a queue-full error.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Hard per-job timeout in milliseconds. The SACS can hang indefinitely.
    #[serde(default = "default_hard_timeout_ms")]
    pub hard_timeout_ms: u64,

    /// Cache TTL for successful verification results, in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// URL of the SACS professional-search form.
    #[serde(default = "default_sacs_base_url")]
    pub sacs_base_url: String,

    /// Chrome/Chromium executable. When unset, well-known Linux install
    /// paths are probed at launch time.
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_max_concurrent_scrapes() -> usize {
    1
}

fn default_max_queue_size() -> usize {
    25
}

fn default_hard_timeout_ms() -> u64 {
    150_000 // 2m30s
}

fn default_cache_ttl_ms() -> u64 {
    6 * 60 * 60 * 1000 // 6h
}

fn default_sacs_base_url() -> String {
    "https://sistemas.sacs.gob.ve/consultas/prfsnal_salud".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
