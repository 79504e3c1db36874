use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::verification::{PostgraduateRecord, ProfessionRecord, VerificationKey};

/// Raw extraction from one registry search, before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryRecord {
    /// Whether the registry returned a matching professional. `false` is
    /// an authoritative not-found, not an error.
    pub found: bool,
    /// Key/value rows of the personal-data table (name, cédula, ...),
    /// keyed by the raw header text.
    pub basic_fields: HashMap<String, String>,
    pub professions: Vec<ProfessionRecord>,
    pub postgraduates: Vec<PostgraduateRecord>,
}

impl RegistryRecord {
    pub fn not_found() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to the registry failed: {0}")]
    Navigation(String),

    #[error("browser protocol error: {0}")]
    Browser(#[from] chromiumoxide::error::CdpError),

    #[error("failed to parse registry page: {0}")]
    Parse(String),

    #[error("registry did not return a complete result in time")]
    ResultPending,
}

/// Capability that opens an isolated browser session, searches the
/// registry by key and extracts the raw fields. Implementations must tear
/// the session down on every exit path, including being dropped mid-flight
/// when the timeout supervisor cancels the job.
#[async_trait]
pub trait RegistryScraper: Send + Sync {
    async fn scrape(&self, key: &VerificationKey) -> Result<RegistryRecord, ScrapeError>;
}
