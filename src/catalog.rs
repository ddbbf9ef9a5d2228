//! Strategy catalog: static list of ready-made bot strategies.
//!
//! Thin collaborator outside the session core; strategies are JSON documents
//! loaded from a directory and served by id.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// One catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("strategy not found: {0}")]
    NotFound(String),

    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
}

/// In-memory strategy catalog.
#[derive(Debug, Default)]
pub struct StrategyCatalog {
    entries: Vec<StrategyEntry>,
}

impl StrategyCatalog {
    pub fn from_entries(entries: Vec<StrategyEntry>) -> Self {
        Self { entries }
    }

    /// Load every `.json` strategy file in `dir`. Unparseable files are
    /// skipped with a warning rather than failing the whole catalog.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = fs::read_to_string(&path)?;
            match serde_json::from_str::<StrategyEntry>(&text) {
                Ok(strategy) => {
                    debug!(id = %strategy.id, path = %path.display(), "Loaded strategy");
                    entries.push(strategy);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping invalid strategy file");
                }
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self::from_entries(entries))
    }

    /// All strategies, sorted by name.
    pub fn list(&self) -> &[StrategyEntry] {
        &self.entries
    }

    /// Look up a strategy by id.
    pub fn load(&self, id: &str) -> Result<&StrategyEntry, CatalogError> {
        self.entries
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }
}
