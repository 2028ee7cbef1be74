//! Persistent history of recently used send targets.
//!
//! Stored as a JSON array, newest first, capped at ten entries. A repeated
//! endpoint moves to the front instead of duplicating.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_ENTRIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointEntry {
    /// Target host or host:port string as the user entered it.
    pub endpoint: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointHistory {
    path: PathBuf,
    entries: Vec<EndpointEntry>,
}

impl EndpointHistory {
    /// Load history from `path`. A missing or unreadable file yields an
    /// empty history rather than an error; the file reappears on save.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<Vec<EndpointEntry>>(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!("ignoring malformed history file {:?}: {}", path, e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn entries(&self) -> &[EndpointEntry] {
        &self.entries
    }

    /// Move `endpoint` to the front, updating its label if one is given,
    /// then persist.
    pub fn remember(&mut self, endpoint: &str, label: Option<String>) -> Result<()> {
        let existing = self.entries.iter().position(|e| e.endpoint == endpoint);
        let mut entry = match existing {
            Some(index) => self.entries.remove(index),
            None => EndpointEntry {
                endpoint: endpoint.to_string(),
                label: None,
            },
        };
        if label.is_some() {
            entry.label = label;
        }
        self.entries.insert(0, entry);
        self.entries.truncate(MAX_ENTRIES);
        self.save()
    }

    fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).context("failed to create history directory")?;
        }
        let contents =
            serde_json::to_string_pretty(&self.entries).context("failed to encode history")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write history file {:?}", self.path))
    }
}
