//! Run manifest: what a batch run did, per symbol.
//!
//! Saved as `{data_dir}/_runs/{run_id}.json`. The leading underscore keeps the
//! directory out of Hive partition discovery.

use crate::data::pipeline::{IngestError, SymbolReport};
use crate::data::provider::{FailureKind, Reliability};
use crate::data::resolver::{AttemptFailure, ExhaustionCause};
use crate::data::store::PartitionWrite;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RUNS_DIR: &str = "_runs";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest I/O at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest serialization: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolStatus {
    Succeeded,
    Failed,
}

/// One entry of a fallback trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub provider: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl From<&AttemptFailure> for TrailEntry {
    fn from(f: &AttemptFailure) -> Self {
        Self {
            provider: f.provider.clone(),
            kind: f.kind(),
            reason: f.failure.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub status: SymbolStatus,
    /// Adapter that satisfied the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reliability: Option<Reliability>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback_trail: Vec<TrailEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exhaustion: Option<ExhaustionCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolOutcome {
    pub fn from_result(symbol: &str, result: &Result<SymbolReport, IngestError>) -> Self {
        match result {
            Ok(report) => Self {
                symbol: symbol.to_string(),
                status: SymbolStatus::Succeeded,
                source: Some(report.source.clone()),
                reliability: Some(report.reliability),
                fallback_trail: report.fallback_trail.iter().map(TrailEntry::from).collect(),
                partitions: report.write.partitions.clone(),
                stage: None,
                exhaustion: None,
                error: None,
            },
            Err(e) => {
                let (trail, exhaustion) = match e {
                    IngestError::Exhausted(ex) => {
                        (ex.failures.iter().map(TrailEntry::from).collect(), Some(ex.cause()))
                    }
                    _ => (Vec::new(), None),
                };
                Self {
                    symbol: symbol.to_string(),
                    status: SymbolStatus::Failed,
                    source: None,
                    reliability: None,
                    fallback_trail: trail,
                    partitions: Vec::new(),
                    stage: Some(e.stage().to_string()),
                    exhaustion,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == SymbolStatus::Succeeded
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Provider names in resolution order.
    pub providers: Vec<String>,
    pub symbols: Vec<SymbolOutcome>,
}

impl RunManifest {
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        providers: Vec<String>,
        symbols: Vec<SymbolOutcome>,
    ) -> Self {
        Self {
            run_id: started_at.format("%Y%m%dT%H%M%S%3fZ").to_string(),
            started_at,
            finished_at,
            providers,
            symbols,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.symbols.iter().filter(|s| s.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.symbols.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, symbol: &str) -> Option<&SymbolOutcome> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    pub fn path_in(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(RUNS_DIR).join(format!("{}.json", self.run_id))
    }

    /// Write the manifest as pretty JSON and return its path.
    pub fn save(&self, data_dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = self.path_in(data_dir);
        let io_err = |source| ManifestError::Io {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(io_err)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
