// src/store.rs

//! Durable persistence for finalized run records and the latest successful
//! configuration, plus best-effort reading of the result artifact the
//! deployment script may leave behind.
//!
//! Store failures are logged by the finalizer and never block a run from
//! reaching its terminal state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DeployConfig;
use crate::errors::Result;
use crate::run::{ContractSummary, RunRecord};

/// Key-value persistence consumed by the finalizer.
#[async_trait]
pub trait RunRecordStore: Send + Sync {
    /// Persist one finalized, immutable run record.
    async fn save(&self, record: &RunRecord) -> Result<()>;

    /// Persist the configuration of the most recent successful run.
    async fn save_latest_success(&self, config: &DeployConfig) -> Result<()>;

    /// Load the most recent successful configuration, if any.
    async fn load_latest_success(&self) -> Result<Option<DeployConfig>>;
}

const LATEST_SUCCESS_FILE: &str = "latest-success.json";

/// Envelope for the latest-success file: the configuration plus the moment
/// it was recorded.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestSuccess {
    #[serde(flatten)]
    config: DeployConfig,
    recorded_at: chrono::DateTime<Utc>,
}

/// Filesystem-backed store: one pretty-printed `<runId>.json` per record
/// under the history directory, plus `latest-success.json`.
#[derive(Debug, Clone)]
pub struct FsRecordStore {
    history_dir: PathBuf,
}

impl FsRecordStore {
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
        }
    }

    fn record_path(&self, record: &RunRecord) -> PathBuf {
        self.history_dir.join(format!("{}.json", record.run_id))
    }
}

#[async_trait]
impl RunRecordStore for FsRecordStore {
    async fn save(&self, record: &RunRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.history_dir).await?;
        let path = self.record_path(record);
        let payload = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&path, payload).await?;
        debug!(run_id = %record.run_id, path = %path.display(), "persisted run record");
        Ok(())
    }

    async fn save_latest_success(&self, config: &DeployConfig) -> Result<()> {
        tokio::fs::create_dir_all(&self.history_dir).await?;
        let path = self.history_dir.join(LATEST_SUCCESS_FILE);
        let payload = serde_json::to_vec_pretty(&LatestSuccess {
            config: config.clone(),
            recorded_at: Utc::now(),
        })?;
        tokio::fs::write(&path, payload).await?;
        debug!(path = %path.display(), "persisted latest successful configuration");
        Ok(())
    }

    async fn load_latest_success(&self) -> Result<Option<DeployConfig>> {
        let path = self.history_dir.join(LATEST_SUCCESS_FILE);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let latest: LatestSuccess = serde_json::from_slice(&content)?;
        Ok(Some(latest.config))
    }
}

/// Result-artifact file shape: a map of deployed contracts keyed by name.
#[derive(Debug, Deserialize)]
struct DeployArtifact {
    #[serde(default)]
    contracts: Option<BTreeMap<String, ContractSummary>>,
}

/// Best-effort read of the result artifact.
///
/// A missing file means "no structured results", not an error; any other
/// read or parse failure is logged and also treated as absence.
pub async fn read_artifact_summary(
    path: &Path,
) -> Option<BTreeMap<String, ContractSummary>> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to read deployment artifact");
            return None;
        }
    };

    match serde_json::from_slice::<DeployArtifact>(&content) {
        Ok(artifact) => artifact.contracts.filter(|c| !c.is_empty()),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to parse deployment artifact");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunId, RunStatus};
    use chrono::Utc;

    fn sample_record(dir: &Path) -> RunRecord {
        let now = Utc::now();
        let id = RunId::generate();
        RunRecord {
            run_id: id.clone(),
            status: RunStatus::Success,
            exit_code: Some(0),
            created_at: now,
            completed_at: now,
            logs_path: dir.join(format!("{id}.log")),
            config: DeployConfig {
                ballot_id: Some("ballot-9".into()),
                ..DeployConfig::default()
            },
            contracts: None,
            error: None,
            timestamp: now,
        }
    }

    #[tokio::test]
    async fn save_writes_one_json_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());
        let record = sample_record(dir.path());

        store.save(&record).await.unwrap();

        let path = dir.path().join(format!("{}.json", record.run_id));
        let content = tokio::fs::read(&path).await.unwrap();
        let loaded: RunRecord = serde_json::from_slice(&content).unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn latest_success_roundtrip_and_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRecordStore::new(dir.path());

        assert!(store.load_latest_success().await.unwrap().is_none());

        let config = DeployConfig {
            ballot_id: Some("ballot-3".into()),
            title: Some("Autumn vote".into()),
            ..DeployConfig::default()
        };
        store.save_latest_success(&config).await.unwrap();

        let loaded = store.load_latest_success().await.unwrap().unwrap();
        assert_eq!(loaded, config);

        // The envelope carries the recording timestamp alongside the config.
        let raw: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.path().join(LATEST_SUCCESS_FILE)).await.unwrap(),
        )
        .unwrap();
        assert_eq!(raw["ballotId"], "ballot-3");
        assert!(raw["recordedAt"].is_string());
    }

    #[tokio::test]
    async fn artifact_missing_is_absence() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_artifact_summary(&dir.path().join("nope.json")).await.is_none());
    }

    #[tokio::test]
    async fn artifact_parse_failure_is_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbt_deployment.json");
        tokio::fs::write(&path, b"not json at all").await.unwrap();
        assert!(read_artifact_summary(&path).await.is_none());
    }

    #[tokio::test]
    async fn artifact_reduces_to_stable_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbt_deployment.json");
        let artifact = serde_json::json!({
            "network": "localhost",
            "contracts": {
                "Ballot": {
                    "name": "Ballot",
                    "address": "0x123",
                    "transactionHash": "0xabc",
                    "gasUsed": "184233",
                    "ballot": { "id": "ballot-1" },
                    "proposals": ["Alpha"],
                    "pledges": [["build"]],
                    "bytecodeSize": 9999
                }
            }
        });
        tokio::fs::write(&path, serde_json::to_vec(&artifact).unwrap())
            .await
            .unwrap();

        let summary = read_artifact_summary(&path).await.unwrap();
        let ballot = &summary["Ballot"];
        assert_eq!(ballot.address.as_deref(), Some("0x123"));
        assert_eq!(ballot.transaction_hash.as_deref(), Some("0xabc"));
        assert_eq!(ballot.gas_used, Some(serde_json::json!("184233")));
        // Unknown fields are dropped from the stable subset.
        let json = serde_json::to_value(ballot).unwrap();
        assert!(json.get("bytecodeSize").is_none());
    }

    #[tokio::test]
    async fn artifact_without_contracts_is_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sbt_deployment.json");
        tokio::fs::write(&path, br#"{"network": "localhost"}"#).await.unwrap();
        assert!(read_artifact_summary(&path).await.is_none());
    }
}
