#![allow(dead_code)]

use std::path::PathBuf;

use async_trait::async_trait;

use deploycast::config::{DeployConfig, ProposalConfig, ScheduleConfig};
use deploycast::errors::{DeploycastError, Result};
use deploycast::render::EnvRenderer;
use deploycast::run::RunId;

/// Builder for `DeployConfig` to simplify test setup.
pub struct DeployConfigBuilder {
    config: DeployConfig,
}

impl DeployConfigBuilder {
    pub fn new(ballot_id: &str) -> Self {
        Self {
            config: DeployConfig {
                ballot_id: Some(ballot_id.to_string()),
                ..DeployConfig::default()
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.config.title = Some(title.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.config.description = Some(description.to_string());
        self
    }

    pub fn schedule(mut self, opens_at: &str, closes_at: &str) -> Self {
        self.config.schedule = ScheduleConfig {
            opens_at: Some(opens_at.to_string()),
            closes_at: Some(closes_at.to_string()),
            announces_at: None,
        };
        self
    }

    pub fn expected_voters(mut self, voters: u64) -> Self {
        self.config.expected_voters = Some(voters);
        self
    }

    pub fn proposal(mut self, name: &str, pledges: &[&str]) -> Self {
        self.config.proposals.push(ProposalConfig {
            name: name.to_string(),
            pledges: pledges.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn verifier_address(mut self, address: &str) -> Self {
        self.config.verifier_address = Some(address.to_string());
        self
    }

    pub fn build(self) -> DeployConfig {
        self.config
    }
}

/// Renderer that writes a minimal env file under `dir`, without needing a
/// template on disk.
pub struct StubEnvRenderer {
    dir: PathBuf,
}

impl StubEnvRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl EnvRenderer for StubEnvRenderer {
    async fn render(&self, run_id: &RunId, config: &DeployConfig) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{run_id}.env"));
        let ballot = config.ballot_id.clone().unwrap_or_default();
        tokio::fs::write(&path, format!("BALLOT_ID={ballot}\n")).await?;
        Ok(path)
    }
}

/// Renderer that always fails, for exercising the failed-to-begin path.
pub struct FailingEnvRenderer;

#[async_trait]
impl EnvRenderer for FailingEnvRenderer {
    async fn render(&self, _run_id: &RunId, _config: &DeployConfig) -> Result<PathBuf> {
        Err(DeploycastError::TemplateError(
            "stub renderer refuses to render".to_string(),
        ))
    }
}
