// src/render.rs

//! Input-file rendering for the external deployment process.
//!
//! The deployment script does not read the configuration directly; it reads
//! an env file rendered from a `{{key}}` template. The orchestrator injects
//! the rendered file's path via the process environment and deletes the file
//! after finalization.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::DeployConfig;
use crate::errors::{DeploycastError, Result};
use crate::run::RunId;

/// Produces a transient input file for one run from a validated
/// configuration. Implemented by [`TemplateEnvRenderer`] in production;
/// tests may substitute a failing or trivial renderer.
#[async_trait]
pub trait EnvRenderer: Send + Sync {
    /// Render the input file for `run_id` and return its path. The caller
    /// owns the file and deletes it during finalization.
    async fn render(&self, run_id: &RunId, config: &DeployConfig) -> Result<PathBuf>;
}

/// Renders `deploy-<runId>.env` under a tmp directory by substituting
/// `{{key}}` placeholders in a template file.
#[derive(Debug, Clone)]
pub struct TemplateEnvRenderer {
    template_path: PathBuf,
    tmp_dir: PathBuf,
}

impl TemplateEnvRenderer {
    pub fn new(template_path: impl Into<PathBuf>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            tmp_dir: tmp_dir.into(),
        }
    }
}

#[async_trait]
impl EnvRenderer for TemplateEnvRenderer {
    async fn render(&self, run_id: &RunId, config: &DeployConfig) -> Result<PathBuf> {
        let template = tokio::fs::read_to_string(&self.template_path)
            .await
            .map_err(|e| {
                DeploycastError::TemplateError(format!(
                    "reading template {}: {e}",
                    self.template_path.display()
                ))
            })?;

        let content = render_template(&template, config);

        tokio::fs::create_dir_all(&self.tmp_dir).await?;
        let path = self.tmp_dir.join(format!("{run_id}.env"));
        tokio::fs::write(&path, content).await?;
        debug!(run_id = %run_id, path = %path.display(), "rendered deploy env file");
        Ok(path)
    }
}

/// Substitute every known `{{key}}` placeholder. Absent values render as
/// empty strings; unknown placeholders are left untouched.
pub fn render_template(template: &str, config: &DeployConfig) -> String {
    let (proposals, pledges) = serialize_proposals(config);

    let replacements: [(&str, String); 11] = [
        ("ballotId", opt(&config.ballot_id)),
        ("title", opt(&config.title)),
        ("description", opt(&config.description)),
        ("opensAt", opt(&config.schedule.opens_at)),
        ("closesAt", opt(&config.schedule.closes_at)),
        ("announcesAt", opt(&config.schedule.announces_at)),
        (
            "expectedVoters",
            config.expected_voters.map(|v| v.to_string()).unwrap_or_default(),
        ),
        ("proposals", proposals),
        ("pledges", pledges),
        ("mascotCid", opt(&config.mascot_cid)),
        ("verifierAddress", opt(&config.verifier_address)),
    ];

    let mut out = template.to_string();
    for (key, value) in replacements {
        out = out.replace(&format!("{{{{{key}}}}}"), &value);
    }
    out
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

/// Proposal names comma-joined; pledge groups `|`-joined within a proposal
/// and `;`-joined across proposals. Blank entries are dropped.
fn serialize_proposals(config: &DeployConfig) -> (String, String) {
    let names: Vec<&str> = config
        .proposals
        .iter()
        .map(|p| p.name.trim())
        .filter(|n| !n.is_empty())
        .collect();

    let groups: Vec<String> = config
        .proposals
        .iter()
        .map(|p| {
            p.pledges
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();

    (names.join(","), groups.join(";"))
}

/// Best-effort removal of a rendered input file. A missing file is not an
/// error.
pub async fn remove_env_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed deploy env file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove deploy env file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProposalConfig, ScheduleConfig};
    use proptest::prelude::*;

    fn sample_config() -> DeployConfig {
        DeployConfig {
            ballot_id: Some("ballot-1".into()),
            title: Some("Spring vote".into()),
            description: None,
            schedule: ScheduleConfig {
                opens_at: Some("2026-09-01T00:00:00Z".into()),
                closes_at: Some("2026-09-08T00:00:00Z".into()),
                announces_at: None,
            },
            expected_voters: Some(42),
            proposals: vec![
                ProposalConfig {
                    name: " Alpha ".into(),
                    pledges: vec!["build".into(), " ship ".into()],
                },
                ProposalConfig {
                    name: "Beta".into(),
                    pledges: vec![],
                },
                ProposalConfig {
                    name: "  ".into(),
                    pledges: vec!["ignored-name-still-grouped".into()],
                },
            ],
            mascot_cid: None,
            verifier_address: Some("0xabc".into()),
        }
    }

    #[test]
    fn substitutes_known_placeholders() {
        let template = "BALLOT_ID={{ballotId}}\nTITLE={{title}}\nDESC={{description}}\n\
                        VOTERS={{expectedVoters}}\nPROPOSALS={{proposals}}\nPLEDGES={{pledges}}\n\
                        VERIFIER={{verifierAddress}}\n";
        let out = render_template(template, &sample_config());

        assert!(out.contains("BALLOT_ID=ballot-1"));
        assert!(out.contains("TITLE=Spring vote"));
        // Absent values become empty strings.
        assert!(out.contains("DESC=\n"));
        assert!(out.contains("VOTERS=42"));
        // Names are trimmed, blanks dropped; pledge groups keep positions.
        assert!(out.contains("PROPOSALS=Alpha,Beta\n"));
        assert!(out.contains("PLEDGES=build|ship;;ignored-name-still-grouped\n"));
        assert!(out.contains("VERIFIER=0xabc"));
    }

    #[test]
    fn unknown_placeholders_survive() {
        let out = render_template("X={{somethingElse}}", &sample_config());
        assert_eq!(out, "X={{somethingElse}}");
    }

    #[tokio::test]
    async fn renders_to_tmp_file_and_cleanup_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("deploy.templates.env");
        tokio::fs::write(&template_path, "ID={{ballotId}}\n").await.unwrap();

        let renderer =
            TemplateEnvRenderer::new(&template_path, dir.path().join("tmp"));
        let run_id = RunId::generate();
        let path = renderer.render(&run_id, &sample_config()).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "ID=ballot-1\n");

        remove_env_file(&path).await;
        assert!(!path.exists());
        // Second removal of the now-missing file must not error or panic.
        remove_env_file(&path).await;
    }

    #[tokio::test]
    async fn missing_template_is_a_template_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = TemplateEnvRenderer::new(dir.path().join("nope.env"), dir.path());
        let err = renderer
            .render(&RunId::generate(), &sample_config())
            .await
            .unwrap_err();
        assert!(matches!(err, DeploycastError::TemplateError(_)));
    }

    proptest! {
        // No `{{key}}` placeholder for a known key survives substitution,
        // whatever the configuration values contain.
        #[test]
        fn substitution_is_total_for_known_keys(
            ballot_id in ".{0,40}",
            title in ".{0,40}",
            names in proptest::collection::vec(".{0,20}", 0..4),
        ) {
            let config = DeployConfig {
                ballot_id: Some(ballot_id),
                title: Some(title),
                proposals: names
                    .into_iter()
                    .map(|name| ProposalConfig { name, pledges: vec![] })
                    .collect(),
                ..DeployConfig::default()
            };
            let template = "{{ballotId}}|{{title}}|{{proposals}}|{{pledges}}";
            let out = render_template(template, &config);
            for key in ["ballotId", "title", "proposals", "pledges"] {
                let needle = format!("{{{{{key}}}}}");
                prop_assert!(!out.contains(&needle), "unsubstituted {needle} in {out:?}");
            }
        }
    }
}
