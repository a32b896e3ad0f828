//! Filesystem submission sink.
//!
//! Writes the verified patch and its evidence bundle under a run directory,
//! each with an integrity digest file. The returned reference is the bundle
//! path. A code-host integration (PR creation) would implement the same
//! `SubmissionSink` trait in its place.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use automend_core::report::content_digest;
use automend_core::{Evidence, Result, SubmissionSink};

/// Persists verified patches to `<dir>/<session_id>/`.
pub struct FsSubmissionSink {
    dir: PathBuf,
}

impl FsSubmissionSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[derive(Serialize)]
struct EvidenceArtifact<'a> {
    #[serde(flatten)]
    evidence: &'a Evidence,
    patch_digest: String,
    submitted_at: chrono::DateTime<Utc>,
}

#[async_trait]
impl SubmissionSink for FsSubmissionSink {
    async fn submit(&self, diff: &str, evidence: &Evidence) -> Result<String> {
        let bundle_dir = self.dir.join(evidence.session_id.to_string());
        tokio::fs::create_dir_all(&bundle_dir).await?;

        let patch_path = bundle_dir.join("patch.diff");
        tokio::fs::write(&patch_path, diff).await?;

        let artifact = EvidenceArtifact {
            evidence,
            patch_digest: content_digest(diff.as_bytes()),
            submitted_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&artifact)?;
        tokio::fs::write(bundle_dir.join("evidence.json"), &json).await?;
        tokio::fs::write(
            bundle_dir.join("evidence.digest"),
            content_digest(&json).as_bytes(),
        )
        .await?;

        info!(bundle = %bundle_dir.display(), "verified patch bundle written");
        Ok(bundle_dir.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn evidence() -> Evidence {
        Evidence {
            session_id: Uuid::new_v4(),
            attempt_index: 1,
            test_command: "pytest -q".to_string(),
            baseline_failing: ["test_add".to_string()].into_iter().collect(),
            post_failing: BTreeSet::new(),
            rationale: Some("swap operands".to_string()),
        }
    }

    #[tokio::test]
    async fn test_submit_writes_bundle() {
        let dir = TempDir::new().expect("tempdir");
        let sink = FsSubmissionSink::new(dir.path().to_path_buf());
        let evidence = evidence();

        let reference = sink
            .submit("--- a/x\n+++ b/x\n@@ -1,1 +1,1 @@\n-a\n+b\n", &evidence)
            .await
            .expect("submit");

        let bundle = PathBuf::from(&reference);
        assert!(bundle.join("patch.diff").exists());
        assert!(bundle.join("evidence.json").exists());
        assert!(bundle.join("evidence.digest").exists());

        let json = std::fs::read_to_string(bundle.join("evidence.json")).expect("read");
        assert!(json.contains("test_add"));
        assert!(json.contains("patch_digest"));
    }

    #[tokio::test]
    async fn test_evidence_digest_matches_content() {
        let dir = TempDir::new().expect("tempdir");
        let sink = FsSubmissionSink::new(dir.path().to_path_buf());

        let reference = sink.submit("patch body", &evidence()).await.expect("submit");
        let bundle = PathBuf::from(&reference);

        let json = std::fs::read(bundle.join("evidence.json")).expect("read json");
        let digest = std::fs::read_to_string(bundle.join("evidence.digest")).expect("read digest");
        assert_eq!(digest, content_digest(&json));
    }
}
