//! Outcome reports for signing and verification.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Stage;

/// Timing of a single completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u64,
}

/// Result of a successful signing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignReport {
    /// Final signed package.
    pub output: PathBuf,
    /// Hex-encoded SHA-256 of the final package.
    pub sha256: String,
    /// Size of the final package in bytes.
    pub size: u64,
    /// Completed stages in order.
    pub stages: Vec<StageTiming>,
    /// Whether a `.idsig` sidecar was found and deleted.
    pub sidecar_removed: bool,
    /// Path of the kept `.idsig` sidecar, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar: Option<PathBuf>,
    pub finished_at: DateTime<Utc>,
}

impl SignReport {
    /// Total time spent across all stages.
    pub fn total_elapsed_ms(&self) -> u64 {
        self.stages.iter().map(|s| s.elapsed_ms).sum()
    }
}

/// Per-scheme verification outcome reported by the verifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub verified: bool,
    pub v1: bool,
    pub v2: bool,
    pub v3: bool,
    pub v4: bool,
    /// Number of signers reported.
    pub signers: u32,
    /// Warning lines emitted by the verifier.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Error lines emitted by the verifier when verification fails.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_elapsed() {
        let report = SignReport {
            output: PathBuf::from("/tmp/app-signed.apk"),
            sha256: "00".repeat(32),
            size: 10,
            stages: vec![
                StageTiming {
                    stage: Stage::V1Sign,
                    elapsed_ms: 120,
                },
                StageTiming {
                    stage: Stage::Align,
                    elapsed_ms: 30,
                },
                StageTiming {
                    stage: Stage::FullSign,
                    elapsed_ms: 200,
                },
            ],
            sidecar_removed: false,
            sidecar: None,
            finished_at: Utc::now(),
        };
        assert_eq!(report.total_elapsed_ms(), 350);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["stages"][1]["stage"], "align");
        assert!(json.get("sidecar").is_none());
    }
}
