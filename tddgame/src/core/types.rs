//! Shared deterministic types for tracker core logic.
//!
//! These types define stable contracts between the classifier, the scoring
//! engine, the store, and the feedback client. They must not depend on
//! external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// TDD phase assigned to a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TddPhase {
    /// A failing test was added.
    Red,
    /// Production code made the tests pass.
    Green,
    /// Production structure changed while staying green.
    Refactor,
    /// None of the recognized patterns matched.
    Unknown,
}

impl TddPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TddPhase::Red => "red",
            TddPhase::Green => "green",
            TddPhase::Refactor => "refactor",
            TddPhase::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TddPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a game. Only `Running` games are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Running,
    Paused,
    Stopped,
}

impl GameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GameStatus::Running => "running",
            GameStatus::Paused => "paused",
            GameStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a project's test suite at one checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    Failed,
    /// The test tooling could not be started (missing binary, etc.).
    Unavailable,
}

impl TestOutcome {
    pub fn passed(self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

/// Output of classifying a single commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub phase: TddPhase,
    pub tests_passed: bool,
    pub is_refactoring: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("commit sha must be a non-empty hex string, got '{0}'")]
    InvalidSha(String),
    #[error("commit {sha} lists itself as a parent")]
    SelfParent { sha: String },
    #[error("commit {sha} has branch provenance but is not a merge")]
    BranchesOnNonMerge { sha: String },
    #[error("commit {sha} is marked as refactoring but classified as {phase}")]
    RefactorFlagMismatch { sha: String, phase: TddPhase },
}

/// One processed commit in a participant's history.
///
/// Records are append-only: once classified they are never mutated. Fields are
/// validated at construction and again when deserialized from storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCommitRecord")]
pub struct CommitRecord {
    pub sha: String,
    /// Zero-based position in the participant's processed sequence.
    pub position: usize,
    pub message: String,
    pub parents: Vec<String>,
    /// Non-mainline branches reachable through secondary parents.
    pub branches: Vec<String>,
    pub classification: TddPhase,
    pub tests_passed: bool,
    pub is_refactoring: bool,
}

impl CommitRecord {
    pub fn new(
        sha: impl Into<String>,
        position: usize,
        message: impl Into<String>,
        parents: Vec<String>,
        branches: Vec<String>,
        classification: Classification,
    ) -> Result<Self, RecordError> {
        let record = Self {
            sha: sha.into(),
            position,
            message: message.into(),
            parents,
            branches,
            classification: classification.phase,
            tests_passed: classification.tests_passed,
            is_refactoring: classification.is_refactoring,
        };
        record.validate()?;
        Ok(record)
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    fn validate(&self) -> Result<(), RecordError> {
        if !is_hex_sha(&self.sha) {
            return Err(RecordError::InvalidSha(self.sha.clone()));
        }
        for parent in &self.parents {
            if !is_hex_sha(parent) {
                return Err(RecordError::InvalidSha(parent.clone()));
            }
            if *parent == self.sha {
                return Err(RecordError::SelfParent {
                    sha: self.sha.clone(),
                });
            }
        }
        if !self.branches.is_empty() && !self.is_merge() {
            return Err(RecordError::BranchesOnNonMerge {
                sha: self.sha.clone(),
            });
        }
        // A refactor verdict wins over green/unknown, so the flag and phase travel together.
        if self.is_refactoring != (self.classification == TddPhase::Refactor) {
            return Err(RecordError::RefactorFlagMismatch {
                sha: self.sha.clone(),
                phase: self.classification,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RawCommitRecord {
    sha: String,
    position: usize,
    message: String,
    #[serde(default)]
    parents: Vec<String>,
    #[serde(default)]
    branches: Vec<String>,
    classification: TddPhase,
    tests_passed: bool,
    is_refactoring: bool,
}

impl TryFrom<RawCommitRecord> for CommitRecord {
    type Error = RecordError;

    fn try_from(raw: RawCommitRecord) -> Result<Self, Self::Error> {
        let record = CommitRecord {
            sha: raw.sha,
            position: raw.position,
            message: raw.message,
            parents: raw.parents,
            branches: raw.branches,
            classification: raw.classification,
            tests_passed: raw.tests_passed,
            is_refactoring: raw.is_refactoring,
        };
        record.validate()?;
        Ok(record)
    }
}

fn is_hex_sha(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn green() -> Classification {
        Classification {
            phase: TddPhase::Green,
            tests_passed: true,
            is_refactoring: false,
        }
    }

    #[test]
    fn merge_is_derived_from_parent_count() {
        let record = CommitRecord::new(
            "abc123",
            0,
            "Merge feature",
            vec!["aaa".to_string(), "bbb".to_string()],
            vec!["feature/x".to_string()],
            green(),
        )
        .expect("record");
        assert!(record.is_merge());
    }

    #[test]
    fn rejects_non_hex_sha() {
        let err = CommitRecord::new("not-a-sha", 0, "msg", Vec::new(), Vec::new(), green())
            .unwrap_err();
        assert_eq!(err, RecordError::InvalidSha("not-a-sha".to_string()));
    }

    #[test]
    fn rejects_branches_on_single_parent_commit() {
        let err = CommitRecord::new(
            "abc",
            1,
            "msg",
            vec!["def".to_string()],
            vec!["feature/x".to_string()],
            green(),
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::BranchesOnNonMerge { .. }));
    }

    #[test]
    fn rejects_refactor_flag_on_green_phase() {
        let err = CommitRecord::new(
            "abc",
            1,
            "msg",
            vec!["def".to_string()],
            Vec::new(),
            Classification {
                phase: TddPhase::Green,
                tests_passed: true,
                is_refactoring: true,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::RefactorFlagMismatch { .. }));
    }

    #[test]
    fn deserialize_runs_validation() {
        let raw = r#"{"sha":"zz","position":0,"message":"m","classification":"red","tests_passed":false,"is_refactoring":false}"#;
        let err = serde_json::from_str::<CommitRecord>(raw).unwrap_err();
        assert!(err.to_string().contains("non-empty hex"));
    }

    #[test]
    fn phase_serializes_lowercase() {
        let json = serde_json::to_string(&TddPhase::Refactor).expect("serialize");
        assert_eq!(json, "\"refactor\"");
    }
}
