//! Feedback collaborator client.
//!
//! A [`FeedbackGenerator`] turns a batch of newly classified commits into raw
//! reply text. [`request_feedback`] owns the retry loop: replies are parsed,
//! validated against `schemas/feedback_response.schema.json`, and re-requested
//! with corrective notes until they fit or attempts run out.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Validator, validator_for};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::types::{CommitRecord, TddPhase};
use crate::io::process::{CommandLimits, command_from_argv, run_command_with_timeout};

const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("prompts/feedback_system.md");
const FEEDBACK_SCHEMA: &str = include_str!("../../schemas/feedback_response.schema.json");

static FEEDBACK_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(FEEDBACK_SCHEMA).expect("feedback schema should be valid JSON");
    validator_for(&schema).expect("feedback schema should compile")
});

/// What the feedback collaborator sees about one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackCommit {
    pub sha: String,
    pub branches: Vec<String>,
    pub classification: TddPhase,
    pub tests_passed: bool,
    pub is_refactoring: bool,
}

impl From<&CommitRecord> for FeedbackCommit {
    fn from(record: &CommitRecord) -> Self {
        Self {
            sha: record.sha.clone(),
            branches: record.branches.clone(),
            classification: record.classification,
            tests_passed: record.tests_passed,
            is_refactoring: record.is_refactoring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitFeedback {
    pub commit: String,
    pub feedback: String,
}

/// Validated reply: one entry per commit, aligned by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub per_commit_feedback: Vec<CommitFeedback>,
    pub overall_feedback: String,
}

/// One call to the generator: the batch plus corrections for earlier bad replies.
#[derive(Debug, Clone, Copy)]
pub struct FeedbackRequest<'a> {
    pub commits: &'a [FeedbackCommit],
    pub corrections: &'a [String],
}

pub trait FeedbackGenerator {
    /// Return raw reply text for the request.
    fn generate(&self, request: &FeedbackRequest<'_>) -> Result<String>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedbackFormatError {
    #[error("response contains no JSON object")]
    NoJson,
    #[error("JSON decode error: {0}")]
    InvalidJson(String),
    #[error("missing or invalid keys in response: {0}")]
    Schema(String),
    #[error("expected {expected} feedback entries, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("feedback request failed: {0:#}")]
    Transport(anyhow::Error),
    #[error("no valid feedback after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: FeedbackFormatError,
    },
}

/// Ask `generator` for feedback on `commits`, retrying malformed replies.
///
/// Each rejected reply adds an `Attempt N: ...` correction to the next request.
/// Transport failures are returned immediately.
#[instrument(skip_all, fields(commits = commits.len(), max_attempts = max_attempts))]
pub fn request_feedback<G: FeedbackGenerator>(
    generator: &G,
    commits: &[FeedbackCommit],
    max_attempts: u32,
) -> Result<FeedbackReport, FeedbackError> {
    let mut corrections: Vec<String> = Vec::new();
    let mut last = FeedbackFormatError::NoJson;
    for attempt in 1..=max_attempts {
        let request = FeedbackRequest {
            commits,
            corrections: &corrections,
        };
        let raw = generator
            .generate(&request)
            .map_err(FeedbackError::Transport)?;
        match parse_feedback(&raw, commits.len()) {
            Ok(report) => {
                for (commit, entry) in commits.iter().zip(&report.per_commit_feedback) {
                    if entry.commit != commit.sha && !commit.sha.starts_with(&entry.commit) {
                        warn!(expected = %commit.sha, got = %entry.commit, "feedback entry names a different commit");
                    }
                }
                debug!(attempt, "feedback accepted");
                return Ok(report);
            }
            Err(err) => {
                warn!(attempt, err = %err, "rejected feedback reply");
                corrections.push(format!("Attempt {attempt}: {err}"));
                last = err;
            }
        }
    }
    Err(FeedbackError::Exhausted {
        attempts: max_attempts,
        last,
    })
}

/// Parse and validate one raw reply against the expected batch size.
pub fn parse_feedback(raw: &str, expected: usize) -> Result<FeedbackReport, FeedbackFormatError> {
    let json = extract_json(raw).ok_or(FeedbackFormatError::NoJson)?;
    let value: Value = serde_json::from_str(json)
        .map_err(|err| FeedbackFormatError::InvalidJson(err.to_string()))?;
    if !FEEDBACK_VALIDATOR.is_valid(&value) {
        let messages = FEEDBACK_VALIDATOR
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(FeedbackFormatError::Schema(messages.join("; ")));
    }
    let report: FeedbackReport = serde_json::from_value(value)
        .map_err(|err| FeedbackFormatError::Schema(err.to_string()))?;
    if report.per_commit_feedback.len() != expected {
        return Err(FeedbackFormatError::LengthMismatch {
            expected,
            actual: report.per_commit_feedback.len(),
        });
    }
    Ok(report)
}

/// Slice from the first `{` to the last `}`; replies often wrap JSON in prose or fences.
pub fn extract_json(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

/// Render the full prompt handed to a command-backed generator.
pub fn render_prompt(system_prompt: &str, request: &FeedbackRequest<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("feedback", FEEDBACK_TEMPLATE)
        .context("load feedback template")?;
    let commits = serde_json::json!({ "commits": request.commits });
    let commits_json = serde_json::to_string_pretty(&commits).context("serialize commits")?;
    let rendered = env.get_template("feedback")?.render(context! {
        system_prompt => system_prompt.trim(),
        commits_json => commits_json,
        commit_count => request.commits.len(),
        corrections => request.corrections,
    })?;
    Ok(rendered)
}

/// Pipes the rendered prompt to an external command and returns its stdout.
#[derive(Debug, Clone)]
pub struct CommandFeedbackGenerator {
    pub command: Vec<String>,
    pub system_prompt: String,
    pub limits: CommandLimits,
}

impl FeedbackGenerator for CommandFeedbackGenerator {
    fn generate(&self, request: &FeedbackRequest<'_>) -> Result<String> {
        let prompt = render_prompt(&self.system_prompt, request)?;
        let workdir = std::env::current_dir().context("resolve current directory")?;
        let cmd = command_from_argv(&self.command, &workdir)?;
        let output = run_command_with_timeout(cmd, Some(prompt.as_bytes()), self.limits)
            .context("run feedback command")?;
        if !output.success() {
            return Err(anyhow!("feedback command failed: {}", output.diagnostic()));
        }
        Ok(output.stdout_text())
    }
}

/// Generator used when no feedback command is configured: empty texts, correct shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFeedback;

impl FeedbackGenerator for DisabledFeedback {
    fn generate(&self, request: &FeedbackRequest<'_>) -> Result<String> {
        let report = FeedbackReport {
            per_commit_feedback: request
                .commits
                .iter()
                .map(|commit| CommitFeedback {
                    commit: commit.sha.clone(),
                    feedback: String::new(),
                })
                .collect(),
            overall_feedback: String::new(),
        };
        serde_json::to_string(&report).context("serialize empty feedback")
    }
}

/// Either generator, chosen from config at startup.
#[derive(Debug, Clone)]
pub enum ConfiguredFeedback {
    Command(CommandFeedbackGenerator),
    Disabled(DisabledFeedback),
}

impl FeedbackGenerator for ConfiguredFeedback {
    fn generate(&self, request: &FeedbackRequest<'_>) -> Result<String> {
        match self {
            ConfiguredFeedback::Command(generator) => generator.generate(request),
            ConfiguredFeedback::Disabled(generator) => generator.generate(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::ScriptedFeedback;

    fn commit(sha: &str, phase: TddPhase) -> FeedbackCommit {
        FeedbackCommit {
            sha: sha.to_string(),
            branches: Vec::new(),
            classification: phase,
            tests_passed: phase != TddPhase::Red,
            is_refactoring: phase == TddPhase::Refactor,
        }
    }

    fn valid_reply(shas: &[&str]) -> String {
        let entries = shas
            .iter()
            .map(|sha| format!(r#"{{"commit":"{sha}","feedback":"nice"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"per_commit_feedback":[{entries}],"overall_feedback":"keep going"}}"#)
    }

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let raw = "Sure! ```json\n{\"a\": {\"b\": 1}}\n``` hope this helps";
        assert_eq!(extract_json(raw), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        assert_eq!(parse_feedback("nothing", 1), Err(FeedbackFormatError::NoJson));
        assert!(matches!(
            parse_feedback("{not json}", 1),
            Err(FeedbackFormatError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_feedback(r#"{"per_commit_feedback": "x", "overall_feedback": "y"}"#, 1),
            Err(FeedbackFormatError::Schema(_))
        ));
        assert_eq!(
            parse_feedback(&valid_reply(&["a1"]), 2),
            Err(FeedbackFormatError::LengthMismatch {
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn malformed_reply_is_retried_with_correction() {
        let generator = ScriptedFeedback::new(vec![
            Ok("I think the commits look fine".to_string()),
            Ok(valid_reply(&["a1", "b2"])),
        ]);
        let commits = vec![commit("a1", TddPhase::Red), commit("b2", TddPhase::Green)];

        let report = request_feedback(&generator, &commits, 3).expect("feedback");
        assert_eq!(report.per_commit_feedback.len(), 2);
        assert_eq!(report.overall_feedback, "keep going");

        let seen = generator.corrections_seen();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is_empty());
        assert_eq!(seen[1], vec!["Attempt 1: response contains no JSON object".to_string()]);
    }

    #[test]
    fn exhausting_attempts_reports_last_error() {
        let generator = ScriptedFeedback::new(vec![
            Ok(valid_reply(&["a1"])),
            Ok(valid_reply(&["a1"])),
            Ok(valid_reply(&["a1"])),
        ]);
        let commits = vec![commit("a1", TddPhase::Red), commit("b2", TddPhase::Green)];

        let err = request_feedback(&generator, &commits, 3).unwrap_err();
        match err {
            FeedbackError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    last,
                    FeedbackFormatError::LengthMismatch {
                        expected: 2,
                        actual: 1
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(generator.corrections_seen().len(), 3);
    }

    #[test]
    fn transport_failure_is_not_retried() {
        let generator = ScriptedFeedback::new(vec![
            Err("connection refused".to_string()),
            Ok(valid_reply(&["a1"])),
        ]);
        let commits = vec![commit("a1", TddPhase::Red)];
        let err = request_feedback(&generator, &commits, 3).unwrap_err();
        assert!(matches!(err, FeedbackError::Transport(_)));
        assert_eq!(generator.corrections_seen().len(), 1);
    }

    #[test]
    fn disabled_generator_yields_valid_empty_feedback() {
        let commits = vec![commit("a1", TddPhase::Red), commit("b2", TddPhase::Green)];
        let report = request_feedback(&DisabledFeedback, &commits, 1).expect("feedback");
        assert_eq!(report.per_commit_feedback[1].commit, "b2");
        assert!(report.overall_feedback.is_empty());
    }

    #[test]
    fn prompt_lists_commits_and_corrections() {
        let commits = vec![commit("a1", TddPhase::Refactor)];
        let corrections = vec!["Attempt 1: response contains no JSON object".to_string()];
        let prompt = render_prompt(
            "Be kind.",
            &FeedbackRequest {
                commits: &commits,
                corrections: &corrections,
            },
        )
        .expect("render");
        assert!(prompt.starts_with("Be kind."));
        assert!(prompt.contains("\"classification\": \"refactor\""));
        assert!(prompt.contains("exactly 1 entries"));
        assert!(prompt.contains("- Attempt 1: response contains no JSON object"));
    }

    #[test]
    fn command_generator_receives_prompt_on_stdin() {
        let generator = CommandFeedbackGenerator {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"prompt=$(cat); case "$prompt" in *'"sha": "a1"'*) echo '{"per_commit_feedback":[{"commit":"a1","feedback":"ok"}],"overall_feedback":"fine"}' ;; esac"#
                    .to_string(),
            ],
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            limits: CommandLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
            },
        };
        let commits = vec![commit("a1", TddPhase::Green)];
        let report = request_feedback(&generator, &commits, 1).expect("feedback");
        assert_eq!(report.overall_feedback, "fine");
    }
}
