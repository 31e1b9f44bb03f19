//! Sequence-aware scoring of classified commits.
//!
//! Scoring is a pure function of the ordered commit history. Every quantity a
//! commit's score depends on looks backward only, so scoring a history that was
//! extended with new commits leaves the earlier breakdowns unchanged. Nothing is
//! memoized: callers recompute from the authoritative records every time.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::types::{CommitRecord, TddPhase};

pub const BASE_SCORE: f64 = 0.5;
pub const REFACTOR_BONUS: f64 = 0.3;
pub const REPEAT_BONUS: f64 = 0.2;
pub const INVALID_TRANSITION_PENALTY: f64 = -0.5;
pub const MERGE_NON_GREEN_PENALTY: f64 = -0.5;
pub const MERGE_GREEN_BONUS: f64 = 1.0;

const MESSAGE_VERB_BONUS: f64 = 0.5;
const MESSAGE_LENGTH_BONUS: f64 = 0.5;
const MESSAGE_MIN_CHARS: usize = 15;
const MESSAGE_MAX_CHARS: usize = 50;

static MESSAGE_VERB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(Add|Fix|Refactor|Remove|Update|Implement)\b")
        .expect("message verb regex should compile")
});

/// Score components for one commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub sha: String,
    pub branches: Vec<String>,
    pub base: f64,
    pub message_quality: f64,
    pub tdd_bonus: f64,
    pub merge_density: f64,
    pub refactor_bonus: f64,
    /// Sum of the above, rounded to two decimals.
    pub commit_total: f64,
    pub transition: Transition,
    pub transition_bonus: f64,
    pub merge_adjustment: f64,
    /// Consecutive `unknown` commits immediately before this one.
    pub unknown_streak: usize,
    pub total: f64,
}

/// Phase change that produced a transition bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transition {
    /// The first commit in the history has no predecessor.
    First,
    Step { from: TddPhase, to: TddPhase },
}

/// Per-commit breakdowns plus the overall total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub per_commit: Vec<ScoreBreakdown>,
    pub overall: f64,
}

/// Score a full ordered history.
pub fn score_history(records: &[CommitRecord]) -> ScoreReport {
    let mut per_commit = Vec::with_capacity(records.len());
    let mut overall = 0.0;
    for (index, record) in records.iter().enumerate() {
        let breakdown = score_position(records, index, record);
        overall += breakdown.total;
        per_commit.push(breakdown);
    }
    ScoreReport {
        per_commit,
        overall: round2(overall),
    }
}

fn score_position(records: &[CommitRecord], index: usize, record: &CommitRecord) -> ScoreBreakdown {
    let phase = record.classification;
    let unknown_streak = unknown_streak(records, index);
    let base = BASE_SCORE;
    let message_quality = message_quality(&record.message);
    let tdd_bonus = tdd_bonus(phase);
    let merge_density = merge_density(records, index);
    let refactor_bonus = if record.is_refactoring {
        REFACTOR_BONUS
    } else {
        0.0
    };
    let commit_total = round2(base + message_quality + tdd_bonus + refactor_bonus + merge_density);

    let transition = match index {
        0 => Transition::First,
        _ => Transition::Step {
            from: records[index - 1].classification,
            to: phase,
        },
    };
    let transition_bonus = match transition {
        Transition::First => 0.0,
        Transition::Step { from, to } => transition_bonus(from, to),
    };
    let merge_adjustment = merge_adjustment(record.is_merge(), phase);

    ScoreBreakdown {
        sha: record.sha.clone(),
        branches: record.branches.clone(),
        base,
        message_quality,
        tdd_bonus,
        merge_density,
        refactor_bonus,
        commit_total,
        transition,
        transition_bonus,
        merge_adjustment,
        unknown_streak,
        total: round2(commit_total + transition_bonus + merge_adjustment),
    }
}

/// Message quality in `[0, 1]`: an imperative verb prefix and a readable length.
pub fn message_quality(message: &str) -> f64 {
    let mut score = 0.0;
    if MESSAGE_VERB_RE.is_match(message) {
        score += MESSAGE_VERB_BONUS;
    }
    let len = message.chars().count();
    if (MESSAGE_MIN_CHARS..=MESSAGE_MAX_CHARS).contains(&len) {
        score += MESSAGE_LENGTH_BONUS;
    }
    score
}

pub fn tdd_bonus(phase: TddPhase) -> f64 {
    match phase {
        TddPhase::Red => 0.5,
        TddPhase::Green => 1.0,
        TddPhase::Refactor => 0.75,
        TddPhase::Unknown => 0.0,
    }
}

pub fn transition_bonus(from: TddPhase, to: TddPhase) -> f64 {
    match (from, to) {
        (TddPhase::Red, TddPhase::Green)
        | (TddPhase::Green, TddPhase::Refactor)
        | (TddPhase::Refactor, TddPhase::Red) => 0.5,
        (TddPhase::Green, TddPhase::Red) => 0.0,
        (from, to) if from == to => REPEAT_BONUS,
        _ => INVALID_TRANSITION_PENALTY,
    }
}

pub fn merge_adjustment(is_merge: bool, phase: TddPhase) -> f64 {
    match (is_merge, phase) {
        (false, _) => 0.0,
        (true, TddPhase::Green) => MERGE_GREEN_BONUS,
        (true, _) => MERGE_NON_GREEN_PENALTY,
    }
}

/// Share of merges among positions `1..=index`; position 0 never counts.
pub fn merge_density(records: &[CommitRecord], index: usize) -> f64 {
    if index == 0 {
        return 0.0;
    }
    let merges = records[1..=index]
        .iter()
        .filter(|record| record.is_merge())
        .count();
    merges as f64 / index as f64
}

/// Consecutive `unknown` commits right before `index`, for an `unknown` commit.
pub fn unknown_streak(records: &[CommitRecord], index: usize) -> usize {
    if records[index].classification != TddPhase::Unknown {
        return 0;
    }
    records[..index]
        .iter()
        .rev()
        .take_while(|record| record.classification == TddPhase::Unknown)
        .count()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
