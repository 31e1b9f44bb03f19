//! Polling orchestrator: one cycle syncs, classifies, scores, and records every
//! active participant of every running game.

use std::collections::HashSet;
use std::fmt;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::classifier::PathRules;
use crate::core::locator::clone_url;
use crate::core::scoring::score_history;
use crate::core::types::{CommitRecord, GameStatus};
use crate::io::commit_classifier::CommitClassifier;
use crate::io::config::TrackerConfig;
use crate::io::feedback::{FeedbackCommit, FeedbackGenerator, request_feedback};
use crate::io::git::Git;
use crate::io::process::CommandLimits;
use crate::io::store::{
    CycleUpdate, GameRecord, GameStore, HistoryEntry, ParticipantField, ParticipantRecord,
};
use crate::io::sync::{TrackedRepository, synchronize};
use crate::io::test_runner::TestRunner;

/// Settings the tracker needs from the config file.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub branch: String,
    pub clone_url_template: String,
    pub paths: PathRules,
    pub git_limits: CommandLimits,
    pub feedback_attempts: u32,
}

impl From<&TrackerConfig> for TrackerSettings {
    fn from(cfg: &TrackerConfig) -> Self {
        Self {
            branch: cfg.branch.clone(),
            clone_url_template: cfg.clone_url_template.clone(),
            paths: cfg.paths.clone(),
            git_limits: cfg.git_limits(),
            feedback_attempts: cfg.feedback.max_attempts,
        }
    }
}

/// What happened to one participant during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ParticipantOutcome {
    /// The participant is paused.
    Skipped,
    /// Synchronization failed; the message was stored as the participant's feedback.
    SyncFailed(String),
    UpToDate,
    Processed { new_commits: usize, score: f64 },
    /// Feedback could not be obtained; the batch stays unprocessed for the next cycle.
    FeedbackFailed(String),
    /// Classification or storage failed; nothing was recorded.
    Failed(String),
}

impl ParticipantOutcome {
    /// True when the participant could not be brought up to date this cycle.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self,
            Self::SyncFailed(_) | Self::FeedbackFailed(_) | Self::Failed(_)
        )
    }
}

impl fmt::Display for ParticipantOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "paused"),
            Self::SyncFailed(err) => write!(f, "sync failed: {err}"),
            Self::UpToDate => write!(f, "up to date"),
            Self::Processed { new_commits, score } => {
                write!(f, "processed {new_commits} commit(s), score {score:.2}")
            }
            Self::FeedbackFailed(err) => write!(f, "feedback failed: {err}"),
            Self::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantReport {
    pub game_id: String,
    pub participant_id: String,
    pub outcome: ParticipantOutcome,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub games_polled: usize,
    pub participants: Vec<ParticipantReport>,
}

pub struct Tracker<S, T, F> {
    store: S,
    runner: T,
    feedback: F,
    settings: TrackerSettings,
}

impl<S: GameStore, T: TestRunner, F: FeedbackGenerator> Tracker<S, T, F> {
    pub fn new(store: S, runner: T, feedback: F, settings: TrackerSettings) -> Self {
        Self {
            store,
            runner,
            feedback,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Process every running game once, participants strictly in order.
    ///
    /// A game paused or stopped mid-cycle is noticed before its next participant.
    #[instrument(skip_all)]
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        for game in self.store.list_games().context("list games")? {
            if game.status != GameStatus::Running {
                debug!(game = %game.id, status = %game.status, "skipping game");
                continue;
            }
            report.games_polled += 1;
            self.poll_game(&game, &mut report)?;
        }
        Ok(report)
    }

    fn poll_game(&self, game: &GameRecord, report: &mut CycleReport) -> Result<()> {
        let participants = self
            .store
            .list_participants(&game.id)
            .with_context(|| format!("list participants of {}", game.id))?;
        for participant in participants {
            let status = self
                .store
                .game(&game.id)?
                .map_or(GameStatus::Stopped, |current| current.status);
            if status != GameStatus::Running {
                info!(game = %game.id, %status, "game left running state mid-cycle");
                break;
            }
            let outcome = match self.poll_participant(&participant) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(game = %game.id, participant = %participant.id, err = %format!("{err:#}"), "participant cycle failed");
                    ParticipantOutcome::Failed(format!("{err:#}"))
                }
            };
            info!(game = %game.id, participant = %participant.id, ?outcome, "participant polled");
            report.participants.push(ParticipantReport {
                game_id: game.id.clone(),
                participant_id: participant.id.clone(),
                outcome,
            });
        }
        Ok(())
    }

    /// Sync, classify new commits, score, request feedback, then persist as one write.
    #[instrument(skip_all, fields(game = %participant.game_id, participant = %participant.id))]
    pub fn poll_participant(&self, participant: &ParticipantRecord) -> Result<ParticipantOutcome> {
        if participant.paused {
            return Ok(ParticipantOutcome::Skipped);
        }
        let repo = self.tracked_repository(participant);
        let synced = match synchronize(&repo, self.settings.git_limits) {
            Ok(synced) => synced,
            Err(err) => {
                let message = err.to_string();
                warn!(err = %message, "sync failed");
                self.store.set_participant_field(
                    &participant.game_id,
                    &participant.id,
                    ParticipantField::Feedback(message.clone()),
                )?;
                return Ok(ParticipantOutcome::SyncFailed(message));
            }
        };
        if synced.new_shas.is_empty() {
            return Ok(ParticipantOutcome::UpToDate);
        }

        let history = self.store.history(&participant.game_id, &participant.id)?;
        let known: HashSet<&str> = history.iter().map(|entry| entry.record.sha.as_str()).collect();
        let git = Git::new(&repo.workdir, self.settings.git_limits);
        let classifier = CommitClassifier::new(
            git.clone(),
            &self.settings.paths,
            &self.runner,
            &self.settings.branch,
        );

        let mut new_records: Vec<CommitRecord> = Vec::new();
        for sha in &synced.new_shas {
            if known.contains(sha.as_str()) {
                debug!(sha = %sha, "already recorded");
                continue;
            }
            let position = history.len() + new_records.len();
            new_records.push(classifier.record(sha, position)?);
        }
        git.checkout(&self.settings.branch).context("restore tracked branch")?;

        let records: Vec<CommitRecord> = history
            .iter()
            .map(|entry| entry.record.clone())
            .chain(new_records.iter().cloned())
            .collect();
        let score = score_history(&records).overall;

        let (new_entries, feedback) = if new_records.is_empty() {
            (Vec::new(), participant.feedback.clone())
        } else {
            let batch: Vec<FeedbackCommit> = new_records.iter().map(FeedbackCommit::from).collect();
            let attempts = self.settings.feedback_attempts;
            let report = match request_feedback(&self.feedback, &batch, attempts) {
                Ok(report) => report,
                Err(err) => {
                    let message = format!("Feedback unavailable: {err}");
                    warn!(err = %message, "feedback failed, batch left for next cycle");
                    self.store.set_participant_field(
                        &participant.game_id,
                        &participant.id,
                        ParticipantField::Feedback(message.clone()),
                    )?;
                    return Ok(ParticipantOutcome::FeedbackFailed(message));
                }
            };
            let entries = new_records
                .iter()
                .cloned()
                .zip(report.per_commit_feedback)
                .map(|(record, feedback)| HistoryEntry {
                    record,
                    feedback: feedback.feedback,
                })
                .collect::<Vec<_>>();
            let overall = if report.overall_feedback.trim().is_empty() {
                format!("Processed {} new commit(s); score {score:.2}", entries.len())
            } else {
                report.overall_feedback
            };
            (entries, overall)
        };

        let new_commits = new_entries.len();
        self.store.commit_cycle(
            &participant.game_id,
            &participant.id,
            &CycleUpdate {
                synced_from: participant.last_synced.clone(),
                history_len: history.len(),
                new_entries,
                last_synced: synced.head,
                score,
                feedback,
            },
        )?;
        Ok(ParticipantOutcome::Processed { new_commits, score })
    }

    fn tracked_repository(&self, participant: &ParticipantRecord) -> TrackedRepository {
        let remote = (!participant.is_local)
            .then(|| clone_url(&self.settings.clone_url_template, &participant.locator));
        TrackedRepository {
            workdir: participant.workdir.clone(),
            remote,
            last_synced: participant.last_synced.clone(),
            branch: self.settings.branch.clone(),
        }
    }
}

/// Run cycles every `interval` until `shutdown` fires or its sender is dropped.
///
/// A failing cycle is logged and the loop keeps going.
pub fn run_polling<S: GameStore, T: TestRunner, F: FeedbackGenerator>(
    tracker: &Tracker<S, T, F>,
    interval: Duration,
    shutdown: &Receiver<()>,
) -> u64 {
    let mut cycles = 0u64;
    loop {
        match tracker.run_cycle() {
            Ok(report) => {
                cycles += 1;
                debug!(
                    cycle = cycles,
                    games = report.games_polled,
                    participants = report.participants.len(),
                    "cycle finished"
                );
            }
            Err(err) => error!(err = %format!("{err:#}"), "polling cycle failed"),
        }
        match shutdown.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                info!(cycles, "polling stopped");
                return cycles;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}
