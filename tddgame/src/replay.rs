//! Offline analysis of a single working copy, outside any game.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::scoring::{ScoreReport, score_history};
use crate::core::types::CommitRecord;
use crate::io::commit_classifier::CommitClassifier;
use crate::io::git::Git;
use crate::io::sync::{TrackedRepository, synchronize};
use crate::io::test_runner::TestRunner;
use crate::poll::TrackerSettings;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub head: String,
    pub commit_count: usize,
    pub history: Vec<CommitRecord>,
    pub report: ScoreReport,
}

/// Classify every commit on the tracked branch of `workdir` and score the result.
///
/// The working copy is left on the tracked branch afterwards.
#[instrument(skip_all, fields(workdir = %workdir.display()))]
pub fn analyze_repository<T: TestRunner>(
    workdir: &Path,
    runner: &T,
    settings: &TrackerSettings,
) -> Result<Analysis> {
    let repo = TrackedRepository {
        workdir: workdir.to_path_buf(),
        remote: None,
        last_synced: String::new(),
        branch: settings.branch.clone(),
    };
    let synced = synchronize(&repo, settings.git_limits)
        .with_context(|| format!("synchronize {}", workdir.display()))?;

    let git = Git::new(workdir, settings.git_limits);
    let classifier =
        CommitClassifier::new(git.clone(), &settings.paths, runner, &settings.branch);
    let mut history = Vec::with_capacity(synced.new_shas.len());
    for (position, sha) in synced.new_shas.iter().enumerate() {
        history.push(classifier.record(sha, position)?);
    }
    git.checkout(&settings.branch).context("restore tracked branch")?;

    let report = score_history(&history);
    info!(commits = history.len(), overall = report.overall, "analysis finished");
    Ok(Analysis {
        head: synced.head,
        commit_count: synced.commit_count,
        history,
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::PathRules;
    use crate::core::scoring::Transition;
    use crate::core::types::TddPhase;
    use crate::io::process::CommandLimits;
    use crate::test_support::{TestRepo, fake_test_runner, seed_kata};

    fn settings() -> TrackerSettings {
        TrackerSettings {
            branch: "main".to_string(),
            clone_url_template: "https://github.com/{repo}.git".to_string(),
            paths: PathRules::default(),
            git_limits: CommandLimits::default(),
            feedback_attempts: 1,
        }
    }

    #[test]
    fn analysis_scores_whole_branch() {
        let repo = TestRepo::new().expect("repo");
        let shas = seed_kata(&repo).expect("kata");

        let analysis =
            analyze_repository(repo.root(), &fake_test_runner(), &settings()).expect("analyze");
        assert_eq!(analysis.head, shas[2]);
        assert_eq!(analysis.commit_count, 3);
        let phases: Vec<TddPhase> = analysis.history.iter().map(|r| r.classification).collect();
        assert_eq!(phases, vec![TddPhase::Red, TddPhase::Green, TddPhase::Refactor]);
        assert!((analysis.report.overall - 7.55).abs() < 1e-9);
        assert_eq!(analysis.report.per_commit[0].transition, Transition::First);
        assert_eq!(
            analysis.report.per_commit[2].transition,
            Transition::Step {
                from: TddPhase::Green,
                to: TddPhase::Refactor
            }
        );
        assert_eq!(repo.run_git(&["rev-parse", "--abbrev-ref", "HEAD"]).expect("branch"), "main");
    }

    #[test]
    fn merged_feature_branch_earns_merge_bonus() {
        let repo = TestRepo::new().expect("repo");
        seed_kata(&repo).expect("kata");
        repo.create_branch("feature/buzz").expect("branch");
        repo.commit_file("NOTES.md", "buzz next\n", "Add notes for buzz").expect("commit");
        repo.checkout("main").expect("checkout");
        repo.commit_file("README.md", "kata\n", "Add readme file").expect("commit");
        repo.merge("feature/buzz", "Merge buzz notes").expect("merge");

        let analysis =
            analyze_repository(repo.root(), &fake_test_runner(), &settings()).expect("analyze");
        let merge = analysis.history.last().expect("merge record");
        assert!(merge.is_merge());
        assert_eq!(merge.branches, vec!["feature/buzz".to_string()]);
        assert_eq!(merge.classification, TddPhase::Unknown);
        assert_eq!(analysis.report.per_commit.last().expect("breakdown").merge_adjustment, -0.5);
    }
}
