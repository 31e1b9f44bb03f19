//! Repository synchronization: bring a working copy up to date and list unseen commits.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::io::git::Git;
use crate::io::process::CommandLimits;

/// One participant's codebase as seen by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRepository {
    pub workdir: PathBuf,
    /// Clone URL; `None` marks a local-only fixture that is never cloned or pulled.
    pub remote: Option<String>,
    /// Newest sha of the last successful sync; empty when never synced.
    pub last_synced: String,
    pub branch: String,
}

impl TrackedRepository {
    pub fn is_local(&self) -> bool {
        self.remote.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub head: String,
    /// Number of commits reachable from `head`.
    pub commit_count: usize,
    /// Commits not yet processed, oldest first.
    pub new_shas: Vec<String>,
}

/// Failure of one synchronization step. The text is shown to the participant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Error cloning: {0}")]
    Clone(String),
    #[error("Working copy missing at {0}")]
    MissingWorkingCopy(String),
    #[error("Error checking out branch: {0}")]
    Checkout(String),
    #[error("Error pulling latest changes: {0}")]
    Pull(String),
    #[error("Error getting HEAD commit: {0}")]
    ResolveHead(String),
    #[error("Error listing commits: {0}")]
    List(String),
    #[error("Last synced commit {sha} is no longer an ancestor of HEAD")]
    Diverged { sha: String },
}

/// Ensure the working copy exists and is current, then report what is new since `last_synced`.
///
/// Nothing is persisted here; the caller advances `last_synced` to `head` only
/// after the new commits have been processed.
#[instrument(skip_all, fields(workdir = %repo.workdir.display(), branch = %repo.branch))]
pub fn synchronize(
    repo: &TrackedRepository,
    limits: CommandLimits,
) -> Result<SyncOutcome, SyncError> {
    let mut git = Git::new(&repo.workdir, limits);
    if !git.is_repository() {
        match &repo.remote {
            Some(url) => {
                info!(url = %url, "cloning working copy");
                git = Git::clone_into(url, &repo.workdir, limits)
                    .map_err(|err| SyncError::Clone(format!("{err:#}")))?;
            }
            None => {
                return Err(SyncError::MissingWorkingCopy(
                    repo.workdir.display().to_string(),
                ));
            }
        }
    }

    git.checkout(&repo.branch)
        .map_err(|err| SyncError::Checkout(format!("{err:#}")))?;
    if !repo.is_local() {
        git.pull().map_err(|err| SyncError::Pull(format!("{err:#}")))?;
    }

    let head = git
        .head_sha()
        .map_err(|err| SyncError::ResolveHead(format!("{err:#}")))?;
    let commit_count = git
        .commit_count(&head)
        .map_err(|err| SyncError::List(format!("{err:#}")))?;

    let new_shas = if repo.last_synced.is_empty() {
        git.history(&head)
            .map_err(|err| SyncError::List(format!("{err:#}")))?
    } else {
        let last = &repo.last_synced;
        let reachable = git.resolve_commit(last).is_ok()
            && git
                .is_ancestor(last, &head)
                .map_err(|err| SyncError::List(format!("{err:#}")))?;
        if !reachable {
            return Err(SyncError::Diverged { sha: last.clone() });
        }
        git.history_between(last, &head)
            .map_err(|err| SyncError::List(format!("{err:#}")))?
    };

    debug!(head = %head, commit_count, new = new_shas.len(), "synchronized");
    Ok(SyncOutcome {
        head,
        commit_count,
        new_shas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    fn local(repo: &TestRepo, last_synced: &str) -> TrackedRepository {
        TrackedRepository {
            workdir: repo.root().to_path_buf(),
            remote: None,
            last_synced: last_synced.to_string(),
            branch: "main".to_string(),
        }
    }

    #[test]
    fn first_sync_lists_full_history_oldest_first() {
        let repo = TestRepo::new().expect("repo");
        let first = repo.commit_file("a.txt", "1", "first").expect("commit");
        let second = repo.commit_file("a.txt", "2", "second").expect("commit");

        let outcome = synchronize(&local(&repo, ""), CommandLimits::default()).expect("sync");
        assert_eq!(outcome.head, second);
        assert_eq!(outcome.commit_count, 2);
        assert_eq!(outcome.new_shas, vec![first, second]);
    }

    #[test]
    fn later_sync_lists_only_commits_after_last_synced() {
        let repo = TestRepo::new().expect("repo");
        let first = repo.commit_file("a.txt", "1", "first").expect("commit");
        let second = repo.commit_file("a.txt", "2", "second").expect("commit");
        let third = repo.commit_file("a.txt", "3", "third").expect("commit");

        let outcome = synchronize(&local(&repo, &first), CommandLimits::default()).expect("sync");
        assert_eq!(outcome.new_shas, vec![second, third.clone()]);

        let outcome = synchronize(&local(&repo, &third), CommandLimits::default()).expect("sync");
        assert!(outcome.new_shas.is_empty());
        assert_eq!(outcome.head, third);
    }

    #[test]
    fn history_beyond_output_limit_fails_instead_of_dropping_commits() {
        let repo = TestRepo::new().expect("repo");
        for n in 0..5 {
            repo.commit_file("a.txt", &n.to_string(), "step").expect("commit");
        }
        let limits = CommandLimits {
            output_limit_bytes: 100,
            ..CommandLimits::default()
        };

        let err = synchronize(&local(&repo, ""), limits).unwrap_err();
        assert!(matches!(err, SyncError::List(_)));
        assert!(err.to_string().contains("output exceeded 100 bytes"));
    }

    #[test]
    fn rewritten_history_is_reported_instead_of_guessing() {
        let repo = TestRepo::new().expect("repo");
        repo.commit_file("a.txt", "1", "first").expect("commit");
        let dropped = repo.commit_file("a.txt", "2", "second").expect("commit");
        repo.run_git(&["reset", "--hard", "HEAD~1"]).expect("git");
        repo.commit_file("a.txt", "2b", "second again").expect("commit");

        let err = synchronize(&local(&repo, &dropped), CommandLimits::default()).unwrap_err();
        assert_eq!(err, SyncError::Diverged { sha: dropped });
    }

    #[test]
    fn unknown_last_synced_is_reported_as_diverged() {
        let repo = TestRepo::new().expect("repo");
        repo.commit_file("a.txt", "1", "first").expect("commit");
        let bogus = "0123456789abcdef0123456789abcdef01234567";

        let err = synchronize(&local(&repo, bogus), CommandLimits::default()).unwrap_err();
        assert!(matches!(err, SyncError::Diverged { .. }));
    }

    #[test]
    fn missing_local_working_copy_fails_without_cloning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let repo = TrackedRepository {
            workdir: temp.path().join("absent"),
            remote: None,
            last_synced: String::new(),
            branch: "main".to_string(),
        };
        let err = synchronize(&repo, CommandLimits::default()).unwrap_err();
        assert!(matches!(err, SyncError::MissingWorkingCopy(_)));
    }

    #[test]
    fn remote_repository_is_cloned_then_pulled() {
        let upstream = TestRepo::new().expect("repo");
        let first = upstream.commit_file("a.txt", "1", "first").expect("commit");
        let temp = tempfile::tempdir().expect("tempdir");
        let tracked = TrackedRepository {
            workdir: temp.path().join("clone"),
            remote: Some(upstream.root().display().to_string()),
            last_synced: String::new(),
            branch: "main".to_string(),
        };

        let outcome = synchronize(&tracked, CommandLimits::default()).expect("clone sync");
        assert_eq!(outcome.new_shas, vec![first.clone()]);

        let second = upstream.commit_file("a.txt", "2", "second").expect("commit");
        let tracked = TrackedRepository {
            last_synced: first,
            ..tracked
        };
        let outcome = synchronize(&tracked, CommandLimits::default()).expect("pull sync");
        assert_eq!(outcome.new_shas, vec![second.clone()]);
        assert_eq!(outcome.head, second);
    }

    #[test]
    fn unreachable_remote_reports_clone_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracked = TrackedRepository {
            workdir: temp.path().join("clone"),
            remote: Some(temp.path().join("nowhere").display().to_string()),
            last_synced: String::new(),
            branch: "main".to_string(),
        };
        let err = synchronize(&tracked, CommandLimits::default()).unwrap_err();
        assert!(matches!(err, SyncError::Clone(_)));
        assert!(err.to_string().starts_with("Error cloning:"));
    }
}
