//! Per-commit classification against a working copy.
//!
//! The classifier drives the working copy through `git checkout`, so one
//! instance must have exclusive use of its working copy while it runs.

use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use crate::core::classifier::{
    PathRules, PhaseEvidence, decide_phase, refactor_check_applies, summarize_changes,
};
use crate::core::structure::structures_differ;
use crate::core::types::{Classification, CommitRecord};
use crate::io::git::Git;
use crate::io::test_runner::TestRunner;

const EMPTY_MESSAGE: &str = "(no commit message)";

/// Message and parent list of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDetails {
    pub message: String,
    pub parents: Vec<String>,
}

impl CommitDetails {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

pub struct CommitClassifier<'a, R: TestRunner> {
    git: Git,
    rules: &'a PathRules,
    runner: &'a R,
    main_branch: &'a str,
}

impl<'a, R: TestRunner> CommitClassifier<'a, R> {
    pub fn new(git: Git, rules: &'a PathRules, runner: &'a R, main_branch: &'a str) -> Self {
        Self {
            git,
            rules,
            runner,
            main_branch,
        }
    }

    /// Classify `sha`. The working copy is left checked out at `sha`.
    #[instrument(skip_all, fields(sha = %sha))]
    pub fn classify(&self, sha: &str) -> Result<Classification> {
        self.git.checkout(sha)?;
        let parents = self.git.parents(sha)?;
        let parent = parents.first().map(String::as_str);
        let changed = self.git.changed_paths(sha, parent)?;
        let changes = summarize_changes(self.rules, &changed);

        let tests_passed = self.runner.run(self.git.workdir())?.passed();
        let red_candidate = changes.tests_changed && !changes.production_changed && !tests_passed;
        let collected_tests = if red_candidate {
            self.runner.collect(self.git.workdir())?
        } else {
            0
        };

        let is_refactoring = match parent {
            Some(parent) if refactor_check_applies(&changes, tests_passed, true) => {
                let verdict = self.refactor_check(sha, parent, &changes.production_paths);
                self.git
                    .checkout(sha)
                    .context("restore checkout after refactor check")?;
                verdict?
            }
            _ => false,
        };

        let phase = decide_phase(&PhaseEvidence {
            tests_changed: changes.tests_changed,
            production_changed: changes.production_changed,
            tests_passed,
            collected_tests,
            is_refactoring,
        });
        debug!(%phase, tests_passed, is_refactoring, collected_tests, "classified");
        Ok(Classification {
            phase,
            tests_passed,
            is_refactoring,
        })
    }

    /// A refactor changes production structure and starts from a passing parent.
    ///
    /// May leave the working copy on `parent`; the caller restores it.
    fn refactor_check(&self, sha: &str, parent: &str, production_paths: &[String]) -> Result<bool> {
        let mut structure_changed = false;
        for path in production_paths {
            let before = self.git.file_at(parent, path)?.unwrap_or_default();
            let after = self.git.file_at(sha, path)?.unwrap_or_default();
            match structures_differ(&before, &after) {
                Ok(true) => {
                    structure_changed = true;
                    break;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %path, err = %err, "cannot compare structure, treating as unchanged");
                }
            }
        }
        if !structure_changed {
            return Ok(false);
        }

        self.git.checkout(parent)?;
        let parent_passed = self.runner.run(self.git.workdir())?.passed();
        debug!(parent, parent_passed, "parent test run");
        Ok(parent_passed)
    }

    pub fn details(&self, sha: &str) -> Result<CommitDetails> {
        let message = self.git.commit_message(sha)?;
        let message = if message.is_empty() {
            EMPTY_MESSAGE.to_string()
        } else {
            message
        };
        let parents = self.git.parents(sha)?;
        Ok(CommitDetails { message, parents })
    }

    /// Non-mainline branches containing any secondary parent of a merge.
    pub fn branch_provenance(&self, details: &CommitDetails) -> Result<Vec<String>> {
        let mut branches: Vec<String> = Vec::new();
        if !details.is_merge() {
            return Ok(branches);
        }
        for parent in &details.parents[1..] {
            for name in self.git.branches_containing(parent)? {
                if name != self.main_branch && !branches.contains(&name) {
                    branches.push(name);
                }
            }
        }
        Ok(branches)
    }

    /// Classify and annotate `sha` into a history record at `position`.
    pub fn record(&self, sha: &str, position: usize) -> Result<CommitRecord> {
        let classification = self.classify(sha)?;
        let details = self.details(sha)?;
        let branches = self.branch_provenance(&details)?;
        let record = CommitRecord::new(
            sha,
            position,
            details.message,
            details.parents,
            branches,
            classification,
        )
        .with_context(|| format!("build record for {sha}"))?;
        Ok(record)
    }
}
