//! Git adapter for the tracker.
//!
//! Every call goes through `run_command_with_timeout`, so a hung remote or a huge
//! repository fails the current step instead of stalling the polling loop.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{CommandLimits, CommandOutput, run_command_with_timeout};

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    limits: CommandLimits,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, limits: CommandLimits) -> Self {
        Self {
            workdir: workdir.into(),
            limits,
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `url` into `dest`. The destination may exist but must be empty.
    #[instrument(skip_all, fields(url = %url, dest = %dest.display()))]
    pub fn clone_into(url: &str, dest: &Path, limits: CommandLimits) -> Result<Git> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination has no parent: {}", dest.display()))?;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg(url).arg(dest).current_dir(parent);
        let output = run_command_with_timeout(cmd, None, limits).context("spawn git clone")?;
        if !output.success() {
            return Err(anyhow!("git clone failed: {}", output.diagnostic()));
        }
        debug!("clone finished");
        Ok(Git::new(dest, limits))
    }

    /// True when the working directory already holds a git checkout.
    pub fn is_repository(&self) -> bool {
        self.workdir.join(".git").exists()
    }

    #[instrument(skip_all, fields(rev = %rev))]
    pub fn checkout(&self, rev: &str) -> Result<()> {
        debug!(rev, "checking out");
        self.run_checked(&["checkout", "--quiet", rev])?;
        Ok(())
    }

    /// Fast-forward the current branch from its upstream.
    #[instrument(skip_all)]
    pub fn pull(&self) -> Result<()> {
        self.run_checked(&["pull", "--ff-only", "--quiet"])?;
        Ok(())
    }

    /// Resolve a revision to a full commit sha.
    pub fn resolve_commit(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run_capture(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(out.trim().to_string())
    }

    pub fn head_sha(&self) -> Result<String> {
        self.resolve_commit("HEAD")
    }

    /// Number of commits reachable from `rev` (inclusive).
    pub fn commit_count(&self, rev: &str) -> Result<usize> {
        let out = self.run_capture(&["rev-list", "--count", rev])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse commit count '{}'", out.trim()))
    }

    /// All commits reachable from `rev`, oldest first.
    pub fn history(&self, rev: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["rev-list", "--topo-order", "--reverse", rev])?;
        Ok(parse_sha_lines(&out))
    }

    /// Commits reachable from `to` but not from `from`, oldest first.
    pub fn history_between(&self, from: &str, to: &str) -> Result<Vec<String>> {
        let range = format!("{from}..{to}");
        let out = self.run_capture(&["rev-list", "--topo-order", "--reverse", &range])?;
        Ok(parse_sha_lines(&out))
    }

    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let args = ["merge-base", "--is-ancestor", ancestor, descendant];
        let output = self.run(&args)?;
        match output.exit_code {
            Some(0) => Ok(true),
            Some(1) if !output.timed_out => Ok(false),
            _ => Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.diagnostic()
            )),
        }
    }

    /// Full commit message, trimmed.
    pub fn commit_message(&self, sha: &str) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--pretty=format:%B", sha])?;
        Ok(out.trim().to_string())
    }

    /// Parent shas in order (first parent is the mainline).
    pub fn parents(&self, sha: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["rev-list", "--parents", "-n", "1", sha])?;
        let mut fields = out.split_whitespace();
        let head = fields
            .next()
            .ok_or_else(|| anyhow!("empty rev-list output for {sha}"))?;
        debug!(sha = head, "resolved parents");
        Ok(fields.map(str::to_string).collect())
    }

    /// Paths changed by `sha` relative to `parent`, or relative to the empty tree for a root.
    pub fn changed_paths(&self, sha: &str, parent: Option<&str>) -> Result<Vec<String>> {
        let mut args = vec!["diff-tree", "--no-commit-id", "--name-only", "-r", "--no-renames"];
        match parent {
            Some(parent) => {
                args.push(parent);
                args.push(sha);
            }
            None => {
                args.push("--root");
                args.push(sha);
            }
        }
        let out = self.run_capture(&args)?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Contents of `path` at `sha`, or `None` if the file does not exist there.
    pub fn file_at(&self, sha: &str, path: &str) -> Result<Option<String>> {
        let object = format!("{sha}:{path}");
        let exists = self.run(&["cat-file", "-e", &object])?;
        if !exists.success() {
            return Ok(None);
        }
        let out = self.run_capture(&["show", &object])?;
        Ok(Some(out))
    }

    /// Branch names (local and remote-tracking, remote prefix stripped) containing `sha`.
    pub fn branches_containing(&self, sha: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["branch", "-a", "--contains", sha, "--format=%(refname)"])?;
        let mut names: Vec<String> = Vec::new();
        for name in out.lines().filter_map(short_branch_name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Stdout of a successful command; output cut at the byte limit is an error.
    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "git {} output exceeded {} bytes",
                args.join(" "),
                self.limits.output_limit_bytes
            ));
        }
        Ok(output.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.diagnostic()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        run_command_with_timeout(cmd, None, self.limits)
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_sha_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `refs/heads/x` → `x`, `refs/remotes/origin/x` → `x`; symbolic `HEAD` refs and
/// detached-HEAD placeholders are dropped.
fn short_branch_name(line: &str) -> Option<String> {
    let line = line.trim();
    let name = if let Some(local) = line.strip_prefix("refs/heads/") {
        local
    } else if let Some(remote) = line.strip_prefix("refs/remotes/") {
        remote.split_once('/').map(|(_, name)| name)?
    } else {
        return None;
    };
    if name.is_empty() || name == "HEAD" {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn oversized_file_is_an_error_not_a_prefix() {
        let repo = TestRepo::new().expect("repo");
        let body = "x = 1\n".repeat(40);
        let sha = repo.commit_file("fizzbuzz.py", &body, "big file").expect("commit");
        let limits = CommandLimits {
            output_limit_bytes: 100,
            ..CommandLimits::default()
        };

        let err = Git::new(repo.root(), limits).file_at(&sha, "fizzbuzz.py").unwrap_err();
        assert!(err.to_string().contains("output exceeded 100 bytes"));
        let full = repo.git().file_at(&sha, "fizzbuzz.py").expect("file");
        assert_eq!(full, Some(body));
    }

    #[test]
    fn short_name_strips_local_prefix() {
        assert_eq!(
            short_branch_name("refs/heads/feature/sum"),
            Some("feature/sum".to_string())
        );
    }

    #[test]
    fn short_name_strips_remote_prefix() {
        assert_eq!(
            short_branch_name("refs/remotes/origin/feature/sum"),
            Some("feature/sum".to_string())
        );
    }

    #[test]
    fn short_name_drops_symbolic_and_detached_entries() {
        assert_eq!(short_branch_name("refs/remotes/origin/HEAD"), None);
        assert_eq!(short_branch_name("(HEAD detached at 1a2b3c)"), None);
        assert_eq!(short_branch_name(""), None);
    }

    #[test]
    fn sha_lines_skip_blanks() {
        assert_eq!(parse_sha_lines("a\n\n b \n"), vec!["a".to_string(), "b".to_string()]);
    }
}
