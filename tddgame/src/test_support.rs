//! Test-only helpers: throwaway git repositories, a shell-based fake test
//! runner, and a scripted feedback generator.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::feedback::{CommitFeedback, FeedbackGenerator, FeedbackReport, FeedbackRequest};
use crate::io::git::Git;
use crate::io::process::CommandLimits;
use crate::io::test_runner::CommandTestRunner;

/// Passes when every `# needs: NAME ...` line in a `test_*.py` file names a
/// function defined in `fizzbuzz.py`.
pub const FAKE_TEST_SCRIPT: &str = r#"for t in test_*.py; do
  [ -f "$t" ] || continue
  for need in $(sed -n 's/^# needs: //p' "$t"); do
    grep -q "def $need" fizzbuzz.py 2>/dev/null || exit 1
  done
done
exit 0"#;

/// Counts `def test_` lines the way pytest's collect summary reports them.
pub const FAKE_COLLECT_SCRIPT: &str = r#"n=$(cat test_*.py 2>/dev/null | grep -c '^def test_')
if [ "$n" -gt 0 ]; then echo "$n tests collected in 0.01s"; else echo "no tests collected in 0.01s"; fi"#;

pub const KATA_TEST: &str = "def test_fizz():\n    assert fizzbuzz(3) == 'Fizz'\n# needs: fizzbuzz\n";
pub const KATA_IMPL: &str = "def fizzbuzz(n):\n    return 'Fizz'\n";
pub const KATA_IMPL_REFACTORED: &str =
    "def fizzbuzz(n):\n    \"\"\"Return the word.\"\"\"\n    word = 'Fizz'\n    return word\n";

/// Fake runner driven by [`FAKE_TEST_SCRIPT`] and [`FAKE_COLLECT_SCRIPT`].
pub fn fake_test_runner() -> CommandTestRunner {
    CommandTestRunner {
        run_command: vec!["sh".to_string(), "-c".to_string(), FAKE_TEST_SCRIPT.to_string()],
        collect_command: vec!["sh".to_string(), "-c".to_string(), FAKE_COLLECT_SCRIPT.to_string()],
        limits: CommandLimits {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        },
    }
}

/// Temporary git repository on branch `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create temp repo dir")?;
        let repo = Self { dir };
        repo.run_git(&["init", "--quiet", "--initial-branch=main"])?;
        repo.run_git(&["config", "user.name", "Kata Player"])?;
        repo.run_git(&["config", "user.email", "player@example.com"])?;
        repo.run_git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.root(), CommandLimits::default())
    }

    /// Run git in the repository and return trimmed stdout.
    pub fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.root())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Stage everything and commit; returns the new sha.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        self.run_git(&["add", "-A"])?;
        self.run_git(&["commit", "--quiet", "-m", message])?;
        self.head()
    }

    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<String> {
        self.write(rel, contents)?;
        self.commit_all(message)
    }

    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.run_git(&["checkout", "--quiet", "-b", name])?;
        Ok(())
    }

    pub fn checkout(&self, rev: &str) -> Result<()> {
        self.run_git(&["checkout", "--quiet", rev])?;
        Ok(())
    }

    /// Merge `branch` into the current branch with a merge commit.
    pub fn merge(&self, branch: &str, message: &str) -> Result<String> {
        self.run_git(&["merge", "--quiet", "--no-ff", "-m", message, branch])?;
        self.head()
    }

    pub fn head(&self) -> Result<String> {
        self.run_git(&["rev-parse", "HEAD"])
    }
}

/// Commit a red, green, refactor sequence on `main`; returns the shas in order.
pub fn seed_kata(repo: &TestRepo) -> Result<Vec<String>> {
    Ok(vec![
        repo.commit_file("test_fizzbuzz.py", KATA_TEST, "Add failing fizz test")?,
        repo.commit_file("fizzbuzz.py", KATA_IMPL, "Implement fizz")?,
        repo.commit_file("fizzbuzz.py", KATA_IMPL_REFACTORED, "Refactor fizz into a local")?,
    ])
}

/// Feedback generator replaying queued replies (`Err` simulates a transport failure).
///
/// Built with [`ScriptedFeedback::valid`], it answers every request with a
/// well-formed reply once the queue is empty.
pub struct ScriptedFeedback {
    replies: RefCell<VecDeque<Result<String, String>>>,
    answer_valid_when_empty: bool,
    corrections: RefCell<Vec<Vec<String>>>,
}

impl ScriptedFeedback {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            answer_valid_when_empty: false,
            corrections: RefCell::new(Vec::new()),
        }
    }

    pub fn valid() -> Self {
        Self {
            answer_valid_when_empty: true,
            ..Self::new(Vec::new())
        }
    }

    /// Corrections passed with each request, in call order.
    pub fn corrections_seen(&self) -> Vec<Vec<String>> {
        self.corrections.borrow().clone()
    }
}

impl FeedbackGenerator for ScriptedFeedback {
    fn generate(&self, request: &FeedbackRequest<'_>) -> Result<String> {
        self.corrections
            .borrow_mut()
            .push(request.corrections.to_vec());
        match self.replies.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None if self.answer_valid_when_empty => {
                let report = FeedbackReport {
                    per_commit_feedback: request
                        .commits
                        .iter()
                        .map(|commit| CommitFeedback {
                            commit: commit.sha.clone(),
                            feedback: format!("feedback for {}", commit.sha),
                        })
                        .collect(),
                    overall_feedback: "scripted overall feedback".to_string(),
                };
                Ok(serde_json::to_string(&report)?)
            }
            None => Err(anyhow!("no scripted feedback reply left")),
        }
    }
}
