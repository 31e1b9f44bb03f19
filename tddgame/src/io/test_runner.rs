//! Test runner adapter (`pytest` by default).

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::types::TestOutcome;
use crate::io::process::{
    CommandLimits, command_from_argv, is_program_missing, run_command_with_timeout,
};

/// Exit status `sh` uses when the requested program does not exist.
const SHELL_COMMAND_NOT_FOUND: i32 = 127;

static NO_TESTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"no tests collected").expect("no-tests regex must compile"));
static TESTS_COLLECTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+tests?\s+collected").expect("collected regex must compile")
});

pub trait TestRunner {
    /// Run the suite in `workdir`.
    fn run(&self, workdir: &Path) -> Result<TestOutcome>;
    /// Number of tests the runner can collect in `workdir` (0 when unavailable).
    fn collect(&self, workdir: &Path) -> Result<usize>;
}

#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    pub run_command: Vec<String>,
    pub collect_command: Vec<String>,
    pub limits: CommandLimits,
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn run(&self, workdir: &Path) -> Result<TestOutcome> {
        let cmd = command_from_argv(&self.run_command, workdir)?;
        let output = match run_command_with_timeout(cmd, None, self.limits) {
            Ok(output) => output,
            Err(err) if is_program_missing(&err) => {
                warn!(command = ?self.run_command, "test runner not installed");
                return Ok(TestOutcome::Unavailable);
            }
            Err(err) => return Err(err),
        };
        if output.exit_code == Some(SHELL_COMMAND_NOT_FOUND) {
            warn!(command = ?self.run_command, "test runner not found by shell");
            return Ok(TestOutcome::Unavailable);
        }
        let outcome = if output.success() {
            TestOutcome::Passed
        } else {
            TestOutcome::Failed
        };
        debug!(?outcome, exit_code = ?output.exit_code, timed_out = output.timed_out, "tests finished");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(workdir = %workdir.display()))]
    fn collect(&self, workdir: &Path) -> Result<usize> {
        let cmd = command_from_argv(&self.collect_command, workdir)?;
        let output = match run_command_with_timeout(cmd, None, self.limits) {
            Ok(output) => output,
            Err(err) if is_program_missing(&err) => {
                warn!(command = ?self.collect_command, "test collector not installed");
                return Ok(0);
            }
            Err(err) => return Err(err),
        };
        let text = format!("{}\n{}", output.stdout_text(), output.stderr_text());
        match parse_collected_count(&text) {
            Some(count) => Ok(count),
            None => {
                warn!(exit_code = ?output.exit_code, "unrecognized collect output, assuming no tests");
                Ok(0)
            }
        }
    }
}

/// Extract the collected-test count from runner output.
pub fn parse_collected_count(output: &str) -> Option<usize> {
    if NO_TESTS_RE.is_match(output) {
        return Some(0);
    }
    TESTS_COLLECTED_RE
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn runner(run: &[&str], collect: &[&str]) -> CommandTestRunner {
        CommandTestRunner {
            run_command: run.iter().map(|s| s.to_string()).collect(),
            collect_command: collect.iter().map(|s| s.to_string()).collect(),
            limits: CommandLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 10_000,
            },
        }
    }

    #[test]
    fn parses_pytest_collect_summaries() {
        assert_eq!(
            parse_collected_count("test_a.py::test_x\n\n1 test collected in 0.01s"),
            Some(1)
        );
        assert_eq!(parse_collected_count("12 tests collected in 0.20s"), Some(12));
        assert_eq!(parse_collected_count("no tests collected in 0.01s"), Some(0));
        assert_eq!(parse_collected_count("ERROR: file not found"), None);
    }

    #[test]
    fn exit_status_maps_to_outcome() {
        let temp = tempfile::tempdir().expect("tempdir");
        let pass = runner(&["sh", "-c", "exit 0"], &["true"]);
        let fail = runner(&["sh", "-c", "exit 1"], &["true"]);
        assert_eq!(pass.run(temp.path()).expect("run"), TestOutcome::Passed);
        assert_eq!(fail.run(temp.path()).expect("run"), TestOutcome::Failed);
    }

    #[test]
    fn missing_runner_is_unavailable_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let direct = runner(&["tddgame-missing-pytest"], &["tddgame-missing-pytest"]);
        assert_eq!(direct.run(temp.path()).expect("run"), TestOutcome::Unavailable);
        assert_eq!(direct.collect(temp.path()).expect("collect"), 0);

        let via_shell = runner(&["sh", "-c", "tddgame-missing-pytest"], &["true"]);
        assert_eq!(via_shell.run(temp.path()).expect("run"), TestOutcome::Unavailable);
    }

    #[test]
    fn collect_reads_count_from_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let r = runner(&["true"], &["sh", "-c", "echo '3 tests collected in 0.02s'"]);
        assert_eq!(r.collect(temp.path()).expect("collect"), 3);
    }
}
