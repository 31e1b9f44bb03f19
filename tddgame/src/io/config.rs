//! Tracker configuration stored in `tddgame.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::PathRules;
use crate::io::feedback::{
    CommandFeedbackGenerator, ConfiguredFeedback, DEFAULT_SYSTEM_PROMPT, DisabledFeedback,
};
use crate::io::process::CommandLimits;
use crate::io::test_runner::CommandTestRunner;

pub const DEFAULT_CONFIG_FILE: &str = "tddgame.toml";

/// Tracker configuration (TOML).
///
/// Missing fields default to values suited to a fizzbuzz kata run with pytest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds to wait between polling cycles.
    pub poll_interval_secs: u64,

    /// Directory holding game and participant records.
    pub state_dir: PathBuf,

    /// Directory remote participants are cloned into.
    pub clone_root: PathBuf,

    /// Branch analysed in every repository.
    pub branch: String,

    /// Clone URL for a registered `owner/repo`; `{repo}` is replaced.
    pub clone_url_template: String,

    /// Timeout for each git invocation.
    pub git_timeout_secs: u64,

    /// Bytes of stdout/stderr kept from any external command.
    pub output_limit_bytes: usize,

    pub paths: PathRules,
    pub tests: TestsConfig,
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestsConfig {
    /// Runs the suite; exit status 0 means passing.
    pub run_command: Vec<String>,
    /// Prints `N tests collected` / `no tests collected`.
    pub collect_command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            run_command: vec![
                "pytest".to_string(),
                "--maxfail=1".to_string(),
                "--disable-warnings".to_string(),
                "-q".to_string(),
            ],
            collect_command: vec![
                "pytest".to_string(),
                "--collect-only".to_string(),
                "-q".to_string(),
            ],
            timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Command receiving the rendered prompt on stdin. Empty disables feedback.
    pub command: Vec<String>,
    /// System prompt file; the built-in coaching prompt when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            prompt_path: None,
            max_attempts: 3,
            timeout_secs: 2 * 60,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            state_dir: PathBuf::from(".tddgame"),
            clone_root: PathBuf::from("cloned_repos"),
            branch: "main".to_string(),
            clone_url_template: "https://github.com/{repo}.git".to_string(),
            git_timeout_secs: 2 * 60,
            output_limit_bytes: 100_000,
            paths: PathRules::default(),
            tests: TestsConfig::default(),
            feedback: FeedbackConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.git_timeout_secs == 0 {
            return Err(anyhow!("git_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.branch.trim().is_empty() {
            return Err(anyhow!("branch must not be empty"));
        }
        if !self.clone_url_template.contains("{repo}") {
            return Err(anyhow!("clone_url_template must contain {{repo}}"));
        }
        if self.paths.production_files.is_empty() {
            return Err(anyhow!("paths.production_files must not be empty"));
        }
        if !is_command(&self.tests.run_command) {
            return Err(anyhow!("tests.run_command must be a non-empty array"));
        }
        if !is_command(&self.tests.collect_command) {
            return Err(anyhow!("tests.collect_command must be a non-empty array"));
        }
        if self.tests.timeout_secs == 0 {
            return Err(anyhow!("tests.timeout_secs must be > 0"));
        }
        if !self.feedback.command.is_empty() && !is_command(&self.feedback.command) {
            return Err(anyhow!("feedback.command must not start with an empty program"));
        }
        if self.feedback.max_attempts == 0 {
            return Err(anyhow!("feedback.max_attempts must be > 0"));
        }
        if self.feedback.timeout_secs == 0 {
            return Err(anyhow!("feedback.timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn git_limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.git_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    pub fn test_runner(&self) -> CommandTestRunner {
        CommandTestRunner {
            run_command: self.tests.run_command.clone(),
            collect_command: self.tests.collect_command.clone(),
            limits: CommandLimits {
                timeout: Duration::from_secs(self.tests.timeout_secs),
                output_limit_bytes: self.output_limit_bytes,
            },
        }
    }

    /// Build the configured feedback generator, reading the prompt file if one is set.
    pub fn feedback_generator(&self) -> Result<ConfiguredFeedback> {
        if self.feedback.command.is_empty() {
            return Ok(ConfiguredFeedback::Disabled(DisabledFeedback));
        }
        let system_prompt = match &self.feedback.prompt_path {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("read feedback prompt {}", path.display()))?,
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
        };
        Ok(ConfiguredFeedback::Command(CommandFeedbackGenerator {
            command: self.feedback.command.clone(),
            system_prompt,
            limits: CommandLimits {
                timeout: Duration::from_secs(self.feedback.timeout_secs),
                output_limit_bytes: self.output_limit_bytes,
            },
        }))
    }
}

fn is_command(argv: &[String]) -> bool {
    argv.first().is_some_and(|program| !program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TrackerConfig::default()`.
pub fn load_config(path: &Path) -> Result<TrackerConfig> {
    if !path.exists() {
        let cfg = TrackerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TrackerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TrackerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
