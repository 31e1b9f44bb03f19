//! Deterministic classification of changed paths and TDD phases.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::core::types::TddPhase;

/// Which repository paths count as tests and which as production code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathRules {
    /// A path is a test path if any component starts with one of these prefixes.
    pub test_file_prefixes: Vec<String>,
    /// A path is a test path if any directory component equals one of these names.
    pub test_dirs: Vec<String>,
    /// Production files, matched by full relative path or by file name.
    pub production_files: Vec<String>,
}

impl Default for PathRules {
    fn default() -> Self {
        Self {
            test_file_prefixes: vec!["test_".to_string()],
            test_dirs: vec!["tests".to_string()],
            production_files: vec!["fizzbuzz.py".to_string()],
        }
    }
}

impl PathRules {
    pub fn is_test_path(&self, path: &Path) -> bool {
        let components: Vec<&str> = normal_components(path).collect();
        let Some((file_name, dirs)) = components.split_last() else {
            return false;
        };
        let prefixed = components.iter().any(|component| {
            self.test_file_prefixes
                .iter()
                .any(|prefix| component.starts_with(prefix.as_str()))
        });
        let in_test_dir = dirs
            .iter()
            .any(|dir| self.test_dirs.iter().any(|name| name == dir));
        prefixed || in_test_dir || self.test_dirs.iter().any(|name| name == file_name)
    }

    pub fn is_production_path(&self, path: &Path) -> bool {
        let components: Vec<&str> = normal_components(path).collect();
        let Some(file_name) = components.last() else {
            return false;
        };
        let joined = components.join("/");
        self.production_files
            .iter()
            .any(|entry| *entry == joined || entry == file_name)
    }
}

/// Which designated path sets a commit touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub tests_changed: bool,
    pub production_changed: bool,
    /// Changed production paths, in input order.
    pub production_paths: Vec<String>,
}

/// Split changed paths into test and production sets.
pub fn summarize_changes<P: AsRef<Path>>(rules: &PathRules, changed_paths: &[P]) -> ChangeSummary {
    let mut summary = ChangeSummary::default();
    for path in changed_paths {
        let path = path.as_ref();
        if rules.is_test_path(path) {
            summary.tests_changed = true;
        } else if rules.is_production_path(path) {
            summary.production_changed = true;
            summary.production_paths.push(path.to_string_lossy().into_owned());
        }
    }
    summary
}

/// Whether the structural refactor check should run for a commit.
///
/// Only commits that touch production code, keep tests untouched, pass their
/// tests, and have a parent to compare against qualify.
pub fn refactor_check_applies(
    changes: &ChangeSummary,
    tests_passed: bool,
    has_parent: bool,
) -> bool {
    changes.production_changed && tests_passed && !changes.tests_changed && has_parent
}

/// Everything the phase decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseEvidence {
    pub tests_changed: bool,
    pub production_changed: bool,
    pub tests_passed: bool,
    pub collected_tests: usize,
    pub is_refactoring: bool,
}

/// Decide the TDD phase. Rules are evaluated in priority order.
pub fn decide_phase(evidence: &PhaseEvidence) -> TddPhase {
    if evidence.tests_changed
        && !evidence.production_changed
        && !evidence.tests_passed
        && evidence.collected_tests > 0
    {
        TddPhase::Red
    } else if evidence.is_refactoring {
        TddPhase::Refactor
    } else if evidence.production_changed && !evidence.tests_changed && evidence.tests_passed {
        TddPhase::Green
    } else {
        TddPhase::Unknown
    }
}

fn normal_components(path: &Path) -> impl Iterator<Item = &str> {
    path.components().filter_map(|component| match component {
        Component::Normal(name) => name.to_str(),
        _ => None,
    })
}
