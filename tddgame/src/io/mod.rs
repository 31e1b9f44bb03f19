//! Side-effecting adapters: git, subprocesses, test runs, feedback, storage.

pub mod commit_classifier;
pub mod config;
pub mod feedback;
pub mod git;
pub mod process;
pub mod store;
pub mod sync;
pub mod test_runner;
