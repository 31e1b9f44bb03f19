//! TDD kata tracker.
//!
//! Participants' repositories are synced on a polling cycle. Every new commit
//! on the tracked branch is classified as a red, green or refactor step by
//! running the tests at that commit, the history is scored, and coaching
//! feedback is attached. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (path rules, phase decisions,
//!   structure comparison, scoring). No I/O.
//! - **[`io`]**: Side-effecting adapters (git, subprocesses, test runs,
//!   feedback generation, the game store, config).
//!
//! Orchestration modules ([`poll`], [`admin`], [`replay`]) combine the two to
//! implement CLI commands.

pub mod admin;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod poll;
pub mod replay;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
