//! Deterministic, pure logic shared by the tracker.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod locator;
pub mod scoring;
pub mod structure;
pub mod types;
