//! Stable exit codes for tddgame CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid configuration, storage failure, or another unexpected error.
pub const INVALID: i32 = 1;
/// An administrative request was refused (unknown id, bad transition, duplicate repo...).
pub const REJECTED: i32 = 2;
/// `poll --once` finished but at least one participant could not be synced or processed.
pub const DEGRADED: i32 = 3;
