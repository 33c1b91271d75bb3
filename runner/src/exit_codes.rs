//! Stable exit codes for runner CLI commands.

/// Command succeeded; for `run`, every ticket completed.
pub const OK: i32 = 0;
/// Invalid layout, config or ticket store, unsatisfiable dependencies in
/// strict mode, or any other error.
pub const INVALID: i32 = 1;
/// `run` stopped with pending tickets that can never become eligible.
pub const STALLED: i32 = 2;
/// `run` finished but at least one ticket failed.
pub const FAILED: i32 = 3;
/// `run` was interrupted (Ctrl-C).
pub const CANCELLED: i32 = 130;
