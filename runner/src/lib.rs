//! Parallel ticket runner driving an external coding agent.
//!
//! Tickets live in `.runner/tickets.json` and form a dependency graph. The
//! scheduler dispatches every ticket whose dependencies are complete to the
//! agent CLI, up to a parallelism limit, and records each outcome. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (graph, sanitization, event
//!   decoding). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, process execution).
//!   Isolated behind traits to enable fakes in tests.
//!
//! Orchestration modules ([`scheduler`], [`run`], [`status`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod run;
pub mod scheduler;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod ticket;
pub mod validate;
