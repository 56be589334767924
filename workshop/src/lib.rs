//! Quality-controlled commission workshop.
//!
//! A commission is a natural-language request that is planned, generated,
//! and critiqued in a loop until its quality score clears a threshold, the
//! iteration budget runs out, or the intervention policy hands it to a human.
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (scores, version history,
//!   intervention policy, state machine, diagnostics). No I/O.
//! - **[`agents`]**: Collaborator contracts (planner, reviewer, generator,
//!   critic) and command-backed implementations.
//! - **[`io`]**: Side-effecting operations (config file, child processes,
//!   archive).
//!
//! [`orchestrator`] drives one commission; [`workshop`] runs many of them
//! concurrently behind the caller-facing API.

pub mod agents;
pub mod commission;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod workshop;
