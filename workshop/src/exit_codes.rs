//! Stable exit codes for `workshop` CLI commands.

/// Command succeeded, or the commission succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config/arguments/records or other errors.
pub const INVALID: i32 = 1;
/// The commission hit its iteration limit.
pub const STALEMATE: i32 = 2;
/// The commission was handed to a human.
pub const ESCALATED: i32 = 3;
/// The commission was cancelled before finishing.
pub const CANCELLED: i32 = 4;
