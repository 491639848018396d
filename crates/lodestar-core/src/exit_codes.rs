//! Exit codes an embedding CLI should report for a run

/// Success
pub const SUCCESS: i32 = 0;

/// At least one required action failed
pub const FAILURE: i32 = 1;

/// Configuration error (unresolved dependency, cycle, invalid settings)
pub const CONFIG_ERROR: i32 = 2;

/// Run was cancelled by the operator
pub const CANCELLED: i32 = 130;
