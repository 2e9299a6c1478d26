//! Reserved process exit codes.

/// Successful completion.
pub const EXIT_OK: i32 = 0;

/// Generic failure: failed gates, failing run, oracle errors.
pub const EXIT_FAILURE: i32 = 1;

/// Fatal startup or dependency error (bad config, missing workflow dir).
pub const EXIT_FATAL: i32 = 2;

/// Graceful memory-driven abort, signalled to supervisors.
pub const EXIT_MEMORY_ABORT: i32 = 42;
