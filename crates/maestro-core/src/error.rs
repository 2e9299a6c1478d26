use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro runtime.
///
/// Each variant corresponds to a failure kind the runtime distinguishes for
/// its propagation policy (fallback, retry, degradation, or surfacing).
#[derive(Error, Debug)]
pub enum MaestroError {
    /// A run status transition outside the allowed state machine.
    #[error("Invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A required artifact was not found in the registry.
    #[error("Missing artifact: {0}")]
    MissingArtifact(String),

    /// A snapshot failed checksum verification on read.
    #[error("Corrupt snapshot {snapshot_id}: {detail}")]
    CorruptSnapshot { snapshot_id: String, detail: String },

    /// An oracle invocation exceeded its deadline.
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// An oracle (external agent backend) invocation failed.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Not enough free memory headroom to admit a new spawn.
    #[error("Insufficient memory: {free_mb} MB free, {required_mb} MB required")]
    InsufficientMemory { free_mb: i64, required_mb: u64 },

    /// Input validation failed (malformed plan, workflow, or package).
    #[error("Validation error: {0}")]
    Validation(String),

    /// A file lock could not be acquired within the bounded wait.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// A CUJ mapping table row or document could not be interpreted.
    #[error("Malformed mapping: {0}")]
    MalformedMapping(String),

    /// A token or size budget was exceeded.
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaestroError {
    /// Process exit code this error maps to (spec: 0 success, 1 generic,
    /// 2 fatal startup, 42 memory-driven graceful abort).
    pub fn exit_code(&self) -> i32 {
        match self {
            MaestroError::InsufficientMemory { .. } => crate::exit::EXIT_MEMORY_ABORT,
            MaestroError::Config(_) => crate::exit::EXIT_FATAL,
            _ => crate::exit::EXIT_FAILURE,
        }
    }
}
