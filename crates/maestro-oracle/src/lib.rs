//! Uniform adapter over external agent backends.
//!
//! Backends (`claude`, `gemini`, `codex`, `cursor-agent`) are opaque
//! command-executing oracles: prompt in, text out. The adapter never
//! interprets stdout, enforces a timeout, and bounds captured output.

/// Backend invocation profiles and the agent → backend registry.
pub mod backends;
/// The `Oracle` trait and process-backed implementation.
pub mod exec;

pub use backends::{default_profiles, BackendKind, BackendProfile, BackendRegistry};
pub use exec::{
    Oracle, OracleRequest, OracleResponse, OracleStatus, ProcessOracle, DEFAULT_CAPTURE_CAP,
    DEFAULT_TIMEOUT,
};
