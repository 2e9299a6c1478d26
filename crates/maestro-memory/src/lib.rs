//! Process memory monitoring and spawn admission.
//!
//! Samples RSS on a configured interval, maps usage to pressure levels,
//! and gates subagent spawns on free headroom. Critical pressure during an
//! active run is the coordinator's trigger for a context reset; the
//! reserved exit code for memory-driven aborts lives in
//! `maestro_core::exit`.

/// The monitor, thresholds, and admission checks.
pub mod monitor;

pub use monitor::{
    MemoryConfig, MemoryMonitor, PressureCallback, PressureLevel, SpawnAdmission,
    CRITICAL_PRESSURE_FRACTION, HIGH_PRESSURE_FRACTION,
};
