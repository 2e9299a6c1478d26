use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{get_current_pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// RSS thresholds and sampling cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "MemoryConfig::default_max_rss_mb")]
    pub max_rss_mb: u64,
    #[serde(default = "MemoryConfig::default_warn_rss_mb")]
    pub warn_rss_mb: u64,
    #[serde(default = "MemoryConfig::default_min_free_mb")]
    pub min_free_mb_spawn_subagent: u64,
    #[serde(default = "MemoryConfig::default_interval_ms")]
    pub monitor_interval_ms: u64,
}

impl MemoryConfig {
    fn default_max_rss_mb() -> u64 {
        4096
    }
    fn default_warn_rss_mb() -> u64 {
        3500
    }
    fn default_min_free_mb() -> u64 {
        500
    }
    fn default_interval_ms() -> u64 {
        60_000
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_rss_mb: Self::default_max_rss_mb(),
            warn_rss_mb: Self::default_warn_rss_mb(),
            min_free_mb_spawn_subagent: Self::default_min_free_mb(),
            monitor_interval_ms: Self::default_interval_ms(),
        }
    }
}

/// Memory pressure, mapped from the RSS usage fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureLevel {
    Normal,
    High,
    Critical,
}

pub const HIGH_PRESSURE_FRACTION: f64 = 0.70;
pub const CRITICAL_PRESSURE_FRACTION: f64 = 0.90;

impl PressureLevel {
    pub fn from_fraction(fraction: f64) -> Self {
        if fraction >= CRITICAL_PRESSURE_FRACTION {
            PressureLevel::Critical
        } else if fraction >= HIGH_PRESSURE_FRACTION {
            PressureLevel::High
        } else {
            PressureLevel::Normal
        }
    }
}

/// Admission verdict for spawning a subagent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnAdmission {
    #[serde(rename = "canSpawn")]
    pub can_spawn: bool,
    #[serde(rename = "freeMB")]
    pub free_mb: i64,
    #[serde(rename = "currentUsageMB")]
    pub current_usage_mb: u64,
    #[serde(rename = "maxRSSMB")]
    pub max_rss_mb: u64,
}

/// Called when pressure leaves `Normal`; receives the level and current
/// RSS in MB.
pub type PressureCallback = Arc<dyn Fn(PressureLevel, u64) + Send + Sync>;

/// Samples process RSS and answers spawn-admission queries.
///
/// The default probe reads RSS via `sysinfo`; tests substitute a fixed
/// probe.
pub struct MemoryMonitor {
    config: MemoryConfig,
    probe: RwLock<Arc<dyn Fn() -> u64 + Send + Sync>>,
    on_pressure: Mutex<Option<PressureCallback>>,
    last_level: Mutex<PressureLevel>,
}

impl MemoryMonitor {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            config,
            probe: RwLock::new(Arc::new(sysinfo_rss_mb)),
            on_pressure: Mutex::new(None),
            last_level: Mutex::new(PressureLevel::Normal),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Replace the RSS probe (testing and simulation).
    pub fn set_probe(&self, probe: impl Fn() -> u64 + Send + Sync + 'static) {
        *self.probe.write() = Arc::new(probe);
    }

    pub fn set_pressure_callback(&self, callback: impl Fn(PressureLevel, u64) + Send + Sync + 'static) {
        *self.on_pressure.lock() = Some(Arc::new(callback));
    }

    /// Current RSS in MB.
    pub fn current_rss_mb(&self) -> u64 {
        (self.probe.read())()
    }

    /// Admission check: `free = max_rss - current`; spawn is admitted when
    /// at least `min_free_mb` remains.
    pub fn can_spawn_subagent(&self, min_free_mb: u64) -> SpawnAdmission {
        let current = self.current_rss_mb();
        let free = self.config.max_rss_mb as i64 - current as i64;
        let admission = SpawnAdmission {
            can_spawn: free >= min_free_mb as i64,
            free_mb: free,
            current_usage_mb: current,
            max_rss_mb: self.config.max_rss_mb,
        };
        if !admission.can_spawn {
            debug!(
                free_mb = admission.free_mb,
                min_free_mb = min_free_mb,
                "Spawn admission denied"
            );
        }
        admission
    }

    /// Sample once: compute pressure, log threshold crossings, fire the
    /// callback when pressure is elevated. Returns the level.
    pub fn sample(&self) -> PressureLevel {
        let current = self.current_rss_mb();
        let fraction = current as f64 / self.config.max_rss_mb as f64;
        let level = PressureLevel::from_fraction(fraction);

        if current >= self.config.warn_rss_mb {
            warn!(
                rss_mb = current,
                warn_rss_mb = self.config.warn_rss_mb,
                "RSS above warning threshold"
            );
        }

        let mut last = self.last_level.lock();
        if level != *last {
            info!(from = ?*last, to = ?level, rss_mb = current, "Memory pressure changed");
            *last = level;
        }
        drop(last);

        if level != PressureLevel::Normal {
            if let Some(cb) = self.on_pressure.lock().clone() {
                cb(level, current);
            }
        }
        level
    }

    /// Run the sampling loop until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.monitor_interval_ms);
        info!(interval_ms = self.config.monitor_interval_ms, "Memory monitor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.sample();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Memory monitor stopped");
                        return;
                    }
                }
            }
        }
    }
}

/// RSS of the current process in MB via sysinfo; 0 when unavailable.
fn sysinfo_rss_mb() -> u64 {
    let Ok(pid) = get_current_pid() else {
        return 0;
    };
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|p| p.memory() / (1024 * 1024))
        .unwrap_or(0)
}
