use crate::scrub::scrub_value;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

/// Default retention window in days.
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// One telemetry event; payloads are PII-scrubbed before storage and
/// never leave the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl TelemetryEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data: scrub_value(&data),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Aggregated report over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub period_days: u32,
    pub total_events: usize,
    pub by_type: BTreeMap<String, usize>,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

/// Opt-in, on-host telemetry store.
///
/// Events append to one JSON-lines file per day; order within a day file
/// matches write order. Nothing is ever transmitted off-host.
pub struct TelemetryStore {
    dir: PathBuf,
    retention_days: u32,
}

impl TelemetryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    fn enabled_flag(&self) -> PathBuf {
        self.dir.join("enabled")
    }

    fn events_dir(&self) -> PathBuf {
        self.dir.join("events")
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.events_dir().join(format!("{date}.json"))
    }

    /// Telemetry is off unless explicitly enabled; the environment opt-out
    /// always wins.
    pub async fn is_enabled(&self) -> bool {
        if std::env::var("CLAUDE_DENIAL_LOGGER_DISABLE").is_ok_and(|v| v == "1" || v == "true") {
            return false;
        }
        tokio::fs::try_exists(&self.enabled_flag())
            .await
            .unwrap_or(false)
    }

    pub async fn enable(&self) -> MaestroResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.enabled_flag(), b"1").await?;
        info!("Telemetry enabled");
        Ok(())
    }

    pub async fn disable(&self) -> MaestroResult<()> {
        match tokio::fs::remove_file(self.enabled_flag()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Telemetry disabled");
        Ok(())
    }

    /// Append an event to today's file. A no-op when telemetry is off.
    pub async fn log_event(&self, event: TelemetryEvent) -> MaestroResult<bool> {
        if !self.is_enabled().await {
            return Ok(false);
        }
        tokio::fs::create_dir_all(self.events_dir()).await?;
        let path = self.day_file(event.timestamp.date_naive());
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        debug!(event_type = %event.event_type, "Telemetry event logged");
        Ok(true)
    }

    /// Load events from the last `period_days` days, oldest day first,
    /// write order within each day.
    pub async fn read_events(&self, period_days: u32) -> MaestroResult<Vec<TelemetryEvent>> {
        let mut events = Vec::new();
        let today = Utc::now().date_naive();
        for offset in (0..period_days as i64).rev() {
            let date = today - Duration::days(offset);
            let path = self.day_file(date);
            let data = match tokio::fs::read_to_string(&path).await {
                Ok(d) => d,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for line in data.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<TelemetryEvent>(line) {
                    Ok(event) => events.push(event),
                    Err(e) => debug!(error = %e, "Skipping malformed telemetry line"),
                }
            }
        }
        Ok(events)
    }

    /// Aggregate events over a period.
    pub async fn report(&self, period_days: u32) -> MaestroResult<TelemetryReport> {
        let events = self.read_events(period_days).await?;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        for event in &events {
            *by_type.entry(event.event_type.clone()).or_default() += 1;
        }
        Ok(TelemetryReport {
            period_days,
            total_events: events.len(),
            by_type,
            first_event: events.first().map(|e| e.timestamp),
            last_event: events.last().map(|e| e.timestamp),
        })
    }

    /// Write an export document and return its path.
    pub async fn export(&self, period_days: u32, out: &Path) -> MaestroResult<usize> {
        let events = self.read_events(period_days).await?;
        let doc = serde_json::json!({
            "exported_at": Utc::now(),
            "period_days": period_days,
            "events": events,
        });
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out, serde_json::to_vec_pretty(&doc)?).await?;
        Ok(events.len())
    }

    /// Delete day files older than the retention window. Returns the
    /// number of files removed.
    pub async fn apply_retention(&self) -> MaestroResult<usize> {
        self.purge_older_than(self.retention_days).await
    }

    /// Delete every event file (explicit purge).
    pub async fn purge_all(&self) -> MaestroResult<usize> {
        self.purge_older_than(0).await
    }

    async fn purge_older_than(&self, keep_days: u32) -> MaestroResult<usize> {
        let cutoff = Utc::now().date_naive() - Duration::days(i64::from(keep_days));
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(self.events_dir()).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(date) = stem.parse::<NaiveDate>() else {
                continue;
            };
            let old = if keep_days == 0 {
                date <= Utc::now().date_naive()
            } else {
                date < cutoff
            };
            if old {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed = removed, keep_days = keep_days, "Telemetry files purged");
        }
        Ok(removed)
    }
}
