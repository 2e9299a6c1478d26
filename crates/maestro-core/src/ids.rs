//! Identifier generation for runs and snapshots.

use chrono::Utc;
use rand::Rng;

const ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

fn random_suffix(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ID_CHARSET[rng.gen_range(0..ID_CHARSET.len())] as char)
        .collect()
}

/// Generate a new run identifier: `run-<epoch_ms>-<rand8>`.
pub fn new_run_id() -> String {
    format!("run-{}-{}", Utc::now().timestamp_millis(), random_suffix(8))
}

/// Generate a new snapshot identifier: `snap-<type>-<epoch>-<rand6>`.
pub fn new_snapshot_id(snapshot_type: &str) -> String {
    format!(
        "snap-{}-{}-{}",
        snapshot_type,
        Utc::now().timestamp(),
        random_suffix(6)
    )
}

/// Check that a string is a well-formed run identifier.
pub fn is_run_id(s: &str) -> bool {
    let mut parts = s.splitn(3, '-');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some("run"), Some(ts), Some(suffix))
            if ts.chars().all(|c| c.is_ascii_digit())
                && suffix.len() == 8
                && suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    )
}
