//! W3C trace context for delegation audit trails.
//!
//! Packets carry a `traceparent` built from a 16-byte trace id and an
//! 8-byte span id. Baggage is a separate `key=value` set; `tracestate` is
//! not used for application data.

use crate::error::{MaestroError, MaestroResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TRACEPARENT_VERSION: &str = "00";
const SAMPLED_FLAG: &str = "01";

/// Trace identity propagated through every delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// 32 lowercase hex chars, never all-zero.
    pub trace_id: String,
    /// 16 lowercase hex chars, never all-zero.
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub baggage: BTreeMap<String, String>,
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let buf: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
        if buf.iter().any(|&b| b != 0) {
            return hex::encode(buf);
        }
    }
}

fn is_valid_hex_id(s: &str, len: usize) -> bool {
    s.len() == len
        && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        && s.chars().any(|c| c != '0')
}

impl TraceContext {
    /// Start a new root trace with random non-zero ids.
    pub fn new_root() -> Self {
        Self {
            trace_id: random_hex(16),
            span_id: random_hex(8),
            parent_span_id: None,
            baggage: BTreeMap::new(),
        }
    }

    /// Derive a child context: same trace id, fresh span id, parent set.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: random_hex(8),
            parent_span_id: Some(self.span_id.clone()),
            baggage: self.baggage.clone(),
        }
    }

    pub fn with_baggage(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.baggage.insert(key.into(), value.into());
        self
    }

    /// Render the W3C `traceparent` header value.
    pub fn traceparent(&self) -> String {
        format!(
            "{TRACEPARENT_VERSION}-{}-{}-{SAMPLED_FLAG}",
            self.trace_id, self.span_id
        )
    }

    /// Render baggage as a header-shaped `k1=v1,k2=v2` string.
    pub fn baggage_header(&self) -> String {
        self.baggage
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse and validate a `traceparent` value. Rejects unknown versions
    /// and all-zero ids.
    pub fn parse_traceparent(value: &str) -> MaestroResult<TraceContext> {
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() != 4 {
            return Err(MaestroError::Validation(format!(
                "traceparent must have 4 segments, got {}",
                parts.len()
            )));
        }
        if parts[0] != TRACEPARENT_VERSION {
            return Err(MaestroError::Validation(format!(
                "unsupported traceparent version: {}",
                parts[0]
            )));
        }
        if !is_valid_hex_id(parts[1], 32) {
            return Err(MaestroError::Validation(format!(
                "invalid trace id: {}",
                parts[1]
            )));
        }
        if !is_valid_hex_id(parts[2], 16) {
            return Err(MaestroError::Validation(format!(
                "invalid span id: {}",
                parts[2]
            )));
        }
        Ok(TraceContext {
            trace_id: parts[1].to_string(),
            span_id: parts[2].to_string(),
            parent_span_id: None,
            baggage: BTreeMap::new(),
        })
    }
}
