//! CUJ (critical user journey) reference detection and mapping table.
//!
//! The mapping lives in a Markdown table under the heading
//! `## Run CUJ Mapping` with columns
//! `| CUJ-ID | execution_mode | workflow_path | primary_skill |`.
//! The Markdown table is the canonical source; no JSON registry is
//! consulted.

use maestro_core::{MaestroError, MaestroResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::warn;

/// How a CUJ is executed when referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Workflow,
    Skill,
    SkillOnly,
    Manual,
    ManualSetup,
}

impl ExecutionMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(ExecutionMode::Workflow),
            "skill" => Some(ExecutionMode::Skill),
            "skill-only" => Some(ExecutionMode::SkillOnly),
            "manual" => Some(ExecutionMode::Manual),
            "manual-setup" => Some(ExecutionMode::ManualSetup),
            _ => None,
        }
    }
}

/// One resolved row of the mapping table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CujRow {
    pub cuj_id: String,
    pub execution_mode: ExecutionMode,
    pub workflow_path: Option<String>,
    pub primary_skill: Option<String>,
}

/// Parsed CUJ mapping, keyed by upper-cased CUJ id.
#[derive(Debug, Clone, Default)]
pub struct CujMapping {
    rows: HashMap<String, CujRow>,
}

/// `-`, `null`, and empty cells all denote absence.
fn cell_value(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl CujMapping {
    /// Parse the mapping table from a Markdown document. Malformed rows
    /// (< 4 cells, bad id, unknown mode) are skipped and logged; the rest
    /// of the table is still used. A missing heading is a hard error.
    pub fn parse(markdown: &str) -> MaestroResult<Self> {
        let mut lines = markdown.lines();
        let heading_found = lines
            .by_ref()
            .any(|l| l.trim().eq_ignore_ascii_case("## Run CUJ Mapping"));
        if !heading_found {
            return Err(MaestroError::MalformedMapping(
                "missing '## Run CUJ Mapping' heading".to_string(),
            ));
        }

        let mut rows = HashMap::new();
        for line in lines {
            let trimmed = line.trim();
            if trimmed.starts_with("##") {
                break; // next section
            }
            if !trimmed.starts_with('|') {
                continue;
            }
            // Separator and header rows.
            if trimmed.contains("---") || trimmed.to_ascii_uppercase().contains("CUJ-ID") {
                continue;
            }

            let cells: Vec<&str> = trimmed
                .trim_matches('|')
                .split('|')
                .map(str::trim)
                .collect();
            if cells.len() < 4 {
                warn!(row = %trimmed, "Skipping malformed CUJ mapping row (<4 cells)");
                continue;
            }

            let Some(cuj_id) = cell_value(cells[0]) else {
                warn!(row = %trimmed, "Skipping CUJ mapping row without id");
                continue;
            };
            let cuj_id = cuj_id.to_ascii_uppercase();
            if !is_cuj_id(&cuj_id) {
                warn!(row = %trimmed, "Skipping CUJ mapping row with bad id");
                continue;
            }

            let Some(mode) = cell_value(cells[1]).and_then(|m| ExecutionMode::parse(&m)) else {
                warn!(row = %trimmed, "Skipping CUJ mapping row with unknown execution mode");
                continue;
            };

            rows.insert(
                cuj_id.clone(),
                CujRow {
                    cuj_id,
                    execution_mode: mode,
                    workflow_path: cell_value(cells[2]),
                    primary_skill: cell_value(cells[3]),
                },
            );
        }

        Ok(Self { rows })
    }

    pub fn get(&self, cuj_id: &str) -> Option<&CujRow> {
        self.rows.get(&cuj_id.to_ascii_uppercase())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn is_cuj_id(s: &str) -> bool {
    s.len() == 7
        && s.starts_with("CUJ-")
        && s[4..].chars().all(|c| c.is_ascii_digit())
}

fn cuj_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)/cuj-(\d{3})",
            r"(?i)\brun\s+cuj-(\d{3})\b",
            r"(?i)\bexecute\s+cuj-(\d{3})\b",
            r"(?i)\btest\s+cuj-(\d{3})\b",
            r"(?i)\bcuj-(\d{3})\b",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("static regex: {e}")))
        .collect()
    })
}

/// Find a CUJ reference in a prompt, normalized to `CUJ-NNN`.
pub fn detect_cuj_reference(prompt: &str) -> Option<String> {
    for pattern in cuj_patterns() {
        if let Some(caps) = pattern.captures(prompt) {
            if let Some(digits) = caps.get(1) {
                return Some(format!("CUJ-{}", digits.as_str()));
            }
        }
    }
    None
}
