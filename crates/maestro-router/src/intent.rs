//! Keyword-based intent classification for semantic routing.

use serde::{Deserialize, Serialize};

/// Task type inferred from the user prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Implementation,
    Planning,
    Research,
    Testing,
    Refactoring,
    Documentation,
    Unknown,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Intent::Implementation => "implementation",
            Intent::Planning => "planning",
            Intent::Research => "research",
            Intent::Testing => "testing",
            Intent::Refactoring => "refactoring",
            Intent::Documentation => "documentation",
            Intent::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Coarse complexity estimate used by review-gate modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

const INTENT_KEYWORDS: &[(Intent, &[&str])] = &[
    (
        Intent::Implementation,
        &["build", "implement", "create", "add", "fix", "develop", "write a", "ship"],
    ),
    (
        Intent::Planning,
        &["plan", "design", "architect", "roadmap", "break down", "estimate"],
    ),
    (
        Intent::Research,
        &["research", "investigate", "explore", "compare", "evaluate", "survey"],
    ),
    (
        Intent::Testing,
        &["test", "verify", "validate", "qa", "regression", "coverage"],
    ),
    (
        Intent::Refactoring,
        &["refactor", "clean up", "restructure", "simplify", "migrate"],
    ),
    (
        Intent::Documentation,
        &["document", "docs", "readme", "changelog", "write up"],
    ),
];

/// Classification result with a score in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub complexity: Complexity,
    pub confidence: f64,
}

/// Classify a prompt by keyword hits; the intent with the most hits wins,
/// declaration order breaking ties.
pub fn classify(prompt: &str) -> Classification {
    let lower = prompt.to_lowercase();

    let mut best = (Intent::Unknown, 0usize);
    for (intent, keywords) in INTENT_KEYWORDS {
        let hits = keywords.iter().filter(|k| lower.contains(*k)).count();
        if hits > best.1 {
            best = (*intent, hits);
        }
    }

    let confidence = match best.1 {
        0 => 0.1,
        1 => 0.6,
        2 => 0.8,
        _ => 0.9,
    };

    Classification {
        intent: best.0,
        complexity: estimate_complexity(&lower),
        confidence,
    }
}

fn estimate_complexity(lower: &str) -> Complexity {
    let words = lower.split_whitespace().count();
    let conjunctions = lower.matches(" and ").count() + lower.matches(" then ").count();
    let hard_markers = ["distributed", "migration", "end-to-end", "security", "concurrent"]
        .iter()
        .filter(|m| lower.contains(*m))
        .count();

    if words > 60 || conjunctions >= 3 || hard_markers >= 2 {
        Complexity::High
    } else if words > 20 || conjunctions >= 1 || hard_markers == 1 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}
