use crate::index::SummaryIndex;
use crate::summary::DisclosureLevel;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Options for one optimization pass.
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// Upper bound on the disclosure level; the budget may push lower.
    pub level: Option<DisclosureLevel>,
    /// Total token budget across all selected skills.
    pub max_tokens: usize,
    /// Required skills keep their slot when names overlap with triggered.
    pub prioritize_required: bool,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            level: None,
            max_tokens: 4000,
            prioritize_required: true,
        }
    }
}

/// One skill's contribution to the optimized context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedSkill {
    pub name: String,
    pub level: DisclosureLevel,
    pub content: String,
    pub tokens: usize,
}

/// Result of an optimization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizedContext {
    pub level: DisclosureLevel,
    pub actual_tokens: usize,
    pub skills: Vec<OptimizedSkill>,
    /// Requested skills with no summary in the index.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

/// Progressive-disclosure optimizer over the pre-built summary index.
pub struct SkillOptimizer {
    index: SummaryIndex,
}

impl SkillOptimizer {
    pub fn new(index: SummaryIndex) -> Self {
        Self { index }
    }

    pub fn index(&self) -> &SummaryIndex {
        &self.index
    }

    /// Select skill content bounded by the token budget.
    ///
    /// The per-skill budget is `max_tokens / n`. The returned level is the
    /// greatest level at which every selected skill fits that budget,
    /// clamped by the caller's `level` upper bound. MINIMAL is the floor:
    /// names and descriptions are always emitted.
    pub fn optimize(
        &self,
        required: &[String],
        triggered: &[String],
        opts: &OptimizeOptions,
    ) -> OptimizedContext {
        let mut names: Vec<&str> = Vec::new();
        if opts.prioritize_required {
            for name in required {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
            for name in triggered {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        } else {
            for name in triggered.iter().chain(required) {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }

        let mut missing = Vec::new();
        let summaries: Vec<_> = names
            .iter()
            .filter_map(|name| match self.index.get(name) {
                Some(s) => Some(s),
                None => {
                    warn!(skill = %name, "No summary for requested skill");
                    missing.push((*name).to_string());
                    None
                }
            })
            .collect();

        if summaries.is_empty() {
            return OptimizedContext {
                level: opts.level.unwrap_or(DisclosureLevel::Minimal),
                actual_tokens: 0,
                skills: Vec::new(),
                missing,
            };
        }

        let per_skill = opts.max_tokens / summaries.len();
        let cap = opts.level.unwrap_or(DisclosureLevel::Full);

        // Greatest level, within the cap, at which every skill fits the
        // per-skill budget. MINIMAL is kept even when over budget.
        let mut level = DisclosureLevel::Minimal;
        for candidate in DisclosureLevel::ALL {
            if candidate > cap {
                break;
            }
            if summaries.iter().all(|s| s.payload(candidate).tokens <= per_skill) {
                level = candidate;
            }
        }

        let skills: Vec<OptimizedSkill> = summaries
            .iter()
            .map(|s| {
                let payload = s.payload(level);
                OptimizedSkill {
                    name: s.name.clone(),
                    level,
                    content: payload.content.clone(),
                    tokens: payload.tokens,
                }
            })
            .collect();
        let actual_tokens = skills.iter().map(|s| s.tokens).sum();

        debug!(
            skills = skills.len(),
            level = %level,
            actual_tokens = actual_tokens,
            budget = opts.max_tokens,
            "Skill context optimized"
        );
        OptimizedContext {
            level,
            actual_tokens,
            skills,
            missing,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::summary::SkillSummary;

    fn summary(name: &str, body_len: usize) -> SkillSummary {
        let raw = format!(
            "---\nname: {name}\ndescription: Skill {name}\ncommand: maestro skill run {name}\n---\n\n# Guide\n\nShort intro for {name}.\n\n# Details\n\n{}",
            "x".repeat(body_len)
        );
        SkillSummary::build(&raw).unwrap()
    }

    fn optimizer(sizes: &[(&str, usize)]) -> SkillOptimizer {
        let mut index = SummaryIndex::default();
        for (name, size) in sizes {
            index
                .summaries
                .insert((*name).to_string(), summary(name, *size));
        }
        SkillOptimizer::new(index)
    }

    fn req(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_generous_budget_gives_full() {
        let opt = optimizer(&[("a", 400), ("b", 400)]);
        let result = opt.optimize(&req(&["a", "b"]), &[], &OptimizeOptions::default());
        assert_eq!(result.level, DisclosureLevel::Full);
        assert!(result.actual_tokens <= 4000);
    }

    #[test]
    fn test_tight_budget_degrades_level() {
        let opt = optimizer(&[("a", 4000), ("b", 4000)]);
        let result = opt.optimize(
            &req(&["a", "b"]),
            &[],
            &OptimizeOptions {
                max_tokens: 200,
                ..OptimizeOptions::default()
            },
        );
        assert!(result.level < DisclosureLevel::Full);
        assert!(result.actual_tokens <= 200);
    }

    #[test]
    fn test_total_within_budget_at_returned_level() {
        for budget in [100, 500, 2000, 10_000] {
            let opt = optimizer(&[("a", 1000), ("b", 2000), ("c", 3000)]);
            let result = opt.optimize(
                &req(&["a", "b", "c"]),
                &[],
                &OptimizeOptions {
                    max_tokens: budget,
                    ..OptimizeOptions::default()
                },
            );
            if result.level > DisclosureLevel::Minimal {
                assert!(
                    result.actual_tokens <= budget,
                    "budget {budget} exceeded: {}",
                    result.actual_tokens
                );
            }
        }
    }

    #[test]
    fn test_caller_level_is_upper_bound() {
        let opt = optimizer(&[("a", 300)]);
        let result = opt.optimize(
            &req(&["a"]),
            &[],
            &OptimizeOptions {
                level: Some(DisclosureLevel::Essential),
                max_tokens: 100_000,
                ..OptimizeOptions::default()
            },
        );
        assert_eq!(result.level, DisclosureLevel::Essential);
    }

    #[test]
    fn test_names_always_emitted_even_over_budget() {
        let opt = optimizer(&[("a", 8000)]);
        let result = opt.optimize(
            &req(&["a"]),
            &[],
            &OptimizeOptions {
                max_tokens: 1,
                ..OptimizeOptions::default()
            },
        );
        assert_eq!(result.level, DisclosureLevel::Minimal);
        assert_eq!(result.skills.len(), 1);
        assert!(result.skills[0].content.contains("Skill a"));
    }

    #[test]
    fn test_returned_level_is_greatest_fitting() {
        let opt = optimizer(&[("a", 1200)]);
        let full_tokens = opt.index().get("a").unwrap().full.tokens;
        let standard_tokens = opt.index().get("a").unwrap().standard.tokens;
        // Budget sits between STANDARD and FULL for a single skill.
        let budget = (standard_tokens + full_tokens) / 2;
        let result = opt.optimize(
            &req(&["a"]),
            &[],
            &OptimizeOptions {
                max_tokens: budget,
                ..OptimizeOptions::default()
            },
        );
        assert_eq!(result.level, DisclosureLevel::Standard);
    }

    #[test]
    fn test_triggered_skills_are_merged() {
        let opt = optimizer(&[("a", 100), ("b", 100)]);
        let result = opt.optimize(&req(&["a"]), &req(&["b", "a"]), &OptimizeOptions::default());
        let names: Vec<&str> = result.skills.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_skills_reported() {
        let opt = optimizer(&[("a", 100)]);
        let result = opt.optimize(&req(&["a", "ghost"]), &[], &OptimizeOptions::default());
        assert_eq!(result.missing, vec!["ghost".to_string()]);
        assert_eq!(result.skills.len(), 1);
    }

    #[test]
    fn test_empty_request() {
        let opt = optimizer(&[("a", 100)]);
        let result = opt.optimize(&[], &[], &OptimizeOptions::default());
        assert!(result.skills.is_empty());
        assert_eq!(result.actual_tokens, 0);
    }
}
