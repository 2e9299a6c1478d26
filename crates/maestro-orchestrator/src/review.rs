//! Plan review gate: multi-reviewer weighted scoring for plan-producing
//! steps.

use maestro_router::Complexity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Reviewer requirements for one task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerRequirements {
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    pub minimum_score: f64,
    pub blocking_threshold: f64,
}

/// Matrix keyed by task type, with a default row.
#[derive(Debug, Clone)]
pub struct ReviewMatrix {
    by_task_type: HashMap<String, ReviewerRequirements>,
    default: ReviewerRequirements,
}

impl ReviewMatrix {
    pub fn new(default: ReviewerRequirements) -> Self {
        Self {
            by_task_type: HashMap::new(),
            default,
        }
    }

    pub fn insert(&mut self, task_type: impl Into<String>, requirements: ReviewerRequirements) {
        self.by_task_type.insert(task_type.into(), requirements);
    }

    /// Resolve requirements for a task type, applying complexity
    /// modifiers: low complexity skips optional reviewers and relaxes the
    /// minimum; high complexity adds the security architect and raises
    /// the minimum.
    pub fn resolve(&self, task_type: &str, complexity: Complexity) -> ReviewerRequirements {
        let mut requirements = self
            .by_task_type
            .get(task_type)
            .unwrap_or(&self.default)
            .clone();

        match complexity {
            Complexity::Low => {
                requirements.optional.clear();
                requirements.minimum_score = (requirements.minimum_score - 1.0).max(0.0);
            }
            Complexity::Medium => {}
            Complexity::High => {
                if !requirements.required.iter().any(|r| r == "security-architect") {
                    requirements.required.push("security-architect".to_string());
                }
                requirements.minimum_score += 0.5;
            }
        }
        requirements
    }
}

impl Default for ReviewMatrix {
    fn default() -> Self {
        let mut matrix = Self::new(ReviewerRequirements {
            required: vec!["architect".into(), "qa".into()],
            optional: vec!["security-architect".into()],
            minimum_score: 7.0,
            blocking_threshold: 5.0,
        });
        matrix.insert(
            "implementation",
            ReviewerRequirements {
                required: vec!["architect".into(), "qa".into()],
                optional: vec!["security-architect".into()],
                minimum_score: 7.0,
                blocking_threshold: 5.0,
            },
        );
        matrix.insert(
            "research",
            ReviewerRequirements {
                required: vec!["architect".into()],
                optional: vec![],
                minimum_score: 6.0,
                blocking_threshold: 4.0,
            },
        );
        matrix
    }
}

/// One reviewer's verdict on a plan, scored 0–10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewScore {
    pub reviewer: String,
    pub score: f64,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
}

impl ReviewScore {
    pub fn new(reviewer: impl Into<String>, score: f64) -> Self {
        Self {
            reviewer: reviewer.into(),
            score,
            blocking_issues: Vec::new(),
        }
    }

    pub fn with_blocking_issue(mut self, issue: impl Into<String>) -> Self {
        self.blocking_issues.push(issue.into());
        self
    }
}

/// Aggregation weights and blocking policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPolicy {
    pub required_weight: f64,
    pub optional_weight: f64,
    pub any_reviewer_below_threshold_blocks: bool,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            required_weight: 0.7,
            optional_weight: 0.3,
            any_reviewer_below_threshold_blocks: true,
        }
    }
}

/// A blocking issue with reviewer attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockingIssue {
    pub reviewer: String,
    pub issue: String,
}

/// The gate's verdict: numeric score plus the reasons it blocked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanReviewReport {
    pub passed: bool,
    pub overall_score: f64,
    pub minimum_score: f64,
    pub blocking_issues: Vec<BlockingIssue>,
    /// Required reviewers that returned no score.
    pub missing_required: Vec<String>,
    /// Optional reviewers that were configured but absent; absence does
    /// not degrade the verdict.
    pub skipped_optional: Vec<String>,
}

/// Aggregate reviewer scores:
/// `overall = required_avg × w_req + optional_avg × w_opt`.
///
/// The plan passes iff the overall score meets the minimum, no reviewer
/// sits below the blocking threshold (when the policy says so), no
/// reviewer raised blocking issues, and every required reviewer reported.
pub fn evaluate(
    requirements: &ReviewerRequirements,
    scores: &[ReviewScore],
    policy: &ReviewPolicy,
) -> PlanReviewReport {
    let by_reviewer: HashMap<&str, &ReviewScore> =
        scores.iter().map(|s| (s.reviewer.as_str(), s)).collect();

    let mut missing_required = Vec::new();
    let mut required_scores = Vec::new();
    for reviewer in &requirements.required {
        match by_reviewer.get(reviewer.as_str()) {
            Some(score) => required_scores.push(*score),
            None => missing_required.push(reviewer.clone()),
        }
    }

    let mut skipped_optional = Vec::new();
    let mut optional_scores = Vec::new();
    for reviewer in &requirements.optional {
        match by_reviewer.get(reviewer.as_str()) {
            Some(score) => optional_scores.push(*score),
            None => skipped_optional.push(reviewer.clone()),
        }
    }

    let required_avg = average(&required_scores);
    let optional_avg = average(&optional_scores);
    let overall_score =
        required_avg * policy.required_weight + optional_avg * policy.optional_weight;

    let mut blocking_issues: Vec<BlockingIssue> = Vec::new();
    for score in required_scores.iter().chain(&optional_scores) {
        for issue in &score.blocking_issues {
            blocking_issues.push(BlockingIssue {
                reviewer: score.reviewer.clone(),
                issue: issue.clone(),
            });
        }
        if policy.any_reviewer_below_threshold_blocks
            && score.score < requirements.blocking_threshold
        {
            blocking_issues.push(BlockingIssue {
                reviewer: score.reviewer.clone(),
                issue: format!(
                    "score {} below blocking threshold {}",
                    score.score, requirements.blocking_threshold
                ),
            });
        }
    }

    let passed = missing_required.is_empty()
        && blocking_issues.is_empty()
        && overall_score >= requirements.minimum_score;

    info!(
        passed = passed,
        overall_score = overall_score,
        minimum_score = requirements.minimum_score,
        blocking = blocking_issues.len(),
        "Plan review evaluated"
    );
    PlanReviewReport {
        passed,
        overall_score,
        minimum_score: requirements.minimum_score,
        blocking_issues,
        missing_required,
        skipped_optional,
    }
}

fn average(scores: &[&ReviewScore]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64
}
