//! Skill context optimization with progressive disclosure.
//!
//! Skill markdown files are pre-digested into a [`SummaryIndex`] carrying
//! four content levels per skill (MINIMAL < ESSENTIAL < STANDARD < FULL)
//! with token estimates. The [`SkillOptimizer`] picks the highest level
//! that fits the caller's token budget, never dropping a skill's name and
//! description.

/// Summary index persistence and hash-driven regeneration.
pub mod index;
/// Budgeted level selection.
pub mod optimizer;
/// Per-skill summaries and disclosure levels.
pub mod summary;

pub use index::{SummaryBuilder, SummaryIndex};
pub use optimizer::{OptimizeOptions, OptimizedContext, OptimizedSkill, SkillOptimizer};
pub use summary::{estimate_tokens, DisclosureLevel, LevelPayload, SkillSummary};
