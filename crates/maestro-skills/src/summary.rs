use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Progressive disclosure levels, strictly ordered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DisclosureLevel {
    Minimal,
    Essential,
    Standard,
    Full,
}

impl DisclosureLevel {
    pub const ALL: [DisclosureLevel; 4] = [
        DisclosureLevel::Minimal,
        DisclosureLevel::Essential,
        DisclosureLevel::Standard,
        DisclosureLevel::Full,
    ];
}

impl std::fmt::Display for DisclosureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DisclosureLevel::Minimal => "minimal",
            DisclosureLevel::Essential => "essential",
            DisclosureLevel::Standard => "standard",
            DisclosureLevel::Full => "full",
        };
        write!(f, "{s}")
    }
}

/// Pre-rendered content at one disclosure level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelPayload {
    pub content: String,
    pub tokens: usize,
}

/// YAML frontmatter of a skill markdown file.
#[derive(Debug, Clone, Deserialize)]
struct SkillFrontmatter {
    name: String,
    description: String,
    #[serde(default)]
    command: Option<String>,
}

/// Pre-computed per-level summaries for one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSummary {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<String>,
    /// SHA-256 of the source markdown; summaries regenerate on mismatch.
    pub content_hash: String,
    pub minimal: LevelPayload,
    pub essential: LevelPayload,
    pub standard: LevelPayload,
    pub full: LevelPayload,
}

/// Rough token estimate: 4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn content_hash(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

impl SkillSummary {
    pub fn payload(&self, level: DisclosureLevel) -> &LevelPayload {
        match level {
            DisclosureLevel::Minimal => &self.minimal,
            DisclosureLevel::Essential => &self.essential,
            DisclosureLevel::Standard => &self.standard,
            DisclosureLevel::Full => &self.full,
        }
    }

    /// Build the four levels from a skill markdown file with YAML
    /// frontmatter.
    ///
    /// - MINIMAL: name and description only.
    /// - ESSENTIAL: adds the invocation command.
    /// - STANDARD: adds the leading body section.
    /// - FULL: the whole body.
    ///
    /// Every level carries the name and description; the invocation
    /// command appears from ESSENTIAL upward.
    pub fn build(raw: &str) -> MaestroResult<Self> {
        let (front, body) = split_frontmatter(raw)?;

        let header = format!("### {}\n{}", front.name, front.description);
        let invocation_line = front
            .command
            .as_ref()
            .map(|c| format!("\nInvoke: `{c}`"))
            .unwrap_or_default();

        let minimal = header.clone();
        let essential = format!("{header}{invocation_line}");
        let standard = format!("{essential}\n\n{}", leading_section(&body));
        let full = format!("{essential}\n\n{}", body.trim());

        Ok(Self {
            name: front.name,
            description: front.description,
            invocation: front.command,
            content_hash: content_hash(raw),
            minimal: LevelPayload {
                tokens: estimate_tokens(&minimal),
                content: minimal,
            },
            essential: LevelPayload {
                tokens: estimate_tokens(&essential),
                content: essential,
            },
            standard: LevelPayload {
                tokens: estimate_tokens(&standard),
                content: standard,
            },
            full: LevelPayload {
                tokens: estimate_tokens(&full),
                content: full,
            },
        })
    }
}

fn split_frontmatter(raw: &str) -> MaestroResult<(SkillFrontmatter, String)> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return Err(MaestroError::Config(
            "skill markdown must start with YAML frontmatter (---)".to_string(),
        ));
    }
    let after_open = &trimmed[3..];
    let close_pos = after_open.find("\n---").ok_or_else(|| {
        MaestroError::Config("skill markdown missing closing frontmatter delimiter".to_string())
    })?;

    let yaml_str = &after_open[..close_pos];
    let body = after_open[close_pos + 4..].trim().to_string();

    let front: SkillFrontmatter = serde_yaml_ng::from_str(yaml_str)
        .map_err(|e| MaestroError::Config(format!("invalid skill frontmatter: {e}")))?;
    Ok((front, body))
}

/// First markdown section of the body (up to the second heading), used for
/// the STANDARD level.
fn leading_section(body: &str) -> String {
    let mut out = Vec::new();
    let mut headings = 0;
    for line in body.trim().lines() {
        if line.starts_with('#') {
            headings += 1;
            if headings > 1 {
                break;
            }
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}
