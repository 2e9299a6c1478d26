use crate::trace::TraceContext;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Delegation trace block carried by every context packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketTrace {
    pub run_id: String,
    pub step: u32,
    pub agent: String,
    #[serde(flatten)]
    pub context: TraceContext,
}

/// The immutable, auditable prompt body passed to an oracle invocation.
///
/// Rendered with a fixed section order: GOAL, CONSTRAINTS, REFERENCES,
/// DEFINITION OF DONE, TRACE. The content hash is computed over the
/// serialized packet with the hash field empty, so a stored packet can be
/// re-verified byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPacket {
    pub goal: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Artifact paths the delegated agent may consult.
    #[serde(default)]
    pub references: Vec<String>,
    pub definition_of_done: String,
    pub trace: PacketTrace,
    #[serde(default)]
    pub content_hash: String,
}

impl ContextPacket {
    /// SHA-256 over the canonical serialization, hash field excluded.
    pub fn compute_hash(&self) -> String {
        let mut unhashed = self.clone();
        unhashed.content_hash = String::new();
        // BTreeMap baggage and struct field order make this serialization
        // stable for identical packets.
        let bytes = serde_json::to_vec(&unhashed).unwrap_or_default();
        hex::encode(Sha256::digest(bytes))
    }

    /// Attach the content hash; packets are sealed exactly once.
    pub fn seal(mut self) -> Self {
        self.content_hash = self.compute_hash();
        self
    }

    /// Whether the stored hash still matches the packet content.
    pub fn verify(&self) -> bool {
        !self.content_hash.is_empty() && self.content_hash == self.compute_hash()
    }

    /// Render the prompt body in the fixed five-section order.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("## GOAL\n");
        out.push_str(&self.goal);
        out.push_str("\n\n## CONSTRAINTS\n");
        if self.constraints.is_empty() {
            out.push_str("(none)\n");
        } else {
            for c in &self.constraints {
                out.push_str("- ");
                out.push_str(c);
                out.push('\n');
            }
        }

        out.push_str("\n## REFERENCES\n");
        if self.references.is_empty() {
            out.push_str("(none)\n");
        } else {
            for r in &self.references {
                out.push_str("- ");
                out.push_str(r);
                out.push('\n');
            }
        }

        out.push_str("\n## DEFINITION OF DONE\n");
        out.push_str(&self.definition_of_done);

        out.push_str("\n\n## TRACE\n");
        out.push_str("traceparent: ");
        out.push_str(&self.trace.context.traceparent());
        out.push('\n');
        let baggage = self.trace.context.baggage_header();
        if !baggage.is_empty() {
            out.push_str("baggage: ");
            out.push_str(&baggage);
            out.push('\n');
        }
        out.push_str(&format!(
            "run: {} step: {} agent: {}\n",
            self.trace.run_id, self.trace.step, self.trace.agent
        ));

        out
    }
}
