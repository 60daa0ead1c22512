//! Core data model (§3): the request/response envelope and the value types
//! that flow between pipeline stages. Mutation is limited to the two fields
//! the spec calls out explicitly: `SearchResult.score` (rewritten by fusion
//! and reranking) and metrics (append-only).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Response mode requested by the caller, or negotiated by the classifier
/// when `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Auto,
    Chat,
    Assist,
    Evidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// The immutable per-request query envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub question: String,
    #[serde(default)]
    pub mode: ResponseMode,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub filter: Option<HashMap<String, String>>,
}

fn default_k() -> usize {
    10
}

impl Default for ResponseMode {
    fn default() -> Self {
        ResponseMode::Auto
    }
}

/// Sum type over the kinds of legal citation a free-text answer may contain
/// (§3, §4.12).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LegalReference {
    Sfs {
        raw_match: String,
        target_sfs: Option<String>,
        display: String,
    },
    Section {
        raw_match: String,
        target_chapter: Option<String>,
        target_section: Option<String>,
        display: String,
    },
    Proposition {
        raw_match: String,
        display: String,
    },
    Sou {
        raw_match: String,
        display: String,
    },
    Ds {
        raw_match: String,
        display: String,
    },
    Betankande {
        raw_match: String,
        display: String,
    },
    Nja {
        raw_match: String,
        display: String,
    },
    Hfd {
        raw_match: String,
        display: String,
    },
    Eu {
        raw_match: String,
        display: String,
    },
}

impl LegalReference {
    pub fn raw_match(&self) -> &str {
        match self {
            Self::Sfs { raw_match, .. }
            | Self::Section { raw_match, .. }
            | Self::Proposition { raw_match, .. }
            | Self::Sou { raw_match, .. }
            | Self::Ds { raw_match, .. }
            | Self::Betankande { raw_match, .. }
            | Self::Nja { raw_match, .. }
            | Self::Hfd { raw_match, .. }
            | Self::Eu { raw_match, .. } => raw_match,
        }
    }

    /// The discriminant used for the `(ref_type, raw_match)` dedup key (§4.12).
    pub fn ref_type(&self) -> &'static str {
        match self {
            Self::Sfs { .. } => "sfs",
            Self::Section { .. } => "section",
            Self::Proposition { .. } => "proposition",
            Self::Sou { .. } => "sou",
            Self::Ds { .. } => "ds",
            Self::Betankande { .. } => "betankande",
            Self::Nja { .. } => "nja",
            Self::Hfd { .. } => "hfd",
            Self::Eu { .. } => "eu",
        }
    }

    pub fn display(&self) -> &str {
        match self {
            Self::Sfs { display, .. }
            | Self::Section { display, .. }
            | Self::Proposition { display, .. }
            | Self::Sou { display, .. }
            | Self::Ds { display, .. }
            | Self::Betankande { display, .. }
            | Self::Nja { display, .. }
            | Self::Hfd { display, .. }
            | Self::Eu { display, .. } => display,
        }
    }
}

/// Entity extracted from the question (§3), driving must-include guarantees
/// and pronoun resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub r#type: EntityType,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Sfs,
    Kapitel,
    Paragraf,
    Lag,
    Myndighet,
}

impl EntityType {
    /// Resolution priority used when picking the pronoun-replacement target
    /// (§4.1: "`lag` > `myndighet` > others").
    pub fn priority(&self) -> u8 {
        match self {
            EntityType::Lag => 3,
            EntityType::Myndighet => 2,
            EntityType::Sfs | EntityType::Kapitel | EntityType::Paragraf => 1,
        }
    }
}

/// Output of the query rewriter (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteResult {
    pub original: String,
    pub standalone: String,
    pub expanded: Vec<String>,
    pub lexical: String,
    pub must_include: Vec<String>,
    pub detected_entities: Vec<Entity>,
    pub needs_rewrite: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverTag {
    Dense,
    Bm25,
    Fused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Primary,
    Support,
    Secondary,
}

/// SFS-specific structural metadata (§3). Non-SFS sources leave these unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SfsMetadata {
    pub sfs_nummer: Option<String>,
    pub kortnamn: Option<String>,
    pub kapitel: Option<String>,
    pub kapitel_rubrik: Option<String>,
    pub paragraf: Option<String>,
    pub stycke_count: Option<u32>,
    pub punkt_count: Option<u32>,
    pub cross_refs: Vec<String>,
    pub amendment_ref: Option<String>,
    pub parent_chapter_id: Option<String>,
    pub prev_paragraf_id: Option<String>,
    pub next_paragraf_id: Option<String>,
    pub content_hash: Option<String>,
}

/// Document / SearchResult (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub score: f32,
    pub source_collection: String,
    pub doc_type: String,
    pub retriever_tag: RetrieverTag,
    pub tier: Tier,
    pub metadata: SfsMetadata,
    /// Escape hatch for non-SFS per-source fields that don't warrant a typed
    /// slot (mirrors the teacher's `metadata_json` side channel).
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Parses a SearchResult.id of the ChunkId grammar in §3:
/// `sfs_<year>_<num>_<kap?><letter?>kap_<par>§_<12-hex-hash>` and derives the
/// deterministic parent id: `<year>:<num>_<kap?><letter?>_kap` when a kapitel
/// is present, else `<year>:<num>_root`.
pub fn chunk_id_to_parent_id(chunk_id: &str) -> Option<String> {
    let rest = chunk_id.strip_prefix("sfs_")?;
    let mut parts = rest.splitn(3, '_');
    let year = parts.next()?;
    let num = parts.next()?;
    let tail = parts.next().unwrap_or("");

    if year.is_empty() || num.is_empty() {
        return None;
    }

    // tail looks like "<kap><letter>kap_<par>§_<hash>" or just "<hash>" for
    // law-level (no kapitel) chunks.
    if let Some(kap_end) = tail.find("kap_") {
        let kap = &tail[..kap_end];
        if kap.is_empty() {
            return None;
        }
        Some(format!("{}:{}_{}_kap", year, num, kap))
    } else {
        Some(format!("{}:{}_root", year, num))
    }
}

/// Resolved kapitel-level parent context (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentContext {
    pub parent_id: String,
    pub sfs_nummer: String,
    pub law_name: String,
    pub kortnamn: Option<String>,
    pub kapitel: Option<String>,
    pub kapitel_rubrik: Option<String>,
    pub full_text: String,
    pub child_count: u32,
    pub references: Vec<String>,
}

/// Routing configuration resolved for a request (§3, §4.3). Fixed per
/// intent; never constructed ad hoc outside [`crate::rag::routing`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    pub primary: Vec<String>,
    pub support: Vec<String>,
    pub secondary: Vec<String>,
    pub secondary_budget: usize,
    pub require_separation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradedDoc {
    pub doc_id: String,
    pub relevant: bool,
    pub score: f32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub per_doc: Vec<GradedDoc>,
    pub aggregate_confidence: f32,
    pub keep_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceLevel {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvidenceLevel::None => "NONE",
            EvidenceLevel::Low => "LOW",
            EvidenceLevel::Medium => "MEDIUM",
            EvidenceLevel::High => "HIGH",
        };
        write!(f, "{}", s)
    }
}

/// A correction applied by the outdated-term guardrail stage (§4.13.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermCorrection {
    pub original_term: String,
    pub corrected_term: String,
    pub confidence: f32,
}

/// Discriminated stream event (§3, §4.15). Serializes with a `type` tag so
/// the wire shape matches the SSE contract in §6 exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata {
        mode: String,
        sources: Vec<SearchResult>,
        evidence_level: String,
        refusal: bool,
    },
    Phase {
        stage: String,
    },
    Decontextualized {
        rewritten: String,
    },
    Token {
        text: String,
    },
    Corrections {
        corrections: Vec<TermCorrection>,
        corrected_text: String,
    },
    Done {
        total_tokens: u64,
        latency_ms: u64,
    },
    Error {
        kind: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_id_with_kapitel() {
        assert_eq!(
            chunk_id_to_parent_id("sfs_1974_152_2akap_1§_abc123def456"),
            Some("1974:152_2a_kap".to_string())
        );
    }

    #[test]
    fn parent_id_without_kapitel() {
        assert_eq!(
            chunk_id_to_parent_id("sfs_1974_152_abc123def456"),
            Some("1974:152_root".to_string())
        );
    }

    #[test]
    fn parent_id_rejects_non_sfs() {
        assert_eq!(chunk_id_to_parent_id("riksdag_doc_42"), None);
    }

    #[test]
    fn entity_priority_prefers_lag_over_myndighet() {
        assert!(EntityType::Lag.priority() > EntityType::Myndighet.priority());
        assert!(EntityType::Myndighet.priority() > EntityType::Sfs.priority());
    }

    #[test]
    fn evidence_level_orders_monotonically() {
        assert!(EvidenceLevel::High > EvidenceLevel::Medium);
        assert!(EvidenceLevel::Medium > EvidenceLevel::Low);
        assert!(EvidenceLevel::Low > EvidenceLevel::None);
    }
}
