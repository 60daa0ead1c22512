//! Intent Classifier (C2).
//!
//! Rule stage grounded on the teacher's `rag/retrieval_decision.rs` shape
//! (an ordered battery of pattern checks producing a closed enum) but
//! retargeted at the fixed Swedish-legal taxonomy of spec.md §4.2. The
//! teacher's analyzer never falls through to an LLM; ours keeps that
//! property and adds the explicit `UNKNOWN` fallback.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryIntent {
    LegalText,
    ParliamentTrace,
    PolicyArguments,
    ResearchSynthesis,
    PracticalProcess,
    EdgeAbbreviation,
    EdgeClarification,
    Smalltalk,
    Unknown,
}

static SFS_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}:\d{2,}").expect("sfs number regex is valid"));
static SECTION_MARK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[a-z]?)\s*(kap\.?|§)").expect("section mark regex is valid"));

static PARLIAMENT_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(proposition|motion|utskott(et)?|riksdagen|betänkande)\b")
        .expect("parliament words regex is valid")
});
static RESEARCH_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(forskning(en)?|studie(r)?|avhandling(en)?)\b")
        .expect("research words regex is valid")
});
static POLICY_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(argument(en)?|för\s+och\s+emot|debatt(en)?|kritik(en)?)\b")
        .expect("policy words regex is valid")
});
static PROCESS_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(hur\s+(ansöker|anmäler|överklagar)|blankett(en)?|process(en)?|ansökan)\b")
        .expect("process words regex is valid")
});
static ABBREVIATION_ONLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(tf|ygl|rf|osl|fl|gdpr|las)\s*\??\s*$").expect("abbreviation regex is valid")
});
static GREETING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(hej|hallå|tjena|god\s*(morgon|dag|kväll)|tack|hejdå)\s*[!.]?\s*$")
        .expect("greeting regex is valid")
});

/// Classify a rewritten (standalone) query into the fixed intent taxonomy.
pub fn classify(standalone_query: &str) -> QueryIntent {
    let trimmed = standalone_query.trim();

    if GREETING_RE.is_match(trimmed) {
        return QueryIntent::Smalltalk;
    }

    if ABBREVIATION_ONLY_RE.is_match(trimmed) {
        return QueryIntent::EdgeAbbreviation;
    }

    if SFS_NUMBER_RE.is_match(trimmed) || SECTION_MARK_RE.is_match(trimmed) {
        return QueryIntent::LegalText;
    }

    if PARLIAMENT_WORDS.is_match(trimmed) {
        return QueryIntent::ParliamentTrace;
    }

    if POLICY_WORDS.is_match(trimmed) {
        return QueryIntent::PolicyArguments;
    }

    if RESEARCH_WORDS.is_match(trimmed) {
        return QueryIntent::ResearchSynthesis;
    }

    if PROCESS_WORDS.is_match(trimmed) {
        return QueryIntent::PracticalProcess;
    }

    let token_count = trimmed.split_whitespace().count();
    if token_count == 0 {
        return QueryIntent::EdgeClarification;
    }

    QueryIntent::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sfs_number_is_legal_text() {
        assert_eq!(classify("1974:152 2 kap. 1 §"), QueryIntent::LegalText);
    }

    #[test]
    fn proposition_is_parliament_trace() {
        assert_eq!(
            classify("Vad säger propositionen om detta?"),
            QueryIntent::ParliamentTrace
        );
    }

    #[test]
    fn research_words_trigger_research_synthesis() {
        assert_eq!(
            classify("Finns det någon forskning om detta?"),
            QueryIntent::ResearchSynthesis
        );
    }

    #[test]
    fn greeting_is_smalltalk() {
        assert_eq!(classify("Hej!"), QueryIntent::Smalltalk);
    }

    #[test]
    fn unclassifiable_falls_to_unknown() {
        assert_eq!(
            classify("Berätta mer om detta ämne i detalj"),
            QueryIntent::Unknown
        );
    }

    #[test]
    fn bare_abbreviation_is_edge_case() {
        assert_eq!(classify("GDPR?"), QueryIntent::EdgeAbbreviation);
    }
}
