//! Query Rewriter (C1, spec §4.1).
//!
//! Produces a standalone, entity-preserving query from the current turn plus
//! optional history: decides whether a rewrite is needed, resolves the
//! closed set of Swedish referential pronouns against the highest-priority
//! entity found in history, and derives a lexical (keyword) form for BM25.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Entity, EntityType, RewriteResult};

/// Closed set of Swedish referential pronouns that trigger a rewrite (§4.1).
const REFERENTIAL_PRONOUNS: &[&str] = &[
    "den här", "det där", "dessa", "detta", "denna", "den", "det", "ovanstående", "nämnda",
];

/// Closed dictionary of legal abbreviations recognized as entities, mapped to
/// their canonical (expanded) form for the lexical rendering.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("TF", "Tryckfrihetsförordningen"),
    ("YGL", "Yttrandefrihetsgrundlagen"),
    ("RF", "Regeringsformen"),
    ("OSL", "Offentlighets- och sekretesslagen"),
    ("FL", "Förvaltningslagen"),
    ("GDPR", "Dataskyddsförordningen"),
    ("LAS", "Lagen om anställningsskydd"),
];

/// Authority names recognized as `myndighet` entities.
const AUTHORITIES: &[&str] = &[
    "Integritetsskyddsmyndigheten",
    "IMY",
    "Datainspektionen",
    "Skatteverket",
    "Riksdagen",
    "Regeringen",
    "Justitieombudsmannen",
    "JO",
];

static SFS_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}:\d{2,}").expect("sfs number regex is valid"));
static KAPITEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[a-z]?)\s*kap\.?").expect("kapitel regex is valid"));
static PARAGRAF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[a-z]?)\s*§").expect("paragraf regex is valid"));

/// Interrogatives stripped when deriving the lexical (BM25) query form.
const INTERROGATIVES: &[&str] = &[
    "vad", "vem", "vilken", "vilket", "vilka", "var", "när", "hur", "varför", "är", "finns",
    "gäller", "kan", "får", "ska", "måste",
];

pub struct QueryRewriter;

impl QueryRewriter {
    pub fn new() -> Self {
        Self
    }

    /// Run the full rewrite pipeline: decide whether a rewrite is needed,
    /// decontextualize against history, compute must-include entities and
    /// the lexical form.
    pub fn rewrite(&self, original: &str, history: &[String]) -> RewriteResult {
        let start = std::time::Instant::now();

        let original_entities = extract_entities(original);
        let needs_rewrite = needs_rewrite(original, &original_entities);

        let mut standalone = original.to_string();
        let mut detected_entities = original_entities.clone();

        if needs_rewrite {
            let history_text = history.join(" \n ");
            let history_entities = extract_entities(&history_text);
            if let Some(target) = pick_highest_priority(&history_entities) {
                if let Some(replaced) = replace_first_pronoun(&standalone, &target.value) {
                    standalone = replaced;
                    if !detected_entities.iter().any(|e| e.value == target.value) {
                        detected_entities.push(target.clone());
                    }
                }
                // If no pronoun is present but the turn is too short to stand
                // alone (<=3 tokens, no entity), prepend the target instead.
                else if original.split_whitespace().count() <= 3 && original_entities.is_empty() {
                    standalone = format!("{} {}", target.value, original.trim());
                    if !detected_entities.iter().any(|e| e.value == target.value) {
                        detected_entities.push(target.clone());
                    }
                }
            }
            // If no entity is found in history, `standalone` is left unchanged.
        }

        let must_include: Vec<String> = detected_entities
            .iter()
            .map(|e| e.value.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let lexical = to_lexical_form(&standalone);

        RewriteResult {
            original: original.to_string(),
            standalone,
            expanded: Vec::new(),
            lexical,
            must_include,
            detected_entities,
            needs_rewrite,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// `needs_rewrite` is true when the question contains a referential pronoun,
/// or has ≤3 tokens and no detectable entity (§4.1).
fn needs_rewrite(query: &str, entities: &[Entity]) -> bool {
    if contains_referential_pronoun(query) {
        return true;
    }
    query.split_whitespace().count() <= 3 && entities.is_empty()
}

fn contains_referential_pronoun(query: &str) -> bool {
    let lower = query.to_lowercase();
    REFERENTIAL_PRONOUNS
        .iter()
        .any(|p| word_boundary_contains(&lower, p))
}

fn word_boundary_contains(haystack: &str, needle: &str) -> bool {
    let padded = format!(" {} ", haystack.trim());
    let padded_needle = format!(" {} ", needle);
    padded.contains(&padded_needle)
}

/// Extract entities from text via the SFS/kapitel/paragraf regexes plus the
/// closed abbreviation and authority dictionaries.
fn extract_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    for m in SFS_NUMBER_RE.find_iter(text) {
        entities.push(Entity {
            r#type: EntityType::Sfs,
            value: m.as_str().to_string(),
        });
    }
    for caps in KAPITEL_RE.captures_iter(text) {
        entities.push(Entity {
            r#type: EntityType::Kapitel,
            value: caps[0].to_string(),
        });
    }
    for caps in PARAGRAF_RE.captures_iter(text) {
        entities.push(Entity {
            r#type: EntityType::Paragraf,
            value: caps[0].to_string(),
        });
    }
    for (abbr, _full) in ABBREVIATIONS {
        if word_boundary_contains(text, abbr) {
            entities.push(Entity {
                r#type: EntityType::Lag,
                value: (*abbr).to_string(),
            });
        }
    }
    for authority in AUTHORITIES {
        if text.contains(authority) {
            entities.push(Entity {
                r#type: EntityType::Myndighet,
                value: (*authority).to_string(),
            });
        }
    }

    entities.dedup_by(|a, b| a.value == b.value);
    entities
}

/// Pick the entity with the highest resolution priority (`lag` > `myndighet`
/// > others), preferring the first occurrence on ties.
fn pick_highest_priority(entities: &[Entity]) -> Option<&Entity> {
    entities.iter().max_by_key(|e| e.r#type.priority())
}

/// Replace the first referential pronoun occurrence with `replacement`,
/// preserving surrounding text. Returns `None` if no pronoun is present.
fn replace_first_pronoun(text: &str, replacement: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    for pattern in REFERENTIAL_PRONOUNS {
        let padded_pattern = format!(" {} ", pattern);
        let padded = format!(" {} ", lower);
        if let Some(pos) = padded.find(&padded_pattern) {
            // Position relative to the unpadded string (pos counts the
            // leading space we added).
            let real_pos = pos.saturating_sub(1);
            if best.map(|(p, _)| real_pos < p).unwrap_or(true) {
                best = Some((real_pos, pattern));
            }
        }
    }
    best.map(|(pos, pattern)| {
        let end = (pos + pattern.len()).min(text.len());
        let mut out = String::with_capacity(text.len() + replacement.len());
        out.push_str(&text[..pos.min(text.len())]);
        out.push_str(replacement);
        out.push_str(&text[end..]);
        out
    })
}

/// Strip interrogatives, expand abbreviations, lowercase-fold preserving åäö.
fn to_lexical_form(query: &str) -> String {
    let mut expanded = query.to_string();
    for (abbr, full) in ABBREVIATIONS {
        if word_boundary_contains(&expanded, abbr) {
            expanded = expanded.replace(abbr, full);
        }
    }

    let folded = expanded.to_lowercase();
    let keywords: Vec<&str> = folded
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != 'å' && c != 'ä' && c != 'ö'))
        .filter(|w| !w.is_empty() && !INTERROGATIVES.contains(w))
        .collect();

    keywords.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_query_without_entity_needs_rewrite() {
        let rw = QueryRewriter::new();
        let result = rw.rewrite("vad gäller", &[]);
        assert!(result.needs_rewrite);
    }

    #[test]
    fn referential_pronoun_triggers_rewrite() {
        let rw = QueryRewriter::new();
        let result = rw.rewrite("vad säger den om detta?", &[]);
        assert!(result.needs_rewrite);
    }

    #[test]
    fn explicit_entity_query_does_not_need_rewrite() {
        let rw = QueryRewriter::new();
        let result = rw.rewrite("vad gäller enligt 2018:218 om samtycke?", &[]);
        assert!(!result.needs_rewrite);
    }

    #[test]
    fn decontextualizes_using_highest_priority_history_entity() {
        let rw = QueryRewriter::new();
        let history = vec!["user: vad säger GDPR om samtycke".to_string()];
        let result = rw.rewrite("vad gäller det om barn?", &history);
        assert!(result.needs_rewrite);
        assert!(result.standalone.contains("GDPR"));
        assert!(result.must_include.iter().any(|m| m == "GDPR"));
    }

    #[test]
    fn lag_outranks_myndighet_when_both_present_in_history() {
        let rw = QueryRewriter::new();
        let history =
            vec!["user: Integritetsskyddsmyndigheten tillämpar GDPR i sina beslut".to_string()];
        let result = rw.rewrite("vad säger det om detta?", &history);
        assert!(result.standalone.contains("GDPR"));
    }

    #[test]
    fn no_history_entity_leaves_query_unchanged() {
        let rw = QueryRewriter::new();
        let result = rw.rewrite("vad gäller det?", &["user: hej".to_string()]);
        assert_eq!(result.standalone, "vad gäller det?");
    }

    #[test]
    fn lexical_form_strips_interrogatives_and_expands_abbreviations() {
        let lexical = to_lexical_form("Vad säger GDPR om samtycke?");
        assert!(lexical.contains("dataskyddsförordningen"));
        assert!(!lexical.contains("vad"));
        assert!(lexical.contains("samtycke"));
    }

    #[test]
    fn lexical_form_preserves_diacritics() {
        let lexical = to_lexical_form("Hur regleras åäö-tecken i lagen?");
        assert!(lexical.contains("åäö-tecken") || lexical.contains("åäö"));
    }

    #[test]
    fn must_include_collects_entities_from_original_and_decontextualization() {
        let rw = QueryRewriter::new();
        let history = vec!["user: vad säger RF om yttrandefrihet".to_string()];
        let result = rw.rewrite("hur tillämpas 3 kap. på det?", &history);
        assert!(result.must_include.iter().any(|m| m == "RF"));
        assert!(result.must_include.iter().any(|m| m.contains("kap")));
    }
}
