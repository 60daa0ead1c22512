//! Query Expander (C4, spec §4.4).
//!
//! Calls the LLM with a strict JSON-array output grammar demanding exactly
//! `count` strings, then falls back through regex-extraction and numbered
//! line-splitting when the grammar is rejected or the model ignores it.
//! The fallback-chain shape — grammar, then regex, then line-split, never
//! bubbling a parse error up to the caller — is grounded on the teacher's
//! `reranking::llm_reranker::parse_ranking` three-tier defensive parse.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::llm::{collect_text, ChatMessage, GenerationOverride, LlmBackend};

const DEFAULT_COUNT: usize = 3;
const EXPANSION_GRAMMAR: &str = r#"root ::= "[" ws string ("," ws string)* ws "]"
string ::= "\"" [^"]* "\""
ws ::= [ \t\n]*"#;

static BRACKET_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[.*\]").expect("bracket regex is valid"));
static NUMBERED_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+\s*[.):]\s*(.+)$").expect("numbered line regex is valid"));

fn expansion_prompt(query: &str, count: usize) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Du genererar alternativa formuleringar av juridiska sökfrågor på svenska. \
             Svara endast med en JSON-array av strängar, inget annat.",
        ),
        ChatMessage::user(format!(
            "Generera exakt {count} alternativa formuleringar (parafraser eller lexikala \
             varianter) av frågan nedan. Bevara svenska diakritiska tecken. Frågan: \"{query}\""
        )),
    ]
}

/// Try a direct `serde_json::from_str` parse of a JSON string array.
fn parse_json_array(text: &str) -> Option<Vec<String>> {
    serde_json::from_str::<Vec<String>>(text.trim()).ok()
}

/// Find the first `[...]` substring and parse it as a JSON string array.
fn parse_bracket_extraction(text: &str) -> Option<Vec<String>> {
    let m = BRACKET_RE.find(text)?;
    serde_json::from_str::<Vec<String>>(m.as_str()).ok()
}

/// Parse numbered lines (`1. foo`, `1) foo`, `1: foo`) into variants.
fn parse_numbered_lines(text: &str) -> Option<Vec<String>> {
    let variants: Vec<String> = text
        .lines()
        .filter_map(|line| NUMBERED_LINE_RE.captures(line).map(|c| c[1].trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();
    if variants.is_empty() {
        None
    } else {
        Some(variants)
    }
}

fn dedup_case_insensitive(original: &str, variants: Vec<String>) -> Vec<String> {
    let original_lower = original.trim().to_lowercase();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(original_lower.clone());
    let mut out = Vec::new();
    for v in variants {
        let key = v.trim().to_lowercase();
        if key.is_empty() || key == original_lower {
            continue;
        }
        if seen.insert(key) {
            out.push(v.trim().to_string());
        }
    }
    out
}

/// Expand `query` into up to `count` additional variants. Fail-open: any
/// backend or parse failure yields an empty variant list rather than an
/// error, so the caller always has at least the original query to search.
pub async fn expand_query(llm: &dyn LlmBackend, query: &str, count: usize, use_grammar: bool) -> Vec<String> {
    let count = if count == 0 { DEFAULT_COUNT } else { count };
    let messages = expansion_prompt(query, count);

    let raw = if use_grammar {
        match llm
            .chat_stream(&messages, Some(GenerationOverride::with_grammar(EXPANSION_GRAMMAR)))
            .await
        {
            Ok(mut stream) => {
                let (text, _) = collect_text(&mut stream).await;
                Some(text)
            }
            Err(e) => {
                tracing::warn!("query expansion grammar call failed, retrying without grammar: {}", e);
                None
            }
        }
    } else {
        None
    };

    let raw = match raw {
        Some(text) => text,
        None => match llm.chat_stream(&messages, None).await {
            Ok(mut stream) => collect_text(&mut stream).await.0,
            Err(e) => {
                tracing::warn!("query expansion ungrammared retry failed: {}", e);
                return Vec::new();
            }
        },
    };

    let variants = parse_json_array(&raw)
        .or_else(|| parse_bracket_extraction(&raw))
        .or_else(|| parse_numbered_lines(&raw))
        .unwrap_or_default();

    dedup_case_insensitive(query, variants).into_iter().take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json_array() {
        let text = r#"["vad gäller vid uppsägning", "regler om uppsägningstid"]"#;
        assert_eq!(parse_json_array(text).unwrap().len(), 2);
    }

    #[test]
    fn parses_bracket_extraction_from_surrounding_text() {
        let text = "Här är varianterna:\n[\"a\", \"b\", \"c\"]\nHoppas det hjälper!";
        let parsed = parse_bracket_extraction(text).unwrap();
        assert_eq!(parsed, vec!["a", "b", "c"]);
    }

    #[test]
    fn parses_numbered_lines() {
        let text = "1. Vad gäller vid uppsägning?\n2) Regler om uppsägningstid\n3: Uppsägningstid enligt lag";
        let parsed = parse_numbered_lines(text).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[test]
    fn dedup_is_case_insensitive_and_drops_original() {
        let variants = vec!["Vad Gäller".to_string(), "vad gäller".to_string(), "Annat sätt".to_string()];
        let result = dedup_case_insensitive("vad gäller", variants);
        assert_eq!(result, vec!["Annat sätt"]);
    }

    #[test]
    fn garbage_text_yields_no_variants() {
        assert!(parse_json_array("not json at all").is_none());
        assert!(parse_bracket_extraction("no brackets here").is_none());
        assert!(parse_numbered_lines("just prose, no numbering").is_none());
    }

    #[test]
    fn preserves_swedish_diacritics() {
        let variants = vec!["Vad gäller för åtgärder?".to_string()];
        let result = dedup_case_insensitive("original", variants);
        assert_eq!(result, vec!["Vad gäller för åtgärder?"]);
    }
}
