//! Grader (C10, spec §4.10).
//!
//! Binary relevance grading per candidate via a grammar-constrained JSON
//! call (`{"relevance": "yes"|"no"}`), parsed defensively: any non-JSON
//! output scores 0.0 with `confidence=low` rather than failing the
//! request. Grounded on the teacher's `reranking::llm_reranker` parse-
//! with-fallback idiom, adapted to a single boolean field instead of a
//! listwise ranking.

use serde::Deserialize;

use crate::llm::{collect_text, ChatMessage, GenerationOverride, LlmBackend};
use crate::types::{GradedDoc, GradingResult, SearchResult};

const GRADING_GRAMMAR: &str = r#"root ::= "{" ws "\"relevance\"" ws ":" ws value ws "}"
value ::= "\"yes\"" | "\"no\""
ws ::= [ \t\n]*"#;

#[derive(Debug, Deserialize)]
struct RelevanceJson {
    relevance: String,
}

fn grading_prompt(question: &str, snippet: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "Du bedömer om ett textutdrag är relevant för att besvara en juridisk fråga. \
             Svara endast med JSON på formen {\"relevance\": \"yes\"} eller {\"relevance\": \"no\"}.",
        ),
        ChatMessage::user(format!("Fråga: {question}\n\nUtdrag: {snippet}")),
    ]
}

/// Grade one candidate. Returns `(relevant, score, confident)`; `confident`
/// is false when the model's output could not be parsed as JSON at all —
/// the caller uses this to mark `reason`/`aggregate_confidence` as low.
async fn grade_one(llm: &dyn LlmBackend, question: &str, doc: &SearchResult) -> (bool, f32, bool) {
    let messages = grading_prompt(question, &doc.snippet);
    let raw = match llm
        .chat_stream(&messages, Some(GenerationOverride::with_grammar(GRADING_GRAMMAR)))
        .await
    {
        Ok(mut stream) => collect_text(&mut stream).await.0,
        Err(e) => {
            tracing::warn!(doc_id = %doc.id, "grader call failed: {}", e);
            return (false, 0.0, false);
        }
    };

    match serde_json::from_str::<RelevanceJson>(raw.trim()) {
        Ok(parsed) => match parsed.relevance.as_str() {
            "yes" => (true, 1.0, true),
            "no" => (false, 0.0, true),
            _ => (false, 0.0, false),
        },
        Err(_) => (false, 0.0, false),
    }
}

/// Grade every candidate and aggregate into a [`GradingResult`]. Docs with
/// score ≥ `threshold` are kept; when all are rejected the orchestrator
/// treats this as "no support" for the evidence-level/refusal decision.
pub async fn grade_documents(
    llm: &dyn LlmBackend,
    question: &str,
    candidates: &[SearchResult],
    threshold: f32,
) -> GradingResult {
    let mut per_doc = Vec::with_capacity(candidates.len());
    let mut keep_ids = Vec::new();
    let mut confidences = Vec::new();

    for doc in candidates {
        let (relevant, score, confident) = grade_one(llm, question, doc).await;
        confidences.push(if confident { 1.0 } else { 0.0 });
        if score >= threshold {
            keep_ids.push(doc.id.clone());
        }
        per_doc.push(GradedDoc {
            doc_id: doc.id.clone(),
            relevant,
            score,
            reason: if confident {
                format!("relevance={}", if relevant { "yes" } else { "no" })
            } else {
                "unparseable grader output, defaulted to not relevant".to_string()
            },
        });
    }

    let aggregate_confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f32>() / confidences.len() as f32
    };

    GradingResult {
        per_doc,
        aggregate_confidence,
        keep_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yes_relevance() {
        let parsed: RelevanceJson = serde_json::from_str(r#"{"relevance": "yes"}"#).unwrap();
        assert_eq!(parsed.relevance, "yes");
    }

    #[test]
    fn rejects_non_json_as_unparseable() {
        let result = serde_json::from_str::<RelevanceJson>("this is not json");
        assert!(result.is_err());
    }

    #[test]
    fn aggregate_confidence_is_mean_of_parse_success() {
        let per_doc = vec![
            GradedDoc {
                doc_id: "a".into(),
                relevant: true,
                score: 1.0,
                reason: "relevance=yes".into(),
            },
            GradedDoc {
                doc_id: "b".into(),
                relevant: false,
                score: 0.0,
                reason: "unparseable grader output, defaulted to not relevant".into(),
            },
        ];
        let confidences = [1.0_f32, 0.0];
        let mean: f32 = confidences.iter().sum::<f32>() / confidences.len() as f32;
        assert_eq!(mean, 0.5);
        assert_eq!(per_doc.len(), 2);
    }
}
