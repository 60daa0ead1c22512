//! Streaming Orchestrator (C15, spec §4.15).
//!
//! Drives the full pipeline for one request and emits [`StreamEvent`]s onto
//! a bounded channel, mirroring the teacher's `llm::streaming::TokenStream`
//! (`mpsc::Receiver` wrapped as a `futures::Stream`) but carrying typed
//! pipeline events instead of raw text deltas. The state machine is
//! `INIT -> SAFETY -> CLASSIFY -> (CHAT_GEN | REWRITE -> EXPAND -> RETRIEVE
//! -> FUSE -> RERANK -> GRADE -> EXPAND_PARENTS -> COMPOSE -> GEN) -> POST
//! -> DONE`, with `ERROR` reachable from any state.

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::embeddings::EmbeddingModel;
use crate::llm::{ChatMessage, LlmBackend};
use crate::metrics::{RequestMetrics, StageTimer};
use crate::rag::{grader, guardrail, intent, prompt, query_expander, query_rewriter::QueryRewriter, reference_extractor, routing};
use crate::reranking::cross_encoder::{self, CrossEncoderReranker};
use crate::search::{hybrid, TextSearch};
use crate::storage::{dense_retrieve, DenseLeg, ParentStore, VectorStore};
use crate::types::{
    chunk_id_to_parent_id, HistoryTurn, ParentContext, QueryEnvelope, ResponseMode, RetrieverTag,
    SearchResult, StreamEvent, Tier,
};

const EXPANSION_TIMEOUT: Duration = Duration::from_secs(1);
const RETRIEVAL_TIMEOUT: Duration = Duration::from_secs(3);
const RERANK_TIMEOUT: Duration = Duration::from_secs(2);
const GRADE_TIMEOUT: Duration = Duration::from_secs(2);
const PARENT_EXPAND_TIMEOUT: Duration = Duration::from_secs(1);

const GRADING_THRESHOLD: f32 = 0.5;

/// Process-singleton collaborators the orchestrator drives. Cheap to clone
/// (every field is an `Arc` or plain config), so one instance is built at
/// startup and handed to every request.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub config: AppConfig,
    pub vector_store: Arc<dyn VectorStore>,
    pub text_search: Option<Arc<TextSearch>>,
    pub parent_store: Option<Arc<ParentStore>>,
    pub embedder: Arc<dyn EmbeddingModel>,
    pub reranker: Option<Arc<CrossEncoderReranker>>,
    pub llm: Arc<dyn LlmBackend>,
}

/// Channel-backed stream of [`StreamEvent`]s for one request, consumed by
/// the HTTP layer's SSE writer.
pub struct EventStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    /// Run the pipeline for `envelope`, returning immediately with a stream
    /// of events; the pipeline itself runs on a spawned task so the caller
    /// never blocks waiting for the first event.
    pub fn run(&self, envelope: QueryEnvelope, request_id: String, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(64);
        let deps = self.deps.clone();
        tokio::spawn(async move {
            run_pipeline(deps, envelope, request_id, cancel, tx).await;
        });
        EventStream { receiver: rx }
    }
}

fn history_as_lines(history: &[HistoryTurn]) -> Vec<String> {
    history.iter().map(|h| format!("{}: {}", h.role, h.content)).collect()
}

fn history_as_messages(history: &[HistoryTurn]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|h| match h.role.as_str() {
            "assistant" => ChatMessage::assistant(h.content.clone()),
            _ => ChatMessage::user(h.content.clone()),
        })
        .collect()
}

fn resolve_mode(requested: ResponseMode, intent: intent::QueryIntent) -> ResponseMode {
    if requested != ResponseMode::Auto {
        return requested;
    }
    match intent {
        intent::QueryIntent::Smalltalk | intent::QueryIntent::EdgeClarification => ResponseMode::Chat,
        _ => ResponseMode::Assist,
    }
}

fn build_filter_predicate(filter: &Option<HashMap<String, String>>) -> Option<String> {
    let filter = filter.as_ref()?;
    if filter.is_empty() {
        return None;
    }
    let clauses: Vec<String> = filter
        .iter()
        .map(|(k, v)| format!("{k} = '{}'", v.replace('\'', "''")))
        .collect();
    Some(clauses.join(" AND "))
}

/// Cutover enforcement (§5): a routed collection name that is not one of
/// the process's configured canonical collections, and not explicitly
/// allow-listed, is a violation when enforcement is enabled.
fn check_cutover(routing: &crate::types::RoutingConfig, config: &AppConfig) -> (bool, Vec<String>) {
    if !config.cutover_enforce {
        return (false, Vec::new());
    }
    let canonical = [
        &config.default_collections.sfs,
        &config.default_collections.diva,
        &config.default_collections.riksdag,
        &config.default_collections.gov,
        &config.default_collections.guides,
    ];
    let mut offending = Vec::new();
    for collection in routing.primary.iter().chain(&routing.support).chain(&routing.secondary) {
        let is_canonical = canonical.iter().any(|c| *c == collection);
        let is_allowed = config.cutover_allowed_fallback_collections.contains(collection);
        if !is_canonical && !is_allowed {
            offending.push(collection.clone());
        }
    }
    (!offending.is_empty(), offending)
}

fn pick_best_single_set(sets: &[Vec<(String, f32)>]) -> Vec<(String, f32)> {
    sets.iter()
        .filter(|s| !s.is_empty())
        .max_by(|a, b| a[0].1.partial_cmp(&b[0].1).unwrap_or(CmpOrdering::Equal))
        .cloned()
        .unwrap_or_default()
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

async fn run_pipeline(
    deps: OrchestratorDeps,
    envelope: QueryEnvelope,
    request_id: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
) {
    let start = Instant::now();
    let mut metrics = RequestMetrics::new(request_id.clone());

    // SAFETY — mandatory, may terminate before any streaming begins (§7).
    if let Err(e) = guardrail::check_query_safety(&envelope.question) {
        tracing::warn!(request_id = %request_id, "query safety violation: {}", e);
        send(&tx, StreamEvent::Error { kind: e.kind().to_string(), message: e.to_string() }).await;
        return;
    }
    send(&tx, StreamEvent::Phase { stage: "SAFETY".to_string() }).await;

    // REWRITE (C1) — always run; `needs_rewrite` decides whether the
    // standalone form actually differs from the original.
    send(&tx, StreamEvent::Phase { stage: "REWRITE".to_string() }).await;
    let timer = StageTimer::start("rewrite");
    let rewriter = QueryRewriter::new();
    let history_lines = history_as_lines(&envelope.history);
    let rewrite = rewriter.rewrite(&envelope.question, &history_lines);
    timer.finish(&mut metrics, true);
    if rewrite.needs_rewrite && rewrite.standalone != rewrite.original {
        send(&tx, StreamEvent::Decontextualized { rewritten: rewrite.standalone.clone() }).await;
    }

    // CLASSIFY — mandatory, may also terminate before streaming in
    // principle, though the rule-based classifier here cannot fail.
    send(&tx, StreamEvent::Phase { stage: "CLASSIFY".to_string() }).await;
    let timer = StageTimer::start("classify");
    let query_intent = intent::classify(&rewrite.standalone);
    let mode = resolve_mode(envelope.mode, query_intent);
    timer.finish(&mut metrics, true);

    if mode == ResponseMode::Chat {
        run_chat(&deps, &envelope, &rewrite.standalone, &mut metrics, &cancel, &tx, start).await;
        return;
    }

    // ROUTE (C3) + cutover check.
    let routing_config = routing::route(query_intent, &deps.config.default_collections);
    let (violated, offending) = check_cutover(&routing_config, &deps.config);
    if violated {
        metrics.cutover_violation = true;
        metrics.cutover_offending_collections = offending.clone();
        tracing::warn!(request_id = %request_id, ?offending, "cutover violation");
        send(
            &tx,
            StreamEvent::Error {
                kind: "cutover_violation".to_string(),
                message: format!("query resolved against legacy collections: {offending:?}"),
            },
        )
        .await;
        return;
    }

    // EXPAND (C4) — optional variant generation, soft-timeout bounded.
    send(&tx, StreamEvent::Phase { stage: "EXPAND".to_string() }).await;
    let expand_timer = StageTimer::start("expand");
    let variants = match timeout(
        EXPANSION_TIMEOUT,
        query_expander::expand_query(deps.llm.as_ref(), &rewrite.standalone, 3, deps.config.query_expansion_use_grammar),
    )
    .await
    {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(request_id = %request_id, "query expansion timed out, continuing without variants");
            Vec::new()
        }
    };
    let guarded_variants: Vec<String> = variants
        .into_iter()
        .filter(|v| {
            let entities_ok = rewrite
                .must_include
                .iter()
                .all(|e| v.contains(e.as_str()) || rewrite.original.contains(e.as_str()));
            entities_ok
        })
        .collect();

    let mut all_variants = vec![rewrite.standalone.clone()];
    all_variants.extend(guarded_variants);
    expand_timer.finish(&mut metrics, true);

    // RETRIEVE (C6 + C7) — concurrent dense fan-out plus one BM25 leg.
    send(&tx, StreamEvent::Phase { stage: "RETRIEVE".to_string() }).await;
    let retrieve_timer = StageTimer::start("retrieve");
    let filter_predicate = build_filter_predicate(&envelope.filter);

    let mut legs = Vec::new();
    for variant in &all_variants {
        let embedding = match deps.embedder.embed_query(variant) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(request_id = %request_id, "embedding failed for variant: {}", e);
                continue;
            }
        };
        for collection in &routing_config.primary {
            legs.push(DenseLeg { variant_label: variant.clone(), embedding: embedding.clone(), collection: collection.clone(), tier: Tier::Primary });
        }
        for collection in &routing_config.support {
            legs.push(DenseLeg { variant_label: variant.clone(), embedding: embedding.clone(), collection: collection.clone(), tier: Tier::Support });
        }
        for collection in &routing_config.secondary {
            legs.push(DenseLeg { variant_label: variant.clone(), embedding: embedding.clone(), collection: collection.clone(), tier: Tier::Secondary });
        }
    }

    let dense_outcome = match timeout(
        RETRIEVAL_TIMEOUT,
        dense_retrieve(deps.vector_store.as_ref(), legs, envelope.k.max(10), filter_predicate.as_deref(), deps.config.fanout_concurrency),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(request_id = %request_id, "dense retrieval timed out, proceeding with partial results");
            Default::default()
        }
    };
    for failed_leg in &dense_outcome.leg_failures {
        metrics.record_leg_failure(failed_leg.clone());
    }

    let mut results_by_id = dense_outcome.results_by_id;
    let mut dense_sets: Vec<Vec<(String, f32)>> = dense_outcome.per_variant_ranked.into_iter().map(|(_, ranked)| ranked).collect();

    let bm25_results: Vec<(String, f32)> = if let Some(text_search) = &deps.text_search {
        let source_filter = envelope.filter.as_ref().and_then(|f| f.get("source")).map(String::as_str);
        match text_search.search_filtered(&rewrite.lexical, envelope.k.max(10), source_filter) {
            Ok(hits) => {
                for (id, score) in &hits {
                    results_by_id.entry(id.clone()).or_insert_with(|| SearchResult {
                        id: id.clone(),
                        title: id.clone(),
                        snippet: text_search.get_text_by_id(id).ok().flatten().unwrap_or_default(),
                        score: *score,
                        source_collection: "bm25".to_string(),
                        doc_type: "unknown".to_string(),
                        retriever_tag: RetrieverTag::Bm25,
                        tier: Tier::Primary,
                        metadata: Default::default(),
                        extra: HashMap::new(),
                    });
                }
                hits
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, "bm25 search failed: {}", e);
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    retrieve_timer.finish(&mut metrics, true);

    // FUSE (C8).
    send(&tx, StreamEvent::Phase { stage: "FUSE".to_string() }).await;
    let fuse_timer = StageTimer::start("fuse");
    let fused = hybrid::hybrid_rrf(&dense_sets, &bm25_results, deps.config.rrf_k, deps.config.rrf_bm25_weight);
    let fused_ids: Vec<String> = fused.iter().map(|d| d.id.clone()).collect();
    dense_sets.push(bm25_results.clone());
    let fusion_stats = hybrid::fusion_metrics(&dense_sets, &fused_ids);
    metrics.fusion_overlap_count = fusion_stats.overlap_count;
    metrics.fusion_unique_before = fusion_stats.unique_docs_before;
    metrics.fusion_unique_after = fusion_stats.unique_docs_after;
    metrics.fusion_gain = fusion_stats.fusion_gain;
    metrics.fusion_fell_back = fusion_stats.should_fall_back;

    let ranked_ids: Vec<(String, f32, bool)> = if fusion_stats.should_fall_back {
        pick_best_single_set(&dense_sets).into_iter().map(|(id, score)| (id, score, false)).collect()
    } else {
        fused.into_iter().map(|d| (d.id, d.score, d.found_by_bm25)).collect()
    };

    let mut candidates: Vec<SearchResult> = Vec::with_capacity(ranked_ids.len());
    for (id, score, found_by_bm25) in ranked_ids {
        if let Some(mut result) = results_by_id.get(&id).cloned() {
            result.score = score;
            if !fusion_stats.should_fall_back {
                result.retriever_tag = if found_by_bm25 && result.retriever_tag == RetrieverTag::Dense {
                    RetrieverTag::Fused
                } else {
                    result.retriever_tag
                };
            }
            candidates.push(result);
        }
    }

    // Tier separation + secondary budget (§4.3): primary/support first,
    // secondary last and capped. Resolves the open question on
    // `require_separation` as "ordering, not exclusion": secondary results
    // are visually delimited by always trailing the primary/support block.
    let (mut head, mut tail): (Vec<SearchResult>, Vec<SearchResult>) =
        candidates.into_iter().partition(|r| r.tier != Tier::Secondary);
    tail.truncate(routing_config.secondary_budget);
    head.extend(tail);
    let candidates = head;
    fuse_timer.finish(&mut metrics, true);

    // RERANK (C9).
    send(&tx, StreamEvent::Phase { stage: "RERANK".to_string() }).await;
    let rerank_timer = StageTimer::start("rerank");
    let candidates = if deps.config.reranking_enabled && cross_encoder::should_rerank(mode, candidates.len()) {
        if let Some(reranker) = &deps.reranker {
            let pairs: Vec<(String, String)> = candidates.iter().map(|c| (c.id.clone(), c.snippet.clone())).collect();
            let reranker = reranker.clone();
            let standalone = rewrite.standalone.clone();
            let top_n = deps.config.reranking_top_n;
            let rerank_result = timeout(
                RERANK_TIMEOUT,
                tokio::task::spawn_blocking(move || reranker.rerank(&standalone, &pairs, pairs.len().max(top_n))),
            )
            .await;
            match rerank_result {
                Ok(Ok(Ok(scored))) => {
                    let policy_kept = cross_encoder::apply_policy(scored, deps.config.reranking_score_threshold, top_n);
                    let score_map: HashMap<String, f32> = policy_kept.into_iter().collect();
                    let mut reranked: Vec<SearchResult> = candidates
                        .into_iter()
                        .filter_map(|mut c| {
                            score_map.get(&c.id).map(|s| {
                                c.score = *s;
                                c
                            })
                        })
                        .collect();
                    reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(CmpOrdering::Equal));
                    reranked
                }
                _ => {
                    tracing::warn!(request_id = %request_id, "reranking failed or timed out, keeping fused order");
                    candidates
                }
            }
        } else {
            candidates
        }
    } else {
        candidates
    };
    rerank_timer.finish(&mut metrics, true);

    // GRADE (C10).
    send(&tx, StreamEvent::Phase { stage: "GRADE".to_string() }).await;
    let grade_timer = StageTimer::start("grade");
    let grading = match timeout(
        GRADE_TIMEOUT,
        grader::grade_documents(deps.llm.as_ref(), &rewrite.standalone, &candidates, GRADING_THRESHOLD),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(request_id = %request_id, "grading timed out, keeping all candidates");
            crate::types::GradingResult {
                per_doc: Vec::new(),
                aggregate_confidence: 0.0,
                keep_ids: candidates.iter().map(|c| c.id.clone()).collect(),
            }
        }
    };
    let keep_set: std::collections::HashSet<&str> = grading.keep_ids.iter().map(String::as_str).collect();
    let kept: Vec<SearchResult> = candidates.into_iter().filter(|c| keep_set.contains(c.id.as_str())).collect();
    grade_timer.finish(&mut metrics, true);

    // EXPAND_PARENTS (C11) — SFS-only; non-SFS results are an identity (P9).
    send(&tx, StreamEvent::Phase { stage: "EXPAND_PARENTS".to_string() }).await;
    let parent_timer = StageTimer::start("expand_parents");
    let parents: Vec<ParentContext> = if let Some(parent_store) = &deps.parent_store {
        let sfs_child_ids: Vec<String> = kept.iter().filter(|r| r.doc_type == "sfs").map(|r| r.id.clone()).collect();
        if sfs_child_ids.is_empty() {
            Vec::new()
        } else {
            let parent_store = parent_store.clone();
            let ids_for_resolve = sfs_child_ids.clone();
            let resolve_result = timeout(PARENT_EXPAND_TIMEOUT, tokio::task::spawn_blocking(move || parent_store.resolve_parents(&ids_for_resolve))).await;
            match resolve_result {
                Ok(Ok(found)) if !found.is_empty() => found,
                _ => {
                    let reconstructed: Vec<String> = sfs_child_ids.iter().filter_map(|id| chunk_id_to_parent_id(id)).collect();
                    if reconstructed.is_empty() {
                        Vec::new()
                    } else {
                        let parent_store = deps.parent_store.clone().expect("checked Some above");
                        timeout(PARENT_EXPAND_TIMEOUT, tokio::task::spawn_blocking(move || parent_store.get_parents_by_ids(&reconstructed)))
                            .await
                            .ok()
                            .and_then(|r| r.ok())
                            .unwrap_or_default()
                    }
                }
            }
        }
    } else {
        Vec::new()
    };
    parent_timer.finish(&mut metrics, true);

    // GUARDRAIL evidence classification + refusal decision.
    let evidence_level = guardrail::classify_evidence_level(&kept);
    let refusal = mode == ResponseMode::Evidence && evidence_level == crate::types::EvidenceLevel::None;

    let sent = send(
        &tx,
        StreamEvent::Metadata {
            mode: mode_label(mode).to_string(),
            sources: kept.clone(),
            evidence_level: evidence_level.to_string(),
            refusal,
        },
    )
    .await;
    if !sent {
        return;
    }

    if refusal {
        send(&tx, StreamEvent::Token { text: deps.config.evidence_refusal_template.clone() }).await;
        metrics.total_tokens = 1;
        send(&tx, StreamEvent::Done { total_tokens: 1, latency_ms: start.elapsed().as_millis() as u64 }).await;
        return;
    }

    // COMPOSE (C14).
    send(&tx, StreamEvent::Phase { stage: "COMPOSE".to_string() }).await;
    let compose_timer = StageTimer::start("compose");
    let context_block = prompt::render_context_block(&kept, &parents);
    let system_prompt = prompt::compose_system_prompt(mode, &context_block, mode == ResponseMode::Evidence);
    compose_timer.finish(&mut metrics, true);

    // GEN.
    send(&tx, StreamEvent::Phase { stage: "GEN".to_string() }).await;
    let mut messages = vec![ChatMessage::system(system_prompt)];
    messages.extend(history_as_messages(&envelope.history));
    messages.push(ChatMessage::user(rewrite.standalone.clone()));

    stream_generation(&deps, messages, mode, kept.len(), &mut metrics, &cancel, &tx, start).await;
}

fn mode_label(mode: ResponseMode) -> &'static str {
    match mode {
        ResponseMode::Auto => "auto",
        ResponseMode::Chat => "chat",
        ResponseMode::Assist => "assist",
        ResponseMode::Evidence => "evidence",
    }
}

async fn run_chat(
    deps: &OrchestratorDeps,
    envelope: &QueryEnvelope,
    standalone: &str,
    metrics: &mut RequestMetrics,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StreamEvent>,
    start: Instant,
) {
    let sent = send(
        tx,
        StreamEvent::Metadata {
            mode: "chat".to_string(),
            sources: Vec::new(),
            evidence_level: crate::types::EvidenceLevel::None.to_string(),
            refusal: false,
        },
    )
    .await;
    if !sent {
        return;
    }

    send(tx, StreamEvent::Phase { stage: "GEN".to_string() }).await;
    let system_prompt = prompt::compose_system_prompt(ResponseMode::Chat, "", false);
    let mut messages = vec![ChatMessage::system(system_prompt)];
    messages.extend(history_as_messages(&envelope.history));
    messages.push(ChatMessage::user(standalone.to_string()));

    stream_generation(deps, messages, ResponseMode::Chat, 0, metrics, cancel, tx, start).await;
}

async fn stream_generation(
    deps: &OrchestratorDeps,
    messages: Vec<ChatMessage>,
    mode: ResponseMode,
    available_sources: usize,
    metrics: &mut RequestMetrics,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<StreamEvent>,
    start: Instant,
) {
    let mut stream = match deps.llm.chat_stream(&messages, None).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("LLM call failed: {}", e);
            send(tx, StreamEvent::Error { kind: e.kind().to_string(), message: e.to_string() }).await;
            return;
        }
    };

    let mut answer = String::new();
    let mut token_count: u64 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                send(tx, StreamEvent::Error { kind: "cancelled".to_string(), message: "request cancelled".to_string() }).await;
                return;
            }
            delta = stream.next() => {
                match delta {
                    Some(text) => {
                        token_count += 1;
                        answer.push_str(&text);
                        if !send(tx, StreamEvent::Token { text }).await {
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let stats = stream.take_stats().unwrap_or_default();
    metrics.total_tokens = stats.total_tokens.max(token_count);

    let (corrected_text, corrections) = guardrail::apply_term_corrections(&answer);

    if mode == ResponseMode::Evidence {
        let citation_check = guardrail::validate_citations(&corrected_text, available_sources);
        if !citation_check.valid {
            tracing::warn!(invalid_markers = ?citation_check.invalid_markers, "generated answer has invalid citation markers");
        }
    }

    let extracted = reference_extractor::extract_references(&corrected_text);
    tracing::debug!(reference_count = extracted.len(), "extracted legal references from generated answer");

    if !corrections.is_empty() {
        send(tx, StreamEvent::Corrections { corrections, corrected_text: corrected_text.clone() }).await;
    }

    send(
        tx,
        StreamEvent::Done {
            total_tokens: metrics.total_tokens,
            latency_ms: start.elapsed().as_millis() as u64,
        },
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::intent::QueryIntent;

    #[test]
    fn auto_mode_resolves_to_chat_for_smalltalk() {
        assert_eq!(resolve_mode(ResponseMode::Auto, QueryIntent::Smalltalk), ResponseMode::Chat);
    }

    #[test]
    fn auto_mode_resolves_to_assist_otherwise() {
        assert_eq!(resolve_mode(ResponseMode::Auto, QueryIntent::LegalText), ResponseMode::Assist);
    }

    #[test]
    fn explicit_mode_is_never_overridden() {
        assert_eq!(resolve_mode(ResponseMode::Evidence, QueryIntent::Smalltalk), ResponseMode::Evidence);
    }

    #[test]
    fn filter_predicate_joins_clauses_with_and() {
        let mut filter = HashMap::new();
        filter.insert("doc_type".to_string(), "sfs".to_string());
        let predicate = build_filter_predicate(&Some(filter)).unwrap();
        assert_eq!(predicate, "doc_type = 'sfs'");
    }

    #[test]
    fn no_filter_yields_no_predicate() {
        assert!(build_filter_predicate(&None).is_none());
    }

    #[test]
    fn cutover_disabled_never_flags() {
        let config = AppConfig::from_env().unwrap_or_else(|_| panic!("env defaults should validate"));
        let routing = crate::types::RoutingConfig {
            primary: vec!["legacy_collection".to_string()],
            support: vec![],
            secondary: vec![],
            secondary_budget: 0,
            require_separation: false,
        };
        let (violated, _) = check_cutover(&routing, &config);
        assert!(!violated);
    }

    #[test]
    fn pick_best_single_set_prefers_highest_top_score() {
        let sets = vec![
            vec![("a".to_string(), 0.4)],
            vec![("b".to_string(), 0.9), ("c".to_string(), 0.1)],
        ];
        let best = pick_best_single_set(&sets);
        assert_eq!(best[0].0, "b");
    }
}
