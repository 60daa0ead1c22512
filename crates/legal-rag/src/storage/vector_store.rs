//! Dense Retriever (C6, spec §4.6) and the vector-store capability
//! interface it runs against (§6: `list_collections`, `get_collection`,
//! `query`, `get`, `count`).
//!
//! The teacher's `LanceStore` hardcoded a single `documents` table; here
//! each logical collection (`sfs_lagtext_bge_m3_1024`, `diva_research_...`,
//! etc., per §4.3's routing table) is its own LanceDB table opened lazily
//! on first use, behind the `VectorStore` trait so the orchestrator can be
//! tested against an in-memory fake (see `tests` below) without a real
//! LanceDB connection.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, Float32Array, FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::{RwLock, Semaphore};

use crate::types::{RetrieverTag, SearchResult, SfsMetadata, Tier};

/// One ranked hit from a vector-store query, before it is lifted into the
/// pipeline's richer [`SearchResult`] type by the caller (which knows the
/// collection/tier/retriever_tag context the store itself does not).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub doc_type: String,
    /// Cosine similarity in `[0, 1]`, already converted from distance
    /// (§4.6: "Distances converted to similarity ∈ [0,1]").
    pub similarity: f32,
    pub metadata: SfsMetadata,
}

/// Capability interface over the dense vector store (§6, §9 "dynamic
/// dispatch across backends"). Implementations are process-wide
/// singletons, invoked concurrently and read-only from the pipeline's
/// perspective (§5).
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<String>>;
    async fn get_collection(&self, name: &str) -> Result<()>;
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>>;
    async fn get(&self, collection: &str, limit: usize, offset: usize) -> Result<Vec<VectorHit>>;
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// LanceDB-backed [`VectorStore`]. One table per collection name, created
/// on first write and opened lazily on first read; tables are otherwise
/// populated by the out-of-scope ingestion pipeline (§1 Non-goals).
pub struct LanceVectorStore {
    db: lancedb::Connection,
    dimension: usize,
    known_tables: RwLock<HashMap<String, ()>>,
}

impl LanceVectorStore {
    pub async fn new(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("failed to connect to LanceDB")?;
        Ok(Self {
            db,
            dimension,
            known_tables: RwLock::new(HashMap::new()),
        })
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("doc_type", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("metadata_json", DataType::Utf8, false),
        ]))
    }

    async fn ensure_table(&self, name: &str) -> Result<()> {
        if self.known_tables.read().await.contains_key(name) {
            return Ok(());
        }
        let names = self.db.table_names().execute().await?;
        if !names.contains(&name.to_string()) {
            let schema = self.schema();
            let seed_vec = vec![0.0f32; self.dimension];
            let vector_field = Field::new("item", DataType::Float32, true);
            let vector_array = FixedSizeListArray::new(
                Arc::new(vector_field),
                self.dimension as i32,
                Arc::new(Float32Array::from(seed_vec)) as Arc<dyn Array>,
                None,
            );
            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(vector_array) as Arc<dyn Array>,
                    Arc::new(StringArray::from(vec!["{}"])),
                ],
            )
            .context("failed to build seed record batch")?;
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(name, Box::new(batches))
                .execute()
                .await
                .with_context(|| format!("failed to create collection '{name}'"))?;
            let table = self.db.open_table(name).execute().await?;
            table.delete("id = '__seed__'").await.ok();
        }
        self.known_tables.write().await.insert(name.to_string(), ());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.db.table_names().execute().await?)
    }

    async fn get_collection(&self, name: &str) -> Result<()> {
        self.ensure_table(name).await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        n_results: usize,
        filter: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        self.ensure_table(collection).await?;
        let table = self.db.open_table(collection).execute().await?;

        let mut query = table.query().nearest_to(embedding)?;
        query = query.distance_type(lancedb::DistanceType::Cosine).limit(n_results);
        if let Some(predicate) = filter {
            query = query.only_if(predicate);
        }

        let results = query.execute().await.context("LanceDB vector search failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits(&batches))
    }

    async fn get(&self, collection: &str, limit: usize, offset: usize) -> Result<Vec<VectorHit>> {
        self.ensure_table(collection).await?;
        let table = self.db.open_table(collection).execute().await?;
        let results = table
            .query()
            .limit(limit + offset)
            .execute()
            .await
            .context("LanceDB metadata fetch failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let hits = extract_hits(&batches);
        Ok(hits.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.ensure_table(collection).await?;
        let table = self.db.open_table(collection).execute().await?;
        Ok(table.count_rows(None).await?)
    }
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<VectorHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let titles = batch.column_by_name("title").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let doc_types = batch.column_by_name("doc_type").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let metadata_jsons = batch.column_by_name("metadata_json").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(titles), Some(texts)) = (ids, titles, texts) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let id = ids.value(i).to_string();
            if id == "__seed__" {
                continue;
            }
            let similarity = distances.map(|d| (1.0 - d.value(i)).clamp(0.0, 1.0)).unwrap_or(0.0);
            let metadata: SfsMetadata = metadata_jsons
                .map(|m| m.value(i))
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            hits.push(VectorHit {
                id,
                title: titles.value(i).to_string(),
                snippet: texts.value(i).to_string(),
                doc_type: doc_types.map(|d| d.value(i).to_string()).unwrap_or_default(),
                similarity,
                metadata,
            });
        }
    }
    hits
}

/// One fan-out leg of the Dense Retriever: a single (query-variant,
/// collection) pair to search (§4.6: "Must execute variants × collections
/// concurrently subject to a bounded-parallelism semaphore").
pub struct DenseLeg {
    pub variant_label: String,
    pub embedding: Vec<f32>,
    pub collection: String,
    pub tier: Tier,
}

/// Outcome of fanning legs out against the store: per-variant ranked
/// `(id, similarity)` lists (consumed by the fusion engine), the full
/// `SearchResult` records keyed by id, and any leg-level failures recorded
/// rather than propagated (§5, §7: "Retrieval sub-leg failures are
/// recorded and not propagated").
#[derive(Debug, Default)]
pub struct DenseRetrievalOutcome {
    pub per_variant_ranked: Vec<(String, Vec<(String, f32)>)>,
    pub results_by_id: HashMap<String, SearchResult>,
    pub leg_failures: Vec<String>,
}

/// Run the dense retriever: fan out `legs` concurrently, bounded by
/// `concurrency` (default 8 per §4.6), merging successful legs and
/// recording failed ones without failing the overall retrieval.
pub async fn dense_retrieve(
    store: &dyn VectorStore,
    legs: Vec<DenseLeg>,
    n_results: usize,
    filter: Option<&str>,
    concurrency: usize,
) -> DenseRetrievalOutcome {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(legs.len());

    for leg in legs {
        let semaphore = semaphore.clone();
        let filter_owned = filter.map(|s| s.to_string());
        tasks.push(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");
            let leg_id = format!("{}::{}", leg.variant_label, leg.collection);
            let outcome = store
                .query(&leg.collection, &leg.embedding, n_results, filter_owned.as_deref())
                .await;
            (leg_id, leg, outcome)
        });
    }

    let legs_results = futures::future::join_all(tasks).await;

    let mut outcome = DenseRetrievalOutcome::default();
    for (leg_id, leg, result) in legs_results {
        match result {
            Ok(hits) => {
                let mut ranked = Vec::with_capacity(hits.len());
                for hit in hits {
                    ranked.push((hit.id.clone(), hit.similarity));
                    outcome.results_by_id.entry(hit.id.clone()).or_insert_with(|| SearchResult {
                        id: hit.id,
                        title: hit.title,
                        snippet: hit.snippet,
                        score: hit.similarity,
                        source_collection: leg.collection.clone(),
                        doc_type: hit.doc_type,
                        retriever_tag: RetrieverTag::Dense,
                        tier: leg.tier,
                        metadata: hit.metadata,
                        extra: HashMap::new(),
                    });
                }
                outcome.per_variant_ranked.push((leg_id, ranked));
            }
            Err(e) => {
                tracing::warn!(leg = %leg_id, "dense retrieval leg failed: {}", e);
                outcome.leg_failures.push(leg_id);
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeStore {
        calls: AtomicUsize,
        fail_collection: Option<String>,
    }

    #[async_trait]
    impl VectorStore for FakeStore {
        async fn list_collections(&self) -> Result<Vec<String>> {
            Ok(vec!["sfs".to_string()])
        }
        async fn get_collection(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        async fn query(
            &self,
            collection: &str,
            _embedding: &[f32],
            _n_results: usize,
            _filter: Option<&str>,
        ) -> Result<Vec<VectorHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_collection.as_deref() == Some(collection) {
                return Err(anyhow::anyhow!("simulated backend failure"));
            }
            Ok(vec![VectorHit {
                id: format!("{collection}-doc-1"),
                title: "Title".into(),
                snippet: "Snippet".into(),
                doc_type: "sfs".into(),
                similarity: 0.8,
                metadata: SfsMetadata::default(),
            }])
        }
        async fn get(&self, _collection: &str, _limit: usize, _offset: usize) -> Result<Vec<VectorHit>> {
            Ok(Vec::new())
        }
        async fn count(&self, _collection: &str) -> Result<usize> {
            Ok(1)
        }
    }

    fn leg(collection: &str) -> DenseLeg {
        DenseLeg {
            variant_label: "q0".to_string(),
            embedding: vec![0.1, 0.2],
            collection: collection.to_string(),
            tier: Tier::Primary,
        }
    }

    #[tokio::test]
    async fn fans_out_across_legs_concurrently() {
        let store = FakeStore { calls: AtomicUsize::new(0), fail_collection: None };
        let outcome = dense_retrieve(&store, vec![leg("sfs"), leg("riksdag")], 5, None, 8).await;
        assert_eq!(outcome.per_variant_ranked.len(), 2);
        assert!(outcome.leg_failures.is_empty());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_leg_is_recorded_not_propagated() {
        let store = FakeStore { calls: AtomicUsize::new(0), fail_collection: Some("riksdag".to_string()) };
        let outcome = dense_retrieve(&store, vec![leg("sfs"), leg("riksdag")], 5, None, 8).await;
        assert_eq!(outcome.per_variant_ranked.len(), 1);
        assert_eq!(outcome.leg_failures.len(), 1);
        assert!(outcome.leg_failures[0].contains("riksdag"));
    }

    #[tokio::test]
    async fn concurrency_semaphore_caps_in_flight_permits() {
        let store = FakeStore { calls: AtomicUsize::new(0), fail_collection: None };
        let legs: Vec<DenseLeg> = (0..16).map(|i| leg(&format!("c{i}"))).collect();
        let outcome = dense_retrieve(&store, legs, 5, None, 4).await;
        assert_eq!(outcome.per_variant_ranked.len(), 16);
    }
}
