//! Lexical Retriever (C7, spec §4.7). Backed by Tantivy — kept as the
//! teacher's full-text idiom rather than switched to raw SQLite FTS5 (the
//! distilled system's original engine), since the teacher's own dependency
//! stack already carries Tantivy for this purpose. The query-sanitization
//! and reserved-word handling below ports `original_source`'s
//! `bm25_service.py::_sanitize_fts_query` behavior onto Tantivy's query
//! parser; compound-word expansion is exposed as a pluggable
//! [`CompoundSplitter`] since the spec leaves the lexicon as an
//! implementer's choice (Open Question, §9).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::LazyLock;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{self, Schema, STORED, STRING, TEXT, Value as TantivyValue};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const FTS_RESERVED: &[&str] = &["AND", "OR", "NOT", "NEAR"];

static FTS_STRIP_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r#"["'()*^:{}\[\]~]"#).expect("fts strip regex is valid"));

/// Splits a Swedish compound word into its known morphemes, for recall
/// expansion before sanitization (§4.7). The spec deliberately leaves the
/// lexicon as an implementer's choice; [`NoopCompoundSplitter`] is the
/// default and callers may supply their own.
pub trait CompoundSplitter: Send + Sync {
    fn split(&self, token: &str) -> Vec<String>;
}

pub struct NoopCompoundSplitter;

impl CompoundSplitter for NoopCompoundSplitter {
    fn split(&self, _token: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Strip FTS operators, drop reserved tokens, quote each surviving token and
/// join with `OR`, optionally expanding compound words first.
pub fn sanitize_fts_query(query: &str, splitter: Option<&dyn CompoundSplitter>) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for raw in query.split_whitespace() {
        let cleaned = FTS_STRIP_RE.replace_all(raw, "").trim().to_string();
        if cleaned.is_empty() {
            continue;
        }
        if FTS_RESERVED.contains(&cleaned.to_uppercase().as_str()) {
            continue;
        }
        tokens.push(cleaned.clone());
        if let Some(splitter) = splitter {
            tokens.extend(splitter.split(&cleaned));
        }
    }

    tokens
        .into_iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub struct TextSearch {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    id_field: schema::Field,
    text_field: schema::Field,
    title_field: schema::Field,
    source_field: schema::Field,
}

impl TextSearch {
    /// Build the canonical schema. `id` is STRING (indexed, not tokenized)
    /// so that `TermQuery` lookups in [`Self::get_text_by_id`] work.
    fn build_schema() -> (Schema, schema::Field, schema::Field, schema::Field, schema::Field) {
        let mut sb = Schema::builder();
        let id_field = sb.add_text_field("id", STRING | STORED);
        let text_field = sb.add_text_field("text", TEXT | STORED);
        let title_field = sb.add_text_field("title", TEXT);
        let source_field = sb.add_text_field("source", TEXT | STORED);
        (sb.build(), id_field, text_field, title_field, source_field)
    }

    pub fn new(path: &str) -> Result<Self> {
        let index_path = Path::new(path).join("tantivy_index");
        std::fs::create_dir_all(&index_path).ok();

        let (schema, id_field, text_field, title_field, source_field) = Self::build_schema();

        let dir = tantivy::directory::MmapDirectory::open(&index_path)?;
        let index = if Index::exists(&dir)? {
            Index::open_in_dir(&index_path)?
        } else {
            Index::create_in_dir(&index_path, schema.clone())?
        };

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create Tantivy reader")?;

        let writer = index
            .writer(50_000_000)
            .context("Failed to create Tantivy writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            id_field,
            text_field,
            title_field,
            source_field,
        })
    }

    pub fn index_chunk(&self, id: &str, text: &str, title: &str, source: &str) -> Result<()> {
        let writer = self.writer.lock();
        writer.add_document(doc!(
            self.id_field => id,
            self.text_field => text,
            self.title_field => title,
            self.source_field => source,
        ))?;
        Ok(())
    }

    pub fn index_chunks_batch(
        &self,
        chunks: &[(String, String, String, String)],
    ) -> Result<()> {
        let writer = self.writer.lock();
        for (id, text, title, source) in chunks {
            writer.add_document(doc!(
                self.id_field => id.as_str(),
                self.text_field => text.as_str(),
                self.title_field => title.as_str(),
                self.source_field => source.as_str(),
            ))?;
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.commit().context("Tantivy commit failed")?;
        self.reader.reload()?;
        Ok(())
    }

    pub fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        self.search_filtered(query, k, None)
    }

    /// Search with optional source path filter for consistency with vector search filtering
    pub fn search_filtered(
        &self,
        query: &str,
        k: usize,
        source_filter: Option<&str>,
    ) -> Result<Vec<(String, f32)>> {
        let searcher = self.reader.searcher();
        let query_parser =
            QueryParser::for_index(&self.index, vec![self.text_field, self.title_field]);

        let sanitized = sanitize_fts_query(query, None);
        let parsed_query = match query_parser.parse_query(&sanitized) {
            Ok(q) => q,
            Err(_) => {
                let escaped_query = query.replace('"', "");
                let fallback_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
                fallback_parser.parse_query(&format!("\"{}\"", escaped_query))?
            }
        };

        // Fetch extra candidates when filtering to compensate for post-filter reduction.
        // Without this, source-filtered queries return fewer results than vector search,
        // causing asymmetric fusion.
        let fetch_limit = if source_filter.is_some() { k * 3 } else { k };
        let top_docs = searcher.search(&parsed_query, &TopDocs::with_limit(fetch_limit))?;

        let mut results = Vec::with_capacity(k);
        for (score, doc_address) in top_docs {
            if let Ok(doc) = searcher.doc::<TantivyDocument>(doc_address) {
                // Apply source filter if provided
                if let Some(filter_source) = source_filter {
                    let doc_source = doc
                        .get_first(self.source_field)
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if !doc_source.contains(filter_source) {
                        continue;
                    }
                }

                if let Some(id_val) = doc.get_first(self.id_field) {
                    if let Some(id_text) = id_val.as_str() {
                        results.push((id_text.to_string(), score));
                        if results.len() >= k {
                            break;
                        }
                    }
                }
            }
        }

        Ok(results)
    }

    /// Retrieve the stored text for a given chunk ID
    pub fn get_text_by_id(&self, id: &str) -> Result<Option<String>> {
        let searcher = self.reader.searcher();
        let term = tantivy::Term::from_field_text(self.id_field, id);
        let term_query = tantivy::query::TermQuery::new(term, tantivy::schema::IndexRecordOption::Basic);
        let top_docs = searcher.search(&term_query, &TopDocs::with_limit(1))?;
        if let Some((_score, addr)) = top_docs.first() {
            if let Ok(doc) = searcher.doc::<TantivyDocument>(*addr) {
                if let Some(text_val) = doc.get_first(self.text_field) {
                    return Ok(text_val.as_str().map(|s| s.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Return per-id BM25 scores for a caller-supplied candidate set (§4.7,
    /// used for hybrid reranking). Ids absent from the index are omitted
    /// rather than scored zero.
    pub fn get_doc_scores(&self, query: &str, ids: &[String]) -> Result<Vec<(String, f32)>> {
        let hits = self.search(query, ids.len().max(50))?;
        let id_set: std::collections::HashSet<&String> = ids.iter().collect();
        Ok(hits.into_iter().filter(|(id, _)| id_set.contains(id)).collect())
    }

    pub fn count(&self) -> Result<usize> {
        let searcher = self.reader.searcher();
        Ok(searcher.num_docs() as usize)
    }
}

#[cfg(test)]
mod sanitize_tests {
    use super::*;

    #[test]
    fn strips_fts_operator_characters() {
        let sanitized = sanitize_fts_query(r#"yttrandefrihet (2*kap)"#, None);
        assert!(!sanitized.contains('('));
        assert!(!sanitized.contains('*'));
    }

    #[test]
    fn drops_reserved_tokens() {
        let sanitized = sanitize_fts_query("yttrandefrihet AND tryckfrihet", None);
        assert!(!sanitized.split(" OR ").any(|t| t == "\"AND\""));
    }

    #[test]
    fn joins_tokens_with_or() {
        let sanitized = sanitize_fts_query("yttrandefrihet tryckfrihet", None);
        assert_eq!(sanitized, "\"yttrandefrihet\" OR \"tryckfrihet\"");
    }
}
