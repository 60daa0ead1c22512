pub mod hybrid;
pub mod text_search;

pub use hybrid::{fusion_metrics, hybrid_rrf, FusionMetrics, HybridDoc};
pub use text_search::{sanitize_fts_query, CompoundSplitter, NoopCompoundSplitter, TextSearch};
