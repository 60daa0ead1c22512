pub mod cross_encoder;

pub use cross_encoder::{apply_policy, should_rerank, CrossEncoderReranker};
