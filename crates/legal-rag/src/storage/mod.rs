pub mod parent_store;
pub mod vector_store;

pub use parent_store::ParentStore;
pub use vector_store::{dense_retrieve, DenseLeg, DenseRetrievalOutcome, LanceVectorStore, VectorHit, VectorStore};
