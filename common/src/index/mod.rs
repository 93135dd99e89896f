use async_trait::async_trait;

use crate::error::AppError;

pub mod surreal;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use surreal::SurrealVectorIndex;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::InMemoryVectorIndex;

/// Remote vector index capability. Collections are addressed by name; the
/// delete operations are tolerant of absent targets by contract, which the
/// orchestration layer relies on.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create a collection and return its numeric reference.
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<i64, AppError>;

    /// Drop a collection; a missing collection is a no-op, not an error.
    async fn delete_collection(&self, name: &str) -> Result<(), AppError>;

    async fn rename_collection(&self, old_name: &str, new_name: &str) -> Result<(), AppError>;

    /// Insert one batch of documents. `file_ids`, `texts` and `vectors` are
    /// positionally aligned and must have equal lengths; the batch is
    /// rejected before any write otherwise.
    async fn insert_documents(
        &self,
        name: &str,
        file_ids: Vec<String>,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), AppError>;

    /// Remove every document of one file; a no-op when nothing matches.
    async fn delete_documents(&self, name: &str, file_id: &str) -> Result<(), AppError>;

    /// Top-k nearest-neighbour search returning chunk texts in the index's
    /// own relevance order.
    async fn search(&self, name: &str, vector: Vec<f32>, k: usize)
        -> Result<Vec<String>, AppError>;

    async fn list_collections(&self) -> Result<Vec<i64>, AppError>;
}

/// Check the positional-alignment contract of `insert_documents`.
pub(crate) fn validate_batch(
    file_ids: &[String],
    texts: &[String],
    vectors: &[Vec<f32>],
    dimensions: usize,
) -> Result<(), AppError> {
    if file_ids.len() != texts.len() || texts.len() != vectors.len() {
        return Err(AppError::Validation(format!(
            "misaligned insert batch: {} file ids, {} texts, {} vectors",
            file_ids.len(),
            texts.len(),
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
        return Err(AppError::Validation(format!(
            "vector has dimension {} but the collection expects {}",
            bad.len(),
            dimensions
        )));
    }
    Ok(())
}
