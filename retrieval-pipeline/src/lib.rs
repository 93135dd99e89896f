#![allow(clippy::missing_docs_in_private_items)]

use std::sync::Arc;

use tracing::debug;

use common::error::AppError;
use ingestion_pipeline::EmbeddingPipeline;

pub const DEFAULT_NUM_DOCUMENTS: i64 = 10;
pub const MAX_NUM_DOCUMENTS: i64 = 100;

/// Validation wrapper exposing query-time search to internal callers. Every
/// store shares the process-wide embedding model, so only the target store
/// and the query travel with the request.
pub struct RetrievalService {
    model: String,
    pipeline: Arc<EmbeddingPipeline>,
}

impl RetrievalService {
    pub fn new(model: String, pipeline: Arc<EmbeddingPipeline>) -> Self {
        Self { model, pipeline }
    }

    /// Search one vector store and return matching chunk texts in the
    /// index's relevance order. `num_documents` defaults to
    /// `DEFAULT_NUM_DOCUMENTS` and is clamped to `MAX_NUM_DOCUMENTS`;
    /// negative values are rejected. Results are returned unmodified and
    /// never cached.
    pub async fn search_vector_store(
        &self,
        vector_store_id: &str,
        query: &str,
        num_documents: i64,
    ) -> Result<Vec<String>, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation(
                "vector_store_id is required".to_string(),
            ));
        }
        if query.is_empty() {
            return Err(AppError::Validation("query is required".to_string()));
        }
        if num_documents < 0 {
            return Err(AppError::Validation(
                "num_documents must be non-negative".to_string(),
            ));
        }

        let mut num_documents = num_documents;
        if num_documents == 0 {
            num_documents = DEFAULT_NUM_DOCUMENTS;
        }
        if num_documents > MAX_NUM_DOCUMENTS {
            num_documents = MAX_NUM_DOCUMENTS;
        }

        let documents = self
            .pipeline
            .search(vector_store_id, &self.model, query, num_documents as usize)
            .await?;
        debug!(%vector_store_id, hits = documents.len(), "search served");
        Ok(documents)
    }
}
