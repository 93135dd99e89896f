use std::{collections::HashSet, sync::Arc};

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::AppError;

/// Embedding-model capability consumed by ingestion and query-time search.
/// Implementations return vectors of a fixed dimensionality.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Make sure the model is available before any embedding request.
    /// Idempotent; repeated calls for the same model are cheap.
    async fn ensure_model(&self, model: &str) -> Result<(), AppError>;

    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;

    fn dimension(&self) -> usize;
}

/// Production backend speaking the OpenAI embeddings protocol.
pub struct OpenAiEmbeddings {
    client: Arc<Client<OpenAIConfig>>,
    dimensions: u32,
    ready: Mutex<HashSet<String>>,
}

impl OpenAiEmbeddings {
    pub fn new(client: Arc<Client<OpenAIConfig>>, dimensions: u32) -> Self {
        Self {
            client,
            dimensions,
            ready: Mutex::new(HashSet::new()),
        }
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbeddings {
    async fn ensure_model(&self, model: &str) -> Result<(), AppError> {
        let mut ready = self.ready.lock().await;
        if ready.contains(model) {
            return Ok(());
        }
        self.client.models().retrieve(model).await?;
        ready.insert(model.to_string());
        Ok(())
    }

    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(model)
            .dimensions(self.dimensions)
            .input([input])
            .build()?;

        let response = self.client.embeddings().create(request).await?;

        let embedding: Vec<f32> = response
            .data
            .first()
            .ok_or_else(|| AppError::InternalError("No embedding data received".into()))?
            .embedding
            .clone();

        if embedding.len() != self.dimensions as usize {
            return Err(AppError::InternalError(format!(
                "embedding has dimension {} but {} was configured",
                embedding.len(),
                self.dimensions
            )));
        }

        debug!(dimensions = embedding.len(), "embedding created");
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimensions as usize
    }
}

/// Deterministic local backend: a normalized byte histogram. Identical
/// inputs always produce identical vectors, which makes it suitable for
/// tests and offline smoke runs.
pub struct HashedEmbeddings {
    dimension: usize,
}

impl HashedEmbeddings {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingService for HashedEmbeddings {
    async fn ensure_model(&self, _model: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        Ok(hashed_embedding(input, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension];
    if text.is_empty() {
        return vector;
    }

    for byte in text.bytes() {
        vector[byte as usize % dimension] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}
