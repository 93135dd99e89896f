use std::io::ErrorKind;
use std::sync::Arc;

use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};

use common::{
    error::AppError, index::VectorIndex, storage::store::StorageManager,
    utils::embedding::EmbeddingService,
};

use crate::splitter::SplitterRegistry;

/// Ingestion result reported back to the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestedFile {
    pub chunk_count: usize,
    /// Total bytes of chunk text inserted into the index; this is the
    /// vector-store usage of the file, not its original size.
    pub usage_bytes: i64,
}

/// Downloads, splits, embeds and indexes source files, and serves
/// query-time search.
pub struct EmbeddingPipeline {
    embedder: Arc<dyn EmbeddingService>,
    storage: StorageManager,
    index: Arc<dyn VectorIndex>,
    splitters: SplitterRegistry,
    chars_per_token: usize,
}

impl EmbeddingPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        storage: StorageManager,
        index: Arc<dyn VectorIndex>,
        splitters: SplitterRegistry,
        chars_per_token: usize,
    ) -> Self {
        Self {
            embedder,
            storage,
            index,
            splitters,
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Ingest one file into the named index collection.
    ///
    /// Chunks are embedded in split order and inserted in a single batch
    /// only after every embedding succeeded, so a failure at any chunk
    /// leaves the index untouched. The scratch download is removed on every
    /// exit path by its drop guard.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_file(
        &self,
        collection_name: &str,
        model_name: &str,
        file_id: &str,
        file_name: &str,
        source_path: &str,
        max_chunk_size_tokens: i64,
        chunk_overlap_tokens: i64,
    ) -> Result<IngestedFile, AppError> {
        let span = info_span!("add_file", %collection_name, %file_id);
        async {
            // Resolve the splitter before touching any collaborator.
            let splitter = self.splitters.resolve(file_name)?;

            let scratch = NamedTempFile::new()?;
            self.download_to(source_path, &scratch).await?;

            let content = tokio::fs::read_to_string(scratch.path())
                .await
                .map_err(|e| {
                    if e.kind() == ErrorKind::InvalidData {
                        AppError::Validation(format!("file {file_name:?} is not valid UTF-8"))
                    } else {
                        AppError::Io(e)
                    }
                })?;

            let max_chars = max_chunk_size_tokens.max(0) as usize * self.chars_per_token;
            let overlap_chars = chunk_overlap_tokens.max(0) as usize * self.chars_per_token;
            let chunks = splitter.split(&content, max_chars, overlap_chars)?;
            info!(chunks = chunks.len(), "split file");

            self.embedder.ensure_model(model_name).await?;

            // Three positionally aligned sequences; the batched insert
            // depends on this alignment.
            let mut file_ids = Vec::with_capacity(chunks.len());
            let mut texts = Vec::with_capacity(chunks.len());
            let mut vectors = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let embedding = self
                    .embedder
                    .embed(model_name, &chunk)
                    .await
                    .map_err(|e| wrap(e, "embed chunk"))?;
                if embedding.len() != self.embedder.dimension() {
                    return Err(AppError::InternalError(format!(
                        "embedding has dimension {} but {} was configured",
                        embedding.len(),
                        self.embedder.dimension()
                    )));
                }
                file_ids.push(file_id.to_string());
                texts.push(chunk);
                vectors.push(embedding);
            }

            let chunk_count = texts.len();
            let usage_bytes: i64 = texts.iter().map(|t| t.len() as i64).sum();
            self.index
                .insert_documents(collection_name, file_ids, texts, vectors)
                .await
                .map_err(|e| wrap(e, "insert documents"))?;

            info!(chunk_count, usage_bytes, "indexed file");
            Ok(IngestedFile {
                chunk_count,
                usage_bytes,
            })
        }
        .instrument(span)
        .await
    }

    /// Remove every indexed chunk of one file. Relies on the index contract
    /// that deleting documents which do not exist is a no-op.
    pub async fn delete_file(&self, collection_name: &str, file_id: &str) -> Result<(), AppError> {
        self.index
            .delete_documents(collection_name, file_id)
            .await
            .map_err(|e| wrap(e, "delete documents"))
    }

    /// Embed the query and return the top-k matching chunk texts in the
    /// index's own relevance order.
    pub async fn search(
        &self,
        collection_name: &str,
        model_name: &str,
        query: &str,
        num_documents: usize,
    ) -> Result<Vec<String>, AppError> {
        self.embedder.ensure_model(model_name).await?;
        let embedding = self
            .embedder
            .embed(model_name, query)
            .await
            .map_err(|e| wrap(e, "embed query"))?;
        let results = self
            .index
            .search(collection_name, embedding, num_documents)
            .await?;
        debug!(hits = results.len(), "search complete");
        Ok(results)
    }

    async fn download_to(
        &self,
        source_path: &str,
        scratch: &NamedTempFile,
    ) -> Result<(), AppError> {
        let mut stream = self
            .storage
            .get_stream(source_path)
            .await
            .map_err(|e| wrap(AppError::from(e), "download"))?;
        let mut out = tokio::fs::File::create(scratch.path()).await?;
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| wrap(AppError::from(e), "download"))?;
            out.write_all(&bytes).await?;
        }
        out.flush().await?;
        debug!(path = %scratch.path().display(), "downloaded source file");
        Ok(())
    }
}

/// Attach the failing call to a collaborator error without flattening
/// validation or not-found classes.
fn wrap(err: AppError, context: &str) -> AppError {
    match err {
        AppError::Validation(_)
        | AppError::NotFound(_)
        | AppError::AlreadyExists(_)
        | AppError::ConcurrentUpdate(_) => err,
        other => AppError::InternalError(format!("{context}: {other}")),
    }
}
