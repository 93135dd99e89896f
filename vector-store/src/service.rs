use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    index::VectorIndex,
    registry::FileRegistry,
    storage::{
        db::SurrealDbClient,
        pagination::{Page, PageRequest},
        types::{
            collection::{Collection, CollectionStatus},
            collection_file::{CollectionFile, FileStatus},
            collection_metadata::{CollectionMetadata, MetadataChange},
        },
    },
};
use ingestion_pipeline::EmbeddingPipeline;

use crate::types::{
    ChunkingStrategy, CreateVectorStoreOutcome, CreateVectorStoreParams, FileIngestFailure,
    ResolvedChunkingStrategy, UpdateVectorStoreParams, VectorStore, VectorStoreFile,
};

const MAX_METADATA_ENTRIES: usize = 16;
const MAX_METADATA_KEY_LENGTH: usize = 64;
const MAX_METADATA_VALUE_LENGTH: usize = 512;

/// Orchestrates vector store and vector store file resources across the
/// resource store, the embedding pipeline and the remote vector index.
///
/// There is no transaction spanning the local store and the index; every
/// operation uses a fixed ordering instead. Creation touches the index
/// first so a failure can only leave an orphaned remote collection, never a
/// user-visible store without its index; deletion removes the local rows
/// first so the user-visible resource disappears even when the remote
/// cleanup fails.
pub struct VectorStoreService {
    db: Arc<SurrealDbClient>,
    index: Arc<dyn VectorIndex>,
    files: Arc<dyn FileRegistry>,
    pipeline: Arc<EmbeddingPipeline>,
    embedding_model: String,
    embedding_dimensions: usize,
}

/// Signed adjustments applied to a collection's counters in one
/// version-checked write.
#[derive(Debug, Default, Clone, Copy)]
struct CounterDelta {
    completed: i64,
    failed: i64,
    cancelled: i64,
    total: i64,
    usage_bytes: i64,
}

impl CounterDelta {
    fn file_completed(usage_bytes: i64) -> Self {
        CounterDelta {
            completed: 1,
            total: 1,
            usage_bytes,
            ..Default::default()
        }
    }

    fn file_removed(status: FileStatus, usage_bytes: i64) -> Self {
        let mut delta = CounterDelta {
            total: -1,
            usage_bytes: -usage_bytes,
            ..Default::default()
        };
        match status {
            FileStatus::Completed => delta.completed = -1,
            FileStatus::Failed => delta.failed = -1,
            FileStatus::Cancelled => delta.cancelled = -1,
            FileStatus::InProgress => {}
        }
        delta
    }
}

impl VectorStoreService {
    pub fn new(
        db: Arc<SurrealDbClient>,
        index: Arc<dyn VectorIndex>,
        files: Arc<dyn FileRegistry>,
        pipeline: Arc<EmbeddingPipeline>,
        embedding_model: String,
        embedding_dimensions: usize,
    ) -> Self {
        Self {
            db,
            index,
            files,
            pipeline,
            embedding_model,
            embedding_dimensions,
        }
    }

    /// Create a vector store and ingest the requested files.
    ///
    /// Everything is validated before the first side effect. Per-file
    /// ingestion failures do not abort the call; they are reported in the
    /// outcome next to the created store.
    pub async fn create_vector_store(
        &self,
        project_id: &str,
        params: CreateVectorStoreParams,
    ) -> Result<CreateVectorStoreOutcome, AppError> {
        if params.name.is_empty() {
            return Err(AppError::Validation("name is required".to_string()));
        }
        validate_metadata(&params.metadata)?;
        if let Some(expires_after) = &params.expires_after {
            expires_after.validate()?;
        }
        let resolved = ChunkingStrategy::resolve(params.chunking_strategy)?;
        for file_id in &params.file_ids {
            self.files.get_file(file_id).await.map_err(|err| {
                if err.is_not_found() {
                    AppError::Validation(format!("file {file_id:?} not found"))
                } else {
                    err
                }
            })?;
        }

        match Collection::get_by_name(project_id, &params.name, &self.db).await {
            Ok(_) => {
                return Err(AppError::AlreadyExists(format!(
                    "vector store {:?}",
                    params.name
                )))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        // First side-effecting step. A failure after this point leaves a
        // dangling remote collection that out-of-band reconciliation has to
        // pick up.
        let vector_store_id = generate_vector_store_id();
        let collection_id = self
            .index
            .create_collection(&vector_store_id, self.embedding_dimensions)
            .await?;

        let row_id = self.db.next_row_id().await?;
        let mut collection = Collection::new(
            vector_store_id.clone(),
            collection_id,
            project_id.to_string(),
            params.name.clone(),
            self.embedding_model.clone(),
            self.embedding_dimensions as i64,
            row_id,
        );
        if let Some(expires_after) = params.expires_after {
            collection.set_expiration(expires_after.anchor, expires_after.days);
        }
        let entries = params
            .metadata
            .iter()
            .map(|(key, value)| {
                CollectionMetadata::new(vector_store_id.clone(), key.clone(), value.clone())
            })
            .collect();
        let collection = Collection::create_with_metadata(collection, entries, &self.db).await?;
        info!(%vector_store_id, name = %params.name, "created vector store");

        let mut file_failures = Vec::new();
        for file_id in params.file_ids {
            match self.ingest_file(project_id, &collection, &file_id, resolved).await {
                Ok(file) => {
                    self.bump_counters(
                        project_id,
                        &vector_store_id,
                        CounterDelta::file_completed(file.usage_bytes),
                    )
                    .await;
                }
                Err(err) => {
                    warn!(%vector_store_id, %file_id, error = %err, "file ingestion failed");
                    file_failures.push(FileIngestFailure {
                        file_id,
                        error: err.to_string(),
                    });
                }
            }
        }

        self.mark_ready(project_id, &vector_store_id).await;

        let collection = Collection::get(project_id, &vector_store_id, &self.db).await?;
        let metadata = CollectionMetadata::list_by_vector_store(&vector_store_id, &self.db).await?;
        Ok(CreateVectorStoreOutcome {
            vector_store: VectorStore::from_parts(collection, metadata),
            file_failures,
        })
    }

    pub async fn get_vector_store(
        &self,
        project_id: &str,
        vector_store_id: &str,
    ) -> Result<VectorStore, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("id is required".to_string()));
        }
        let collection = Collection::get(project_id, vector_store_id, &self.db).await?;
        let metadata = CollectionMetadata::list_by_vector_store(vector_store_id, &self.db).await?;
        Ok(VectorStore::from_parts(collection, metadata))
    }

    pub async fn list_vector_stores(
        &self,
        project_id: &str,
        limit: i64,
        order: &str,
        after: Option<String>,
    ) -> Result<Page<VectorStore>, AppError> {
        let page = PageRequest::new(limit, order, after)?;
        let collections = Collection::list(project_id, &page, &self.db).await?;

        let mut stores = Vec::with_capacity(collections.data.len());
        for collection in &collections.data {
            let metadata =
                CollectionMetadata::list_by_vector_store(&collection.vector_store_id, &self.db)
                    .await?;
            stores.push(VectorStore::from_parts(collection.clone(), metadata));
        }
        Ok(Page {
            data: stores,
            first_id: collections.first_id,
            last_id: collections.last_id,
            has_more: collections.has_more,
        })
    }

    /// Update name, expiration and metadata. The metadata set-diff and the
    /// version-checked collection update commit in one local transaction.
    pub async fn update_vector_store(
        &self,
        project_id: &str,
        vector_store_id: &str,
        params: UpdateVectorStoreParams,
    ) -> Result<VectorStore, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("id is required".to_string()));
        }
        if let Some(metadata) = &params.metadata {
            validate_metadata(metadata)?;
        }
        if let Some(expires_after) = &params.expires_after {
            expires_after.validate()?;
        }

        let collection = Collection::get(project_id, vector_store_id, &self.db).await?;
        let mut next = collection.clone();

        if let Some(name) = params.name {
            if name.is_empty() {
                return Err(AppError::Validation("name must not be empty".to_string()));
            }
            next.name = name;
        }
        if let Some(expires_after) = params.expires_after {
            next.set_expiration(expires_after.anchor, expires_after.days);
        }

        let (creates, changes, removals) = match params.metadata {
            Some(desired) => {
                let existing =
                    CollectionMetadata::list_by_vector_store(vector_store_id, &self.db).await?;
                metadata_diff(vector_store_id, &existing, desired)
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        let updated = next
            .update_with_metadata(creates, changes, removals, &self.db)
            .await?;
        let metadata = CollectionMetadata::list_by_vector_store(vector_store_id, &self.db).await?;
        Ok(VectorStore::from_parts(updated, metadata))
    }

    /// Delete a vector store: the local transaction removes the collection,
    /// its metadata and its files first; only then is the remote index
    /// deletion requested. A remote failure is tolerated since the local
    /// state is authoritative for resource existence.
    pub async fn delete_vector_store(
        &self,
        project_id: &str,
        vector_store_id: &str,
    ) -> Result<(), AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("id is required".to_string()));
        }
        Collection::delete_cascade(project_id, vector_store_id, &self.db).await?;

        if let Err(err) = self.index.delete_collection(vector_store_id).await {
            warn!(
                %vector_store_id,
                error = %err,
                "remote index deletion failed; dangling collection requires reconciliation"
            );
        }
        info!(%vector_store_id, "deleted vector store");
        Ok(())
    }

    /// Ingest one file into an existing vector store and record it.
    pub async fn create_vector_store_file(
        &self,
        project_id: &str,
        vector_store_id: &str,
        file_id: &str,
        chunking_strategy: Option<ChunkingStrategy>,
    ) -> Result<VectorStoreFile, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("vector store id is required".to_string()));
        }
        if file_id.is_empty() {
            return Err(AppError::Validation("file id is required".to_string()));
        }
        let resolved = ChunkingStrategy::resolve(chunking_strategy)?;

        let collection = Collection::get(project_id, vector_store_id, &self.db).await?;
        let file = self
            .ingest_file(project_id, &collection, file_id, resolved)
            .await?;
        self.bump_counters(
            project_id,
            vector_store_id,
            CounterDelta::file_completed(file.usage_bytes),
        )
        .await;
        info!(%vector_store_id, %file_id, "added file to vector store");

        Ok(VectorStoreFile::from(file))
    }

    pub async fn get_vector_store_file(
        &self,
        project_id: &str,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<VectorStoreFile, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("vector store id is required".to_string()));
        }
        if file_id.is_empty() {
            return Err(AppError::Validation("file id is required".to_string()));
        }
        Collection::get(project_id, vector_store_id, &self.db).await?;
        let file = CollectionFile::get(project_id, vector_store_id, file_id, &self.db).await?;
        Ok(VectorStoreFile::from(file))
    }

    pub async fn list_vector_store_files(
        &self,
        project_id: &str,
        vector_store_id: &str,
        limit: i64,
        order: &str,
        after: Option<String>,
    ) -> Result<Page<VectorStoreFile>, AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("vector store id is required".to_string()));
        }
        let page = PageRequest::new(limit, order, after)?;
        Collection::get(project_id, vector_store_id, &self.db).await?;
        let files = CollectionFile::list(project_id, vector_store_id, &page, &self.db).await?;
        Ok(files.map(VectorStoreFile::from))
    }

    /// Remove a file: indexed chunks first, then the local row, then the
    /// counters.
    pub async fn delete_vector_store_file(
        &self,
        project_id: &str,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), AppError> {
        if vector_store_id.is_empty() {
            return Err(AppError::Validation("vector store id is required".to_string()));
        }
        if file_id.is_empty() {
            return Err(AppError::Validation("file id is required".to_string()));
        }
        Collection::get(project_id, vector_store_id, &self.db).await?;
        let file = CollectionFile::get(project_id, vector_store_id, file_id, &self.db).await?;

        self.pipeline.delete_file(vector_store_id, file_id).await?;
        CollectionFile::delete(project_id, vector_store_id, file_id, &self.db).await?;
        self.bump_counters(
            project_id,
            vector_store_id,
            CounterDelta::file_removed(file.status, file.usage_bytes),
        )
        .await;
        info!(%vector_store_id, %file_id, "removed file from vector store");
        Ok(())
    }

    /// Run the pipeline for one file and persist the resulting row. The row
    /// is only created after the file has been validated, ingested and
    /// indexed.
    async fn ingest_file(
        &self,
        project_id: &str,
        collection: &Collection,
        file_id: &str,
        resolved: ResolvedChunkingStrategy,
    ) -> Result<CollectionFile, AppError> {
        let record = self.files.get_file(file_id).await?;
        let source_path = self.files.get_file_path(file_id).await?;

        match CollectionFile::get(project_id, &collection.vector_store_id, file_id, &self.db).await
        {
            Ok(_) => {
                return Err(AppError::AlreadyExists(format!(
                    "file {:?} in vector store {:?}",
                    file_id, collection.vector_store_id
                )))
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        let ingested = self
            .pipeline
            .add_file(
                &collection.vector_store_id,
                &collection.embedding_model,
                file_id,
                &record.file_name,
                &source_path,
                resolved.max_chunk_size_tokens,
                resolved.chunk_overlap_tokens,
            )
            .await?;

        let row_id = self.db.next_row_id().await?;
        let mut file = CollectionFile::new(
            file_id.to_string(),
            project_id.to_string(),
            collection.vector_store_id.clone(),
            resolved.kind,
            resolved.max_chunk_size_tokens,
            resolved.chunk_overlap_tokens,
            row_id,
        );
        // Ingestion ran to completion above, so the row lands in its
        // terminal state right away.
        file.transition(FileStatus::Completed)?;
        file.usage_bytes = ingested.usage_bytes;
        CollectionFile::create(file, &self.db).await
    }

    /// Apply a counter delta through the version-checked collection update.
    /// A concurrent writer wins the race; the resulting staleness is
    /// tolerated rather than retried.
    async fn bump_counters(&self, project_id: &str, vector_store_id: &str, delta: CounterDelta) {
        let result = async {
            let mut collection = Collection::get(project_id, vector_store_id, &self.db).await?;
            collection.file_counts_completed += delta.completed;
            collection.file_counts_failed += delta.failed;
            collection.file_counts_cancelled += delta.cancelled;
            collection.file_counts_total += delta.total;
            collection.usage_bytes += delta.usage_bytes;
            collection.last_active_at = Utc::now().timestamp();
            collection.refresh_expiry();
            collection.update(&self.db).await
        }
        .await;

        if let Err(err) = result {
            warn!(%vector_store_id, error = %err, "collection counter update skipped");
        }
    }

    /// Flip the store out of `in_progress` once the synchronous ingestion
    /// pass is over.
    async fn mark_ready(&self, project_id: &str, vector_store_id: &str) {
        let result = async {
            let mut collection = Collection::get(project_id, vector_store_id, &self.db).await?;
            collection.status = CollectionStatus::Completed;
            collection.update(&self.db).await
        }
        .await;

        if let Err(err) = result {
            warn!(%vector_store_id, error = %err, "status update skipped");
        }
    }
}

fn generate_vector_store_id() -> String {
    // Restricted to [A-Za-z0-9_]: the id doubles as the remote index
    // collection name.
    format!("vs_{}", Uuid::new_v4().simple())
}

fn validate_metadata(metadata: &HashMap<String, String>) -> Result<(), AppError> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(AppError::Validation(format!(
            "no more than {MAX_METADATA_ENTRIES} metadata entries are allowed"
        )));
    }
    for (key, value) in metadata {
        if key.len() > MAX_METADATA_KEY_LENGTH {
            return Err(AppError::Validation(format!(
                "metadata key {key:?} is too long, max allowed is {MAX_METADATA_KEY_LENGTH}"
            )));
        }
        if value.len() > MAX_METADATA_VALUE_LENGTH {
            return Err(AppError::Validation(format!(
                "metadata value for key {key:?} is too long, max allowed is {MAX_METADATA_VALUE_LENGTH}"
            )));
        }
    }
    Ok(())
}

/// Compute the set-diff between stored metadata rows and the desired map:
/// keys to create, values to change under their observed versions, and keys
/// to remove.
fn metadata_diff(
    vector_store_id: &str,
    existing: &[CollectionMetadata],
    desired: HashMap<String, String>,
) -> (Vec<CollectionMetadata>, Vec<MetadataChange>, Vec<String>) {
    let current: HashMap<&str, &CollectionMetadata> = existing
        .iter()
        .map(|entry| (entry.key.as_str(), entry))
        .collect();

    let mut creates = Vec::new();
    let mut changes = Vec::new();
    for (key, value) in &desired {
        match current.get(key.as_str()) {
            None => creates.push(CollectionMetadata::new(
                vector_store_id.to_string(),
                key.clone(),
                value.clone(),
            )),
            Some(entry) if entry.value != *value => changes.push(MetadataChange {
                key: key.clone(),
                value: value.clone(),
                version: entry.version,
            }),
            Some(_) => {}
        }
    }
    let removals = existing
        .iter()
        .filter(|entry| !desired.contains_key(&entry.key))
        .map(|entry| entry.key.clone())
        .collect();

    (creates, changes, removals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use common::index::InMemoryVectorIndex;
    use common::registry::InMemoryFileRegistry;
    use common::storage::store::StorageManager;
    use common::storage::types::file_record::FileRecord;
    use common::utils::config::AppConfig;
    use common::utils::embedding::HashedEmbeddings;
    use ingestion_pipeline::splitter::{ChunkSplitter, SplitterRegistry};

    const DIMS: usize = 64;

    struct LineSplitter;
    impl ChunkSplitter for LineSplitter {
        fn split(
            &self,
            content: &str,
            _max_chars: usize,
            _overlap_chars: usize,
        ) -> Result<Vec<String>, AppError> {
            Ok(content.lines().map(str::to_owned).collect())
        }
    }

    struct Harness {
        service: VectorStoreService,
        index: Arc<InMemoryVectorIndex>,
        registry: Arc<InMemoryFileRegistry>,
        storage: StorageManager,
        db: Arc<SurrealDbClient>,
    }

    async fn setup() -> Harness {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");

        let index = Arc::new(InMemoryVectorIndex::new());
        setup_with_index(db, Arc::clone(&index) as Arc<dyn VectorIndex>, index).await
    }

    async fn setup_with_index(
        db: Arc<SurrealDbClient>,
        index: Arc<dyn VectorIndex>,
        mem_index: Arc<InMemoryVectorIndex>,
    ) -> Harness {
        let storage = StorageManager::new(&AppConfig::for_tests())
            .await
            .expect("storage");
        let registry = Arc::new(InMemoryFileRegistry::new());
        let mut splitters = SplitterRegistry::new();
        splitters.register("txt", Arc::new(LineSplitter));
        let pipeline = Arc::new(EmbeddingPipeline::new(
            Arc::new(HashedEmbeddings::new(DIMS)),
            storage.clone(),
            Arc::clone(&index),
            splitters,
            4,
        ));
        let service = VectorStoreService::new(
            Arc::clone(&db),
            index,
            Arc::clone(&registry) as Arc<dyn FileRegistry>,
            pipeline,
            "test-model".to_string(),
            DIMS,
        );
        Harness {
            service,
            index: mem_index,
            registry,
            storage,
            db,
        }
    }

    async fn seed_source_file(harness: &Harness, file_id: &str, file_name: &str, content: &[u8]) {
        let path = format!("uploads/{file_id}/{file_name}");
        harness
            .storage
            .put(&path, Bytes::from(content.to_vec()))
            .await
            .expect("put blob");
        harness.registry.insert(FileRecord::new(
            file_id.to_string(),
            file_name.to_string(),
            path,
            content.len() as i64,
        ));
    }

    fn create_params(name: &str, file_ids: Vec<String>) -> CreateVectorStoreParams {
        CreateVectorStoreParams {
            name: name.to_string(),
            file_ids,
            chunking_strategy: None,
            expires_after: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_validates_before_any_mutation() {
        let harness = setup().await;

        let empty_name = harness
            .service
            .create_vector_store("proj", create_params("", vec![]))
            .await;
        assert!(matches!(empty_name, Err(AppError::Validation(_))));

        let unknown_file = harness
            .service
            .create_vector_store("proj", create_params("store", vec!["ghost".into()]))
            .await;
        assert!(matches!(unknown_file, Err(AppError::Validation(_))));

        let mut too_many = create_params("store", vec![]);
        too_many.metadata = (0..17).map(|i| (format!("k{i}"), "v".to_string())).collect();
        let result = harness.service.create_vector_store("proj", too_many).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        // None of the failed validations may have touched the index.
        assert!(harness
            .index
            .list_collections()
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn test_create_twice_with_same_name_fails() {
        let harness = setup().await;

        harness
            .service
            .create_vector_store("proj", create_params("store", vec![]))
            .await
            .expect("first create");

        let second = harness
            .service
            .create_vector_store("proj", create_params("store", vec![]))
            .await;
        assert!(matches!(second, Err(AppError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_create_with_files_populates_counts() {
        let harness = setup().await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1\nline2").await;

        let mut params = create_params("store", vec!["file-1".into()]);
        params.metadata.insert("team".into(), "docs".into());
        let outcome = harness
            .service
            .create_vector_store("proj", params)
            .await
            .expect("create");

        assert!(outcome.file_failures.is_empty());
        let store = &outcome.vector_store;
        assert!(store.id.starts_with("vs_"));
        assert!(store
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_'));
        assert_eq!(store.file_counts.completed, 1);
        assert_eq!(store.file_counts.total, 1);
        assert_eq!(store.usage_bytes, 10);
        assert_eq!(store.status, CollectionStatus::Completed);
        assert_eq!(store.metadata.get("team").map(String::as_str), Some("docs"));

        // Chunks landed in the remote collection named by the external id.
        assert_eq!(harness.index.document_count(&store.id), 2);
    }

    #[tokio::test]
    async fn test_create_reports_partial_failures_next_to_the_store() {
        let harness = setup().await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1\nline2").await;
        // Exists in the registry but has no splitter mapping.
        seed_source_file(&harness, "file-2", "slides.pdf", b"%PDF").await;

        let outcome = harness
            .service
            .create_vector_store(
                "proj",
                create_params("store", vec!["file-1".into(), "file-2".into()]),
            )
            .await
            .expect("create succeeds despite the failed file");

        assert_eq!(outcome.file_failures.len(), 1);
        assert_eq!(outcome.file_failures[0].file_id, "file-2");
        // Counters reflect only the successful file.
        assert_eq!(outcome.vector_store.file_counts.completed, 1);
        assert_eq!(outcome.vector_store.file_counts.total, 1);

        let files = harness
            .service
            .list_vector_store_files("proj", &outcome.vector_store.id, 0, "", None)
            .await
            .expect("list files");
        assert_eq!(files.data.len(), 1);
        assert_eq!(files.data[0].id, "file-1");
    }

    #[tokio::test]
    async fn test_file_lifecycle_within_a_store() {
        let harness = setup().await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1\nline2").await;

        let store = harness
            .service
            .create_vector_store("proj", create_params("store", vec![]))
            .await
            .expect("create store")
            .vector_store;

        let file = harness
            .service
            .create_vector_store_file(
                "proj",
                &store.id,
                "file-1",
                Some(ChunkingStrategy::Static {
                    max_chunk_size_tokens: 800,
                    chunk_overlap_tokens: 400,
                }),
            )
            .await
            .expect("create file");
        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(
            file.chunking_strategy,
            ChunkingStrategy::Static {
                max_chunk_size_tokens: 800,
                chunk_overlap_tokens: 400
            }
        );
        assert_eq!(harness.index.document_count(&store.id), 2);

        // Duplicate (vector store, file) pairs are rejected.
        let duplicate = harness
            .service
            .create_vector_store_file("proj", &store.id, "file-1", None)
            .await;
        assert!(matches!(duplicate, Err(AppError::AlreadyExists(_))));

        let fetched = harness
            .service
            .get_vector_store_file("proj", &store.id, "file-1")
            .await
            .expect("get file");
        assert_eq!(fetched.usage_bytes, file.usage_bytes);

        let refreshed = harness
            .service
            .get_vector_store("proj", &store.id)
            .await
            .expect("get store");
        assert_eq!(refreshed.file_counts.completed, 1);
        assert_eq!(refreshed.usage_bytes, file.usage_bytes);

        harness
            .service
            .delete_vector_store_file("proj", &store.id, "file-1")
            .await
            .expect("delete file");
        assert_eq!(harness.index.document_count(&store.id), 0);

        let refreshed = harness
            .service
            .get_vector_store("proj", &store.id)
            .await
            .expect("get store after delete");
        assert_eq!(refreshed.file_counts.completed, 0);
        assert_eq!(refreshed.file_counts.total, 0);
        assert_eq!(refreshed.usage_bytes, 0);

        let missing = harness
            .service
            .delete_vector_store_file("proj", &store.id, "file-1")
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_store_and_file_are_not_found() {
        let harness = setup().await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1").await;

        let unknown_store = harness
            .service
            .create_vector_store_file("proj", "vs_ghost", "file-1", None)
            .await;
        assert!(matches!(unknown_store, Err(AppError::NotFound(_))));

        let store = harness
            .service
            .create_vector_store("proj", create_params("store", vec![]))
            .await
            .expect("create")
            .vector_store;
        let unknown_file = harness
            .service
            .create_vector_store_file("proj", &store.id, "ghost", None)
            .await;
        assert!(matches!(unknown_file, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_vector_stores_pages_through() {
        let harness = setup().await;
        for i in 0..3 {
            harness
                .service
                .create_vector_store("proj", create_params(&format!("store-{i}"), vec![]))
                .await
                .expect("create");
        }

        let first = harness
            .service
            .list_vector_stores("proj", 2, "asc", None)
            .await
            .expect("first page");
        assert_eq!(first.data.len(), 2);
        assert!(first.has_more);
        assert_eq!(first.data[0].name, "store-0");

        let second = harness
            .service
            .list_vector_stores("proj", 2, "asc", Some(first.last_id.clone()))
            .await
            .expect("second page");
        assert_eq!(second.data.len(), 1);
        assert!(!second.has_more);
        assert_eq!(second.data[0].name, "store-2");

        let invalid = harness
            .service
            .list_vector_stores("proj", -1, "", None)
            .await;
        assert!(matches!(invalid, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_reconciles_metadata_and_renames() {
        let harness = setup().await;
        let mut params = create_params("store", vec![]);
        params.metadata.insert("team".into(), "docs".into());
        params.metadata.insert("env".into(), "staging".into());
        let store = harness
            .service
            .create_vector_store("proj", params)
            .await
            .expect("create")
            .vector_store;

        let desired: HashMap<String, String> = [
            ("team".to_string(), "platform".to_string()),
            ("owner".to_string(), "search".to_string()),
        ]
        .into();
        let updated = harness
            .service
            .update_vector_store(
                "proj",
                &store.id,
                UpdateVectorStoreParams {
                    name: Some("renamed".into()),
                    expires_after: Some(crate::types::ExpiresAfter {
                        anchor: common::storage::types::collection::ExpiryAnchor::LastActiveAt,
                        days: 7,
                    }),
                    metadata: Some(desired.clone()),
                },
            )
            .await
            .expect("update");

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.metadata, desired);
        let expires_at = updated.expires_at.expect("expiry set");
        assert_eq!(expires_at, updated.last_active_at + 7 * 86_400);

        // Leaving metadata out keeps it untouched.
        let untouched = harness
            .service
            .update_vector_store("proj", &store.id, UpdateVectorStoreParams::default())
            .await
            .expect("noop update");
        assert_eq!(untouched.metadata, desired);

        let missing = harness
            .service
            .update_vector_store("proj", "vs_ghost", UpdateVectorStoreParams::default())
            .await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_vector_store_removes_everything_locally() {
        let harness = setup().await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1\nline2").await;

        let missing = harness.service.delete_vector_store("proj", "vs_ghost").await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));

        let mut params = create_params("store", vec!["file-1".into()]);
        params.metadata.insert("team".into(), "docs".into());
        let store = harness
            .service
            .create_vector_store("proj", params)
            .await
            .expect("create")
            .vector_store;

        harness
            .service
            .delete_vector_store("proj", &store.id)
            .await
            .expect("delete");

        assert!(matches!(
            harness.service.get_vector_store("proj", &store.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            harness
                .service
                .get_vector_store_file("proj", &store.id, "file-1")
                .await,
            Err(AppError::NotFound(_))
        ));
        assert!(harness
            .index
            .list_collections()
            .await
            .expect("list")
            .is_empty());
    }

    /// Wrapper double whose collection deletes always fail.
    struct FailingDeleteIndex {
        inner: Arc<InMemoryVectorIndex>,
    }

    #[async_trait]
    impl VectorIndex for FailingDeleteIndex {
        async fn create_collection(&self, name: &str, dimensions: usize) -> Result<i64, AppError> {
            self.inner.create_collection(name, dimensions).await
        }

        async fn delete_collection(&self, _name: &str) -> Result<(), AppError> {
            Err(AppError::InternalError("index offline".into()))
        }

        async fn rename_collection(&self, old: &str, new: &str) -> Result<(), AppError> {
            self.inner.rename_collection(old, new).await
        }

        async fn insert_documents(
            &self,
            name: &str,
            file_ids: Vec<String>,
            texts: Vec<String>,
            vectors: Vec<Vec<f32>>,
        ) -> Result<(), AppError> {
            self.inner.insert_documents(name, file_ids, texts, vectors).await
        }

        async fn delete_documents(&self, name: &str, file_id: &str) -> Result<(), AppError> {
            self.inner.delete_documents(name, file_id).await
        }

        async fn search(
            &self,
            name: &str,
            vector: Vec<f32>,
            k: usize,
        ) -> Result<Vec<String>, AppError> {
            self.inner.search(name, vector, k).await
        }

        async fn list_collections(&self) -> Result<Vec<i64>, AppError> {
            self.inner.list_collections().await
        }
    }

    #[tokio::test]
    async fn test_delete_succeeds_even_when_remote_deletion_fails() {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("initialize schema");
        let mem_index = Arc::new(InMemoryVectorIndex::new());
        let failing = Arc::new(FailingDeleteIndex {
            inner: Arc::clone(&mem_index),
        });
        let harness =
            setup_with_index(db, failing as Arc<dyn VectorIndex>, mem_index).await;
        seed_source_file(&harness, "file-1", "notes.txt", b"line1").await;

        let store = harness
            .service
            .create_vector_store("proj", create_params("store", vec!["file-1".into()]))
            .await
            .expect("create")
            .vector_store;

        // The local rows disappear atomically even though the remote
        // deletion call fails afterwards.
        harness
            .service
            .delete_vector_store("proj", &store.id)
            .await
            .expect("delete tolerates remote failure");

        assert!(matches!(
            harness.service.get_vector_store("proj", &store.id).await,
            Err(AppError::NotFound(_))
        ));
        let metadata = CollectionMetadata::list_by_vector_store(&store.id, &harness.db)
            .await
            .expect("metadata query");
        assert!(metadata.is_empty());
        // The remote collection is the documented dangling leftover.
        assert_eq!(harness.index.document_count(&store.id), 1);
    }
}
