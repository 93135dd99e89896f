use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use common::{
    error::AppError,
    storage::types::{
        collection::{Collection, CollectionStatus, ExpiryAnchor},
        collection_file::{ChunkingStrategyKind, CollectionFile, FileStatus, LastErrorCode},
        collection_metadata::CollectionMetadata,
    },
};

pub const MIN_MAX_CHUNK_SIZE_TOKENS: i64 = 100;
pub const MAX_MAX_CHUNK_SIZE_TOKENS: i64 = 4096;
pub const DEFAULT_MAX_CHUNK_SIZE_TOKENS: i64 = 800;
pub const DEFAULT_CHUNK_OVERLAP_TOKENS: i64 = 400;

/// Chunking policy of a file. The static variant carries caller-specified
/// bounds; they are only meaningful together, hence the tagged union.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkingStrategy {
    Auto,
    Static {
        max_chunk_size_tokens: i64,
        chunk_overlap_tokens: i64,
    },
}

/// Chunking parameters after defaulting and validation, as recorded on the
/// file row and handed to the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedChunkingStrategy {
    pub kind: ChunkingStrategyKind,
    pub max_chunk_size_tokens: i64,
    pub chunk_overlap_tokens: i64,
}

impl ChunkingStrategy {
    /// Validate the requested strategy and fill in the defaults. An absent
    /// strategy selects `auto`.
    pub fn resolve(
        requested: Option<ChunkingStrategy>,
    ) -> Result<ResolvedChunkingStrategy, AppError> {
        match requested {
            None | Some(ChunkingStrategy::Auto) => Ok(ResolvedChunkingStrategy {
                kind: ChunkingStrategyKind::Auto,
                max_chunk_size_tokens: DEFAULT_MAX_CHUNK_SIZE_TOKENS,
                chunk_overlap_tokens: DEFAULT_CHUNK_OVERLAP_TOKENS,
            }),
            Some(ChunkingStrategy::Static {
                max_chunk_size_tokens,
                chunk_overlap_tokens,
            }) => {
                if max_chunk_size_tokens < MIN_MAX_CHUNK_SIZE_TOKENS {
                    return Err(AppError::Validation(format!(
                        "chunk size tokens must be no less than {MIN_MAX_CHUNK_SIZE_TOKENS}"
                    )));
                }
                if max_chunk_size_tokens > MAX_MAX_CHUNK_SIZE_TOKENS {
                    return Err(AppError::Validation(format!(
                        "chunk size tokens must be no more than {MAX_MAX_CHUNK_SIZE_TOKENS}"
                    )));
                }
                if chunk_overlap_tokens <= 0 {
                    return Err(AppError::Validation(
                        "chunk overlap tokens must be greater than 0".to_string(),
                    ));
                }
                if chunk_overlap_tokens > max_chunk_size_tokens / 2 {
                    return Err(AppError::Validation(format!(
                        "chunk overlap tokens must be no more than {}",
                        max_chunk_size_tokens / 2
                    )));
                }
                Ok(ResolvedChunkingStrategy {
                    kind: ChunkingStrategyKind::Static,
                    max_chunk_size_tokens,
                    chunk_overlap_tokens,
                })
            }
        }
    }
}

/// Expiration policy request: a window of days anchored to the store's last
/// activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiresAfter {
    pub anchor: ExpiryAnchor,
    pub days: i64,
}

impl ExpiresAfter {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.days <= 0 {
            return Err(AppError::Validation(
                "expires_after.days must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateVectorStoreParams {
    pub name: String,
    pub file_ids: Vec<String>,
    pub chunking_strategy: Option<ChunkingStrategy>,
    pub expires_after: Option<ExpiresAfter>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateVectorStoreParams {
    pub name: Option<String>,
    pub expires_after: Option<ExpiresAfter>,
    /// When present, the stored metadata is reconciled to exactly this map;
    /// when absent it is left untouched.
    pub metadata: Option<HashMap<String, String>>,
}

/// One file that could not be ingested during `create_vector_store`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileIngestFailure {
    pub file_id: String,
    pub error: String,
}

/// Result of `create_vector_store`: the store is created even when some of
/// the requested files failed, so the failures travel next to the resource
/// instead of replacing it.
#[derive(Debug, Clone, Serialize)]
pub struct CreateVectorStoreOutcome {
    pub vector_store: VectorStore,
    pub file_failures: Vec<FileIngestFailure>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct FileCounts {
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Externally visible representation of a collection.
#[derive(Debug, Clone, Serialize)]
pub struct VectorStore {
    pub id: String,
    pub created_at: i64,
    pub name: String,
    pub usage_bytes: i64,
    pub file_counts: FileCounts,
    pub status: CollectionStatus,
    pub expires_after: Option<ExpiresAfter>,
    pub expires_at: Option<i64>,
    pub last_active_at: i64,
    pub metadata: HashMap<String, String>,
}

impl VectorStore {
    pub fn from_parts(collection: Collection, entries: Vec<CollectionMetadata>) -> Self {
        let metadata = entries
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect();
        let expires_after = match (collection.anchor, collection.expires_after_days) {
            (Some(anchor), Some(days)) => Some(ExpiresAfter { anchor, days }),
            _ => None,
        };
        VectorStore {
            id: collection.vector_store_id,
            created_at: collection.created_at.timestamp(),
            name: collection.name,
            usage_bytes: collection.usage_bytes,
            file_counts: FileCounts {
                in_progress: collection.file_counts_in_progress,
                completed: collection.file_counts_completed,
                failed: collection.file_counts_failed,
                cancelled: collection.file_counts_cancelled,
                total: collection.file_counts_total,
            },
            status: collection.status,
            expires_after,
            expires_at: collection.expires_at,
            last_active_at: collection.last_active_at,
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileLastError {
    pub code: LastErrorCode,
    pub message: String,
}

/// Externally visible representation of a file within a vector store.
#[derive(Debug, Clone, Serialize)]
pub struct VectorStoreFile {
    pub id: String,
    pub created_at: i64,
    pub vector_store_id: String,
    pub usage_bytes: i64,
    pub status: FileStatus,
    pub last_error: Option<FileLastError>,
    pub chunking_strategy: ChunkingStrategy,
}

impl From<CollectionFile> for VectorStoreFile {
    fn from(file: CollectionFile) -> Self {
        let last_error = match file.last_error_code {
            LastErrorCode::None => None,
            code => Some(FileLastError {
                code,
                message: file.last_error_message,
            }),
        };
        let chunking_strategy = match file.chunking_strategy_type {
            ChunkingStrategyKind::Auto => ChunkingStrategy::Auto,
            ChunkingStrategyKind::Static => ChunkingStrategy::Static {
                max_chunk_size_tokens: file.max_chunk_size_tokens,
                chunk_overlap_tokens: file.chunk_overlap_tokens,
            },
        };
        VectorStoreFile {
            id: file.file_id,
            created_at: file.created_at.timestamp(),
            vector_store_id: file.vector_store_id,
            usage_bytes: file.usage_bytes,
            status: file.status,
            last_error,
            chunking_strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_strategy_defaults_to_auto() {
        let resolved = ChunkingStrategy::resolve(None).expect("resolve");
        assert_eq!(resolved.kind, ChunkingStrategyKind::Auto);
        assert_eq!(resolved.max_chunk_size_tokens, DEFAULT_MAX_CHUNK_SIZE_TOKENS);
        assert_eq!(resolved.chunk_overlap_tokens, DEFAULT_CHUNK_OVERLAP_TOKENS);

        let resolved =
            ChunkingStrategy::resolve(Some(ChunkingStrategy::Auto)).expect("resolve auto");
        assert_eq!(resolved.kind, ChunkingStrategyKind::Auto);
    }

    #[test]
    fn test_static_strategy_bounds() {
        // Too small.
        let result = ChunkingStrategy::resolve(Some(ChunkingStrategy::Static {
            max_chunk_size_tokens: 50,
            chunk_overlap_tokens: 10,
        }));
        assert!(matches!(result, Err(AppError::Validation(_))));

        // Too large.
        let result = ChunkingStrategy::resolve(Some(ChunkingStrategy::Static {
            max_chunk_size_tokens: 5000,
            chunk_overlap_tokens: 10,
        }));
        assert!(matches!(result, Err(AppError::Validation(_))));

        // Zero overlap.
        let result = ChunkingStrategy::resolve(Some(ChunkingStrategy::Static {
            max_chunk_size_tokens: 800,
            chunk_overlap_tokens: 0,
        }));
        assert!(matches!(result, Err(AppError::Validation(_))));

        // Overlap beyond half of the chunk size.
        let result = ChunkingStrategy::resolve(Some(ChunkingStrategy::Static {
            max_chunk_size_tokens: 800,
            chunk_overlap_tokens: 401,
        }));
        assert!(matches!(result, Err(AppError::Validation(_))));

        // Accepted at the boundary.
        let resolved = ChunkingStrategy::resolve(Some(ChunkingStrategy::Static {
            max_chunk_size_tokens: 800,
            chunk_overlap_tokens: 400,
        }))
        .expect("valid static strategy");
        assert_eq!(resolved.kind, ChunkingStrategyKind::Static);
        assert_eq!(resolved.max_chunk_size_tokens, 800);
        assert_eq!(resolved.chunk_overlap_tokens, 400);
    }

    #[test]
    fn test_expires_after_validation() {
        let valid = ExpiresAfter {
            anchor: ExpiryAnchor::LastActiveAt,
            days: 7,
        };
        valid.validate().expect("valid window");

        let invalid = ExpiresAfter {
            anchor: ExpiryAnchor::LastActiveAt,
            days: 0,
        };
        assert!(matches!(invalid.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_file_view_carries_static_bounds() {
        let mut file = CollectionFile::new(
            "file-1".into(),
            "proj".into(),
            "vs_a".into(),
            ChunkingStrategyKind::Static,
            800,
            400,
            1,
        );
        file.usage_bytes = 128;
        let view = VectorStoreFile::from(file);
        assert_eq!(view.id, "file-1");
        assert_eq!(view.usage_bytes, 128);
        assert!(view.last_error.is_none());
        assert_eq!(
            view.chunking_strategy,
            ChunkingStrategy::Static {
                max_chunk_size_tokens: 800,
                chunk_overlap_tokens: 400
            }
        );
    }
}
