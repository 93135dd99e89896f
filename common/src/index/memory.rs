use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AppError;

use super::{validate_batch, VectorIndex};

/// In-memory double of the vector index. Ranks by cosine similarity, which
/// is enough to exercise ordering-sensitive callers.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    collections: Mutex<HashMap<String, MemCollection>>,
    next_id: AtomicI64,
}

struct MemCollection {
    collection_id: i64,
    dimensions: usize,
    docs: Vec<MemDoc>,
}

struct MemDoc {
    file_id: String,
    text: String,
    embedding: Vec<f32>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held by a collection.
    pub fn document_count(&self, name: &str) -> usize {
        self.collections
            .lock()
            .expect("index lock poisoned")
            .get(name)
            .map_or(0, |c| c.docs.len())
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<i64, AppError> {
        let mut collections = self.collections.lock().expect("index lock poisoned");
        if collections.contains_key(name) {
            return Err(AppError::AlreadyExists(format!(
                "index collection {name:?}"
            )));
        }
        let collection_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        collections.insert(
            name.to_string(),
            MemCollection {
                collection_id,
                dimensions,
                docs: Vec::new(),
            },
        );
        Ok(collection_id)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), AppError> {
        self.collections
            .lock()
            .expect("index lock poisoned")
            .remove(name);
        Ok(())
    }

    async fn rename_collection(&self, old_name: &str, new_name: &str) -> Result<(), AppError> {
        let mut collections = self.collections.lock().expect("index lock poisoned");
        let collection = collections.remove(old_name).ok_or_else(|| {
            AppError::NotFound(format!("index collection {old_name:?}"))
        })?;
        collections.insert(new_name.to_string(), collection);
        Ok(())
    }

    async fn insert_documents(
        &self,
        name: &str,
        file_ids: Vec<String>,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), AppError> {
        let mut collections = self.collections.lock().expect("index lock poisoned");
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("index collection {name:?}")))?;
        validate_batch(&file_ids, &texts, &vectors, collection.dimensions)?;

        collection.docs.extend(
            file_ids
                .into_iter()
                .zip(texts)
                .zip(vectors)
                .map(|((file_id, text), embedding)| MemDoc {
                    file_id,
                    text,
                    embedding,
                }),
        );
        Ok(())
    }

    async fn delete_documents(&self, name: &str, file_id: &str) -> Result<(), AppError> {
        let mut collections = self.collections.lock().expect("index lock poisoned");
        if let Some(collection) = collections.get_mut(name) {
            collection.docs.retain(|doc| doc.file_id != file_id);
        }
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<String>, AppError> {
        let collections = self.collections.lock().expect("index lock poisoned");
        let collection = collections
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("index collection {name:?}")))?;

        let mut scored: Vec<(f32, &MemDoc)> = collection
            .docs
            .iter()
            .map(|doc| (cosine_similarity(&vector, &doc.embedding), doc))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, doc)| doc.text.clone())
            .collect())
    }

    async fn list_collections(&self) -> Result<Vec<i64>, AppError> {
        let collections = self.collections.lock().expect("index lock poisoned");
        let mut ids: Vec<i64> = collections.values().map(|c| c.collection_id).collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ranked_search_and_tolerant_deletes() {
        let index = InMemoryVectorIndex::new();
        index.create_collection("vs_a", 3).await.expect("create");

        index
            .insert_documents(
                "vs_a",
                vec!["file-1".into(), "file-2".into()],
                vec!["alpha".into(), "beta".into()],
                vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            )
            .await
            .expect("insert");
        assert_eq!(index.document_count("vs_a"), 2);

        let hits = index
            .search("vs_a", vec![0.9, 0.2, 0.0], 1)
            .await
            .expect("search");
        assert_eq!(hits, vec!["alpha".to_string()]);

        index
            .delete_documents("vs_a", "file-1")
            .await
            .expect("delete");
        index
            .delete_documents("vs_a", "file-1")
            .await
            .expect("tolerant delete");
        assert_eq!(index.document_count("vs_a"), 1);

        index.delete_collection("vs_a").await.expect("drop");
        index.delete_collection("vs_a").await.expect("tolerant drop");
    }

    #[tokio::test]
    async fn test_duplicate_collection_rejected() {
        let index = InMemoryVectorIndex::new();
        index.create_collection("vs_a", 3).await.expect("create");
        let duplicate = index.create_collection("vs_a", 3).await;
        assert!(matches!(duplicate, Err(AppError::AlreadyExists(_))));
    }
}
