use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::{map_create_error, map_query_error, SurrealDbClient, SENTINEL_NOT_FOUND},
};

use super::{validate_batch, VectorIndex};

/// Vector index backed by a dedicated SurrealDB connection: a registry table
/// for collections plus one chunk table carrying an HNSW index over the
/// embedding column. Collections share the configured dimensionality.
pub struct SurrealVectorIndex {
    db: SurrealDbClient,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct CollectionRow {
    name: String,
    collection_id: i64,
    dimensions: i64,
}

#[derive(Debug, Serialize)]
struct ChunkRow {
    id: String,
    collection: String,
    file_id: String,
    text: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    text: String,
    #[allow(dead_code)]
    distance: f64,
}

impl SurrealVectorIndex {
    /// Connect the index over an already-scoped client and define its
    /// schema. Safe to call on every startup.
    pub async fn new(db: SurrealDbClient, dimensions: usize) -> Result<Self, AppError> {
        db.query(format!(
            "DEFINE INDEX IF NOT EXISTS unique_index_collection_name ON TABLE index_collection FIELDS name UNIQUE;
             DEFINE INDEX IF NOT EXISTS idx_index_chunk_collection ON TABLE index_chunk FIELDS collection;
             DEFINE INDEX IF NOT EXISTS idx_index_chunk_embedding ON TABLE index_chunk FIELDS embedding HNSW DIMENSION {dimensions};"
        ))
        .await?
        .check()?;

        Ok(Self { db, dimensions })
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, AppError> {
        let mut response = self
            .db
            .query("SELECT VALUE collection_id FROM type::thing('index_collection', $name)")
            .bind(("name", name.to_string()))
            .await?;
        let ids: Vec<i64> = response.take(0)?;
        Ok(!ids.is_empty())
    }

    async fn next_collection_id(&self) -> Result<i64, AppError> {
        let mut response = self
            .db
            .query("UPSERT sequence:index_collection SET value = (value ?? 0) + 1 RETURN VALUE value")
            .await?;
        let values: Vec<i64> = response.take(0)?;
        values.into_iter().next().ok_or_else(|| {
            AppError::InternalError("collection sequence returned no value".to_string())
        })
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<i64, AppError> {
        if dimensions != self.dimensions {
            return Err(AppError::Validation(format!(
                "index is configured for dimension {}, got {dimensions}",
                self.dimensions
            )));
        }

        let collection_id = self.next_collection_id().await?;
        let row = CollectionRow {
            name: name.to_string(),
            collection_id,
            dimensions: dimensions as i64,
        };
        self.db
            .query("CREATE type::thing('index_collection', $name) CONTENT $row")
            .bind(("name", name.to_string()))
            .bind(("row", row))
            .await
            .map_err(|e| map_create_error(&format!("index collection {name:?}"), e))?
            .check()
            .map_err(|e| map_create_error(&format!("index collection {name:?}"), e))?;

        Ok(collection_id)
    }

    async fn delete_collection(&self, name: &str) -> Result<(), AppError> {
        self.db
            .query(
                "DELETE index_chunk WHERE collection = $name;
                 DELETE type::thing('index_collection', $name);",
            )
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn rename_collection(&self, old_name: &str, new_name: &str) -> Result<(), AppError> {
        let mutation = format!(
            r"
            BEGIN TRANSACTION;
            LET $existing = (SELECT * FROM type::thing('index_collection', $old_name));
            IF array::len($existing) == 0 {{ THROW '{SENTINEL_NOT_FOUND} index collection'; }};
            CREATE type::thing('index_collection', $new_name) CONTENT {{
                name: $new_name,
                collection_id: $existing[0].collection_id,
                dimensions: $existing[0].dimensions
            }};
            DELETE type::thing('index_collection', $old_name);
            UPDATE index_chunk SET collection = $new_name WHERE collection = $old_name;
            COMMIT TRANSACTION;
        "
        );

        self.db
            .query(mutation)
            .bind(("old_name", old_name.to_string()))
            .bind(("new_name", new_name.to_string()))
            .await
            .map_err(map_query_error)?
            .check()
            .map_err(map_query_error)?;
        Ok(())
    }

    async fn insert_documents(
        &self,
        name: &str,
        file_ids: Vec<String>,
        texts: Vec<String>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<(), AppError> {
        validate_batch(&file_ids, &texts, &vectors, self.dimensions)?;
        if !self.collection_exists(name).await? {
            return Err(AppError::NotFound(format!("index collection {name:?}")));
        }

        let rows: Vec<ChunkRow> = file_ids
            .into_iter()
            .zip(texts)
            .zip(vectors)
            .map(|((file_id, text), embedding)| ChunkRow {
                id: Uuid::new_v4().to_string(),
                collection: name.to_string(),
                file_id,
                text,
                embedding,
            })
            .collect();

        const INSERT_MUTATION: &str = r"
            BEGIN TRANSACTION;
            FOR $row IN $rows {
                CREATE type::thing('index_chunk', $row.id) CONTENT $row;
            };
            COMMIT TRANSACTION;
        ";

        self.db
            .query(INSERT_MUTATION)
            .bind(("rows", rows))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete_documents(&self, name: &str, file_id: &str) -> Result<(), AppError> {
        self.db
            .query("DELETE index_chunk WHERE collection = $name AND file_id = $file_id")
            .bind(("name", name.to_string()))
            .bind(("file_id", file_id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        k: usize,
    ) -> Result<Vec<String>, AppError> {
        if !self.collection_exists(name).await? {
            return Err(AppError::NotFound(format!("index collection {name:?}")));
        }

        let query = format!(
            "SELECT text, vector::distance::knn() AS distance FROM index_chunk \
             WHERE collection = $collection AND embedding <|{k},40|> $vector \
             ORDER BY distance ASC"
        );
        let mut response = self
            .db
            .query(query)
            .bind(("collection", name.to_string()))
            .bind(("vector", vector))
            .await?;
        let hits: Vec<SearchHit> = response.take(0)?;
        Ok(hits.into_iter().map(|hit| hit.text).collect())
    }

    async fn list_collections(&self) -> Result<Vec<i64>, AppError> {
        let mut response = self
            .db
            .query("SELECT VALUE collection_id FROM index_collection ORDER BY collection_id ASC")
            .await?;
        Ok(response.take(0)?)
    }
}
