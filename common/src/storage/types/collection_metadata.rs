use uuid::Uuid;

use crate::{
    error::AppError,
    storage::db::{map_create_error, map_query_error, SurrealDbClient},
    stored_object,
};

stored_object!(CollectionMetadata, "collection_metadata", {
    vector_store_id: String,
    key: String,
    value: String,
    version: i64
});

/// One CAS-checked value change, bound into the metadata reconciliation
/// transaction.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataChange {
    pub key: String,
    pub value: String,
    pub version: i64,
}

impl CollectionMetadata {
    pub fn new(vector_store_id: String, key: String, value: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            vector_store_id,
            key,
            value,
            version: 0,
        }
    }

    pub async fn create(entry: CollectionMetadata, db: &SurrealDbClient) -> Result<Self, AppError> {
        let described = format!("metadata key {:?}", entry.key);
        db.store_item(entry.clone())
            .await
            .map_err(|e| map_create_error(&described, e))?;
        Ok(entry)
    }

    pub async fn list_by_vector_store(
        vector_store_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM collection_metadata WHERE vector_store_id = $vector_store_id ORDER BY key ASC")
            .bind(("vector_store_id", vector_store_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Conditional update matched on (vector_store_id, key) and the observed
    /// version; zero affected rows signals a concurrent update.
    pub async fn update(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();

        let mut response = db
            .query(
                "UPDATE collection_metadata CONTENT $next \
                 WHERE vector_store_id = $vector_store_id AND key = $key AND version = $version \
                 RETURN AFTER",
            )
            .bind(("next", next))
            .bind(("vector_store_id", self.vector_store_id.clone()))
            .bind(("key", self.key.clone()))
            .bind(("version", self.version))
            .await
            .map_err(map_query_error)?;
        let updated: Vec<Self> = response.take(0)?;

        updated.into_iter().next().ok_or_else(|| {
            AppError::ConcurrentUpdate(format!(
                "metadata key {:?} of vector store {:?}",
                self.key, self.vector_store_id
            ))
        })
    }

    pub async fn delete(
        vector_store_id: &str,
        key: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut response = db
            .query(
                "DELETE collection_metadata \
                 WHERE vector_store_id = $vector_store_id AND key = $key \
                 RETURN BEFORE",
            )
            .bind(("vector_store_id", vector_store_id.to_string()))
            .bind(("key", key.to_string()))
            .await?;
        let removed: Vec<Self> = response.take(0)?;
        if removed.is_empty() {
            return Err(AppError::NotFound(format!(
                "metadata key {key:?} of vector store {vector_store_id:?}"
            )));
        }
        Ok(())
    }

    pub async fn delete_all(vector_store_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.query("DELETE collection_metadata WHERE vector_store_id = $vector_store_id")
            .bind(("vector_store_id", vector_store_id.to_string()))
            .await?;
        Ok(())
    }
}
