use std::{ops::Deref, sync::Arc, time::Duration};

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tokio::time::sleep;
use tracing::warn;

use crate::error::AppError;

use super::types::StoredObject;

/// Sentinel embedded in `THROW` messages for a version-CAS miss.
pub const SENTINEL_CONCURRENT_UPDATE: &str = "store::concurrent_update";
/// Sentinel embedded in `THROW` messages when a required row is absent.
pub const SENTINEL_NOT_FOUND: &str = "store::not_found";

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

impl SurrealDbClient {
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Define the indexes backing the store's uniqueness and scan paths.
    /// Safe to call on every startup.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS unique_collection_vector_store_id ON TABLE collection FIELDS vector_store_id UNIQUE;
                 DEFINE INDEX IF NOT EXISTS unique_collection_project_name ON TABLE collection FIELDS project_id, name UNIQUE;
                 DEFINE INDEX IF NOT EXISTS unique_collection_file_ref ON TABLE collection_file FIELDS vector_store_id, file_id UNIQUE;
                 DEFINE INDEX IF NOT EXISTS unique_collection_metadata_key ON TABLE collection_metadata FIELDS vector_store_id, key UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_collection_project ON TABLE collection FIELDS project_id;
                 DEFINE INDEX IF NOT EXISTS idx_collection_file_store ON TABLE collection_file FIELDS vector_store_id;
                 DEFINE INDEX IF NOT EXISTS idx_collection_metadata_store ON TABLE collection_metadata FIELDS vector_store_id;",
            )
            .await?
            .check()?;
        Ok(())
    }

    /// Allocate the next value of the persistent row sequence.
    ///
    /// Row ids are strictly monotone and back the pagination tie-break, so a
    /// gap left by an aborted caller is harmless. Engine-level write
    /// conflicts on the counter record are retried with a short backoff.
    pub async fn next_row_id(&self) -> Result<i64, AppError> {
        const MAX_ATTEMPTS: usize = 3;
        let mut backoff_ms = 25u64;

        for attempt in 0..MAX_ATTEMPTS {
            let result = self
                .client
                .query("UPSERT sequence:row_id SET value = (value ?? 0) + 1 RETURN VALUE value")
                .await;

            match result {
                Ok(mut response) => {
                    let values: Vec<i64> = response.take(0)?;
                    return values.into_iter().next().ok_or_else(|| {
                        AppError::InternalError("row sequence returned no value".to_string())
                    });
                }
                Err(err) if is_retryable_conflict(&err) && attempt + 1 < MAX_ATTEMPTS => {
                    warn!(attempt = attempt + 1, "row sequence write conflict; retrying");
                    sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                Err(err) => return Err(AppError::from(err)),
            }
        }

        Err(AppError::InternalError(
            "failed to allocate row id after retries".to_string(),
        ))
    }

    /// Store an object under its own id, requires the struct to implement StoredObject
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Retrieve a single object by its id, requires the struct to implement StoredObject
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Delete a single object by its id, requires the struct to implement StoredObject
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

fn is_retryable_conflict(error: &Error) -> bool {
    error
        .to_string()
        .contains("Failed to commit transaction due to a read or write conflict")
}

/// Translate an engine error raised by a create into the store taxonomy.
pub fn map_create_error(what: &str, err: Error) -> AppError {
    let text = err.to_string();
    if text.contains("already contains") || text.contains("already exists") {
        AppError::AlreadyExists(what.to_string())
    } else {
        AppError::from(err)
    }
}

/// Translate an engine error that may carry one of the `THROW` sentinels.
pub fn map_query_error(err: Error) -> AppError {
    let text = err.to_string();
    if let Some(detail) = sentinel_detail(&text, SENTINEL_CONCURRENT_UPDATE) {
        AppError::ConcurrentUpdate(detail)
    } else if let Some(detail) = sentinel_detail(&text, SENTINEL_NOT_FOUND) {
        AppError::NotFound(detail)
    } else if text.contains("already contains") || text.contains("already exists") {
        AppError::AlreadyExists(text)
    } else {
        AppError::from(err)
    }
}

fn sentinel_detail(text: &str, sentinel: &str) -> Option<String> {
    text.find(sentinel)
        .map(|at| text[at + sentinel.len()..].trim().to_string())
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
