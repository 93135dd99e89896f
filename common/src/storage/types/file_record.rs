use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(FileRecord, "file", {
    file_name: String,
    /// Blob store location of the uploaded content.
    path: String,
    size_bytes: i64
});

impl FileRecord {
    pub fn new(id: String, file_name: String, path: String, size_bytes: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            file_name,
            path,
            size_bytes,
        }
    }

    pub async fn get(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        db.get_item::<FileRecord>(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {id:?}")))
    }
}
