use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::file_record::FileRecord},
};

/// Lookup surface of the file manager consumed during validation and
/// ingestion.
#[async_trait]
pub trait FileRegistry: Send + Sync {
    async fn get_file(&self, id: &str) -> Result<FileRecord, AppError>;

    /// Resolve the blob store location of a file's content.
    async fn get_file_path(&self, id: &str) -> Result<String, AppError>;
}

/// Registry backed by the `file` table.
pub struct DbFileRegistry {
    db: Arc<SurrealDbClient>,
}

impl DbFileRegistry {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FileRegistry for DbFileRegistry {
    async fn get_file(&self, id: &str) -> Result<FileRecord, AppError> {
        FileRecord::get(id, &self.db).await
    }

    async fn get_file_path(&self, id: &str) -> Result<String, AppError> {
        Ok(FileRecord::get(id, &self.db).await?.path)
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use self::testing::InMemoryFileRegistry;

#[cfg(any(test, feature = "test-utils"))]
mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::{async_trait, AppError, FileRecord, FileRegistry};

    /// Map-backed registry for tests.
    #[derive(Default)]
    pub struct InMemoryFileRegistry {
        files: Mutex<HashMap<String, FileRecord>>,
    }

    impl InMemoryFileRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, record: FileRecord) {
            self.files
                .lock()
                .expect("registry lock poisoned")
                .insert(record.id.clone(), record);
        }
    }

    #[async_trait]
    impl FileRegistry for InMemoryFileRegistry {
        async fn get_file(&self, id: &str) -> Result<FileRecord, AppError> {
            self.files
                .lock()
                .expect("registry lock poisoned")
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("file {id:?}")))
        }

        async fn get_file_path(&self, id: &str) -> Result<String, AppError> {
            Ok(self.get_file(id).await?.path)
        }
    }
}
