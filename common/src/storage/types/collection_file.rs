use uuid::Uuid;

use crate::{
    error::AppError,
    storage::{
        db::{map_create_error, map_query_error, SurrealDbClient},
        pagination::{Page, PageCursor, PageRequest},
    },
    stored_object,
};

/// Processing state of a file within a vector store. Every state other than
/// `InProgress` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FileStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::InProgress => "in_progress",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LastErrorCode {
    None,
    ServerError,
    RateLimitExceeded,
}

/// Resolved chunking policy recorded on the file row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategyKind {
    Auto,
    Static,
}

stored_object!(CollectionFile, "collection_file", {
    file_id: String,
    project_id: String,
    vector_store_id: String,
    usage_bytes: i64,
    status: FileStatus,
    last_error_code: LastErrorCode,
    last_error_message: String,
    chunking_strategy_type: ChunkingStrategyKind,
    max_chunk_size_tokens: i64,
    chunk_overlap_tokens: i64,
    version: i64,
    row_id: i64
});

impl CollectionFile {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_id: String,
        project_id: String,
        vector_store_id: String,
        chunking_strategy_type: ChunkingStrategyKind,
        max_chunk_size_tokens: i64,
        chunk_overlap_tokens: i64,
        row_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            file_id,
            project_id,
            vector_store_id,
            usage_bytes: 0,
            status: FileStatus::InProgress,
            last_error_code: LastErrorCode::None,
            last_error_message: String::new(),
            chunking_strategy_type,
            max_chunk_size_tokens,
            chunk_overlap_tokens,
            version: 0,
            row_id,
        }
    }

    /// Drive the status machine. Transitions out of a terminal state are
    /// rejected; re-entering the same terminal state is a no-op, returning
    /// whether anything changed.
    pub fn transition(&mut self, next: FileStatus) -> Result<bool, AppError> {
        if self.status == next {
            return Ok(false);
        }
        if self.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "file {:?} status {} is terminal",
                self.file_id,
                self.status.as_str()
            )));
        }
        self.status = next;
        Ok(true)
    }

    pub async fn create(file: CollectionFile, db: &SurrealDbClient) -> Result<Self, AppError> {
        let described = format!(
            "file {:?} in vector store {:?}",
            file.file_id, file.vector_store_id
        );
        db.store_item(file.clone())
            .await
            .map_err(|e| map_create_error(&described, e))?;
        Ok(file)
    }

    pub async fn get(
        project_id: &str,
        vector_store_id: &str,
        file_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM collection_file \
                 WHERE project_id = $project_id AND vector_store_id = $vector_store_id AND file_id = $file_id \
                 LIMIT 1",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("vector_store_id", vector_store_id.to_string()))
            .bind(("file_id", file_id.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        rows.into_iter().next().ok_or_else(|| {
            AppError::NotFound(format!(
                "file {file_id:?} in vector store {vector_store_id:?}"
            ))
        })
    }

    /// Cursor pagination over the files of one vector store, ordered by
    /// `(created_at, row_id)` in the requested direction. Fetches one row
    /// past the limit to learn whether more rows exist.
    pub async fn list(
        project_id: &str,
        vector_store_id: &str,
        page: &PageRequest,
        db: &SurrealDbClient,
    ) -> Result<Page<Self>, AppError> {
        let cursor = match &page.after {
            Some(after_id) => {
                let row = Self::get(project_id, vector_store_id, after_id, db).await?;
                Some(PageCursor {
                    created_at: row.created_at,
                    row_id: row.row_id,
                })
            }
            None => None,
        };

        let beyond = page.order.beyond_operator();
        let keyword = page.order.sql_keyword();
        let mut query = String::from(
            "SELECT * FROM collection_file \
             WHERE project_id = $project_id AND vector_store_id = $vector_store_id",
        );
        if cursor.is_some() {
            query.push_str(&format!(
                " AND (created_at {beyond} $after_created_at \
                 OR (created_at = $after_created_at AND row_id {beyond} $after_row_id))"
            ));
        }
        query.push_str(&format!(
            " ORDER BY created_at {keyword}, row_id {keyword} LIMIT {}",
            page.limit + 1
        ));

        let mut prepared = db
            .query(query)
            .bind(("project_id", project_id.to_string()))
            .bind(("vector_store_id", vector_store_id.to_string()));
        if let Some(cursor) = cursor {
            prepared = prepared
                .bind((
                    "after_created_at",
                    surrealdb::sql::Datetime::from(cursor.created_at),
                ))
                .bind(("after_row_id", cursor.row_id));
        }

        let rows: Vec<Self> = prepared.await?.take(0)?;
        Ok(Page::from_rows(rows, page.limit as usize, |row| {
            row.file_id.clone()
        }))
    }

    /// Conditional update matched on (vector_store_id, file_id) and the
    /// observed version.
    pub async fn update(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();

        let mut response = db
            .query(
                "UPDATE collection_file CONTENT $next \
                 WHERE vector_store_id = $vector_store_id AND file_id = $file_id AND version = $version \
                 RETURN AFTER",
            )
            .bind(("next", next))
            .bind(("vector_store_id", self.vector_store_id.clone()))
            .bind(("file_id", self.file_id.clone()))
            .bind(("version", self.version))
            .await
            .map_err(map_query_error)?;
        let updated: Vec<Self> = response.take(0)?;

        updated.into_iter().next().ok_or_else(|| {
            AppError::ConcurrentUpdate(format!(
                "file {:?} in vector store {:?}",
                self.file_id, self.vector_store_id
            ))
        })
    }

    pub async fn delete(
        project_id: &str,
        vector_store_id: &str,
        file_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .query(
                "DELETE collection_file \
                 WHERE project_id = $project_id AND vector_store_id = $vector_store_id AND file_id = $file_id \
                 RETURN BEFORE",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("vector_store_id", vector_store_id.to_string()))
            .bind(("file_id", file_id.to_string()))
            .await?;
        let removed: Vec<Self> = response.take(0)?;
        removed.into_iter().next().ok_or_else(|| {
            AppError::NotFound(format!(
                "file {file_id:?} in vector store {vector_store_id:?}"
            ))
        })
    }
}
