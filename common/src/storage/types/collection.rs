use crate::{
    error::AppError,
    storage::{
        db::{
            map_query_error, SurrealDbClient, SENTINEL_CONCURRENT_UPDATE, SENTINEL_NOT_FOUND,
        },
        pagination::{Page, PageCursor, PageRequest},
        types::collection_metadata::{CollectionMetadata, MetadataChange},
    },
    stored_object,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    InProgress,
    Completed,
    Expired,
}

/// Anchor for the expiration window. Only the last-activity anchor is
/// supported.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryAnchor {
    LastActiveAt,
}

stored_object!(Collection, "collection", {
    /// Externally visible identifier; doubles as the name of the remote
    /// index collection, so it is restricted to [A-Za-z0-9_].
    vector_store_id: String,
    /// Numeric reference handed out by the remote index at creation time.
    collection_id: i64,
    project_id: String,
    name: String,
    usage_bytes: i64,
    file_counts_in_progress: i64,
    file_counts_completed: i64,
    file_counts_failed: i64,
    file_counts_cancelled: i64,
    file_counts_total: i64,
    status: CollectionStatus,
    anchor: Option<ExpiryAnchor>,
    expires_after_days: Option<i64>,
    /// Unix seconds; derived from the anchor time and the day window.
    expires_at: Option<i64>,
    last_active_at: i64,
    embedding_model: String,
    embedding_dimensions: i64,
    version: i64,
    row_id: i64
});

impl Collection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vector_store_id: String,
        collection_id: i64,
        project_id: String,
        name: String,
        embedding_model: String,
        embedding_dimensions: i64,
        row_id: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: vector_store_id.clone(),
            created_at: now,
            updated_at: now,
            vector_store_id,
            collection_id,
            project_id,
            name,
            usage_bytes: 0,
            file_counts_in_progress: 0,
            file_counts_completed: 0,
            file_counts_failed: 0,
            file_counts_cancelled: 0,
            file_counts_total: 0,
            status: CollectionStatus::InProgress,
            anchor: None,
            expires_after_days: None,
            expires_at: None,
            last_active_at: now.timestamp(),
            embedding_model,
            embedding_dimensions,
            version: 0,
            row_id,
        }
    }

    /// Set the expiration window and recompute the absolute expiry from the
    /// anchor time.
    pub fn set_expiration(&mut self, anchor: ExpiryAnchor, days: i64) {
        self.anchor = Some(anchor);
        self.expires_after_days = Some(days);
        self.refresh_expiry();
    }

    pub fn refresh_expiry(&mut self) {
        self.expires_at = self
            .expires_after_days
            .map(|days| self.last_active_at + days * 86_400);
    }

    /// Persist the collection together with its initial metadata rows in one
    /// atomic transaction. A unique-index collision on either the external
    /// id or (project_id, name) aborts the whole write.
    pub async fn create_with_metadata(
        collection: Collection,
        entries: Vec<CollectionMetadata>,
        db: &SurrealDbClient,
    ) -> Result<Collection, AppError> {
        const CREATE_MUTATION: &str = r"
            BEGIN TRANSACTION;
            CREATE type::thing('collection', $collection.vector_store_id) CONTENT $collection;
            FOR $entry IN $entries {
                CREATE type::thing('collection_metadata', $entry.id) CONTENT $entry;
            };
            COMMIT TRANSACTION;
        ";

        let described = format!("vector store {:?}", collection.name);
        db.query(CREATE_MUTATION)
            .bind(("collection", collection.clone()))
            .bind(("entries", entries))
            .await
            .map_err(map_query_error)?
            .check()
            .map_err(|e| match map_query_error(e) {
                AppError::AlreadyExists(_) => AppError::AlreadyExists(described.clone()),
                other => other,
            })?;

        Ok(collection)
    }

    pub async fn get(
        project_id: &str,
        vector_store_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM collection \
                 WHERE project_id = $project_id AND vector_store_id = $vector_store_id \
                 LIMIT 1",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("vector_store_id", vector_store_id.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("vector store {vector_store_id:?}")))
    }

    pub async fn get_by_name(
        project_id: &str,
        name: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut response = db
            .query(
                "SELECT * FROM collection \
                 WHERE project_id = $project_id AND name = $name \
                 LIMIT 1",
            )
            .bind(("project_id", project_id.to_string()))
            .bind(("name", name.to_string()))
            .await?;
        let rows: Vec<Self> = response.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("vector store named {name:?}")))
    }

    /// Cursor pagination over the collections of one project; see
    /// `CollectionFile::list` for the ordering contract.
    pub async fn list(
        project_id: &str,
        page: &PageRequest,
        db: &SurrealDbClient,
    ) -> Result<Page<Self>, AppError> {
        let cursor = match &page.after {
            Some(after_id) => {
                let row = Self::get(project_id, after_id, db).await?;
                Some(PageCursor {
                    created_at: row.created_at,
                    row_id: row.row_id,
                })
            }
            None => None,
        };

        let beyond = page.order.beyond_operator();
        let keyword = page.order.sql_keyword();
        let mut query = String::from("SELECT * FROM collection WHERE project_id = $project_id");
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

        let mut prepared = db.query(query).bind(("project_id", project_id.to_string()));
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
            row.vector_store_id.clone()
        }))
    }

    /// Conditional update matched on the external id and the observed
    /// version; zero affected rows signals a concurrent update and leaves
    /// the row untouched.
    pub async fn update(&self, db: &SurrealDbClient) -> Result<Self, AppError> {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();

        let mut response = db
            .query(
                "UPDATE collection CONTENT $next \
                 WHERE vector_store_id = $vector_store_id AND version = $version \
                 RETURN AFTER",
            )
            .bind(("next", next))
            .bind(("vector_store_id", self.vector_store_id.clone()))
            .bind(("version", self.version))
            .await
            .map_err(map_query_error)?;
        let updated: Vec<Self> = response.take(0)?;

        updated.into_iter().next().ok_or_else(|| {
            AppError::ConcurrentUpdate(format!("vector store {:?}", self.vector_store_id))
        })
    }

    /// Apply the CAS collection update and the metadata set-diff in one
    /// atomic transaction: created keys, CAS-checked value changes and
    /// removed keys all commit together or not at all.
    pub async fn update_with_metadata(
        &self,
        creates: Vec<CollectionMetadata>,
        changes: Vec<MetadataChange>,
        removals: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let mut next = self.clone();
        next.version = self.version + 1;
        next.updated_at = Utc::now();
        let returned = next.clone();

        let mutation = format!(
            r"
            BEGIN TRANSACTION;
            LET $updated = (
                UPDATE collection CONTENT $next
                WHERE vector_store_id = $vector_store_id AND version = $version
                RETURN AFTER
            );
            IF array::len($updated) == 0 {{ THROW '{SENTINEL_CONCURRENT_UPDATE} collection'; }};
            FOR $entry IN $creates {{
                CREATE type::thing('collection_metadata', $entry.id) CONTENT $entry;
            }};
            FOR $entry IN $changes {{
                LET $row = (
                    UPDATE collection_metadata
                    SET value = $entry.value, version = version + 1, updated_at = time::now()
                    WHERE vector_store_id = $vector_store_id AND key = $entry.key AND version = $entry.version
                    RETURN AFTER
                );
                IF array::len($row) == 0 {{ THROW '{SENTINEL_CONCURRENT_UPDATE} collection metadata'; }};
            }};
            FOR $key IN $removals {{
                DELETE collection_metadata WHERE vector_store_id = $vector_store_id AND key = $key;
            }};
            COMMIT TRANSACTION;
        "
        );

        db.query(mutation)
            .bind(("next", next))
            .bind(("vector_store_id", self.vector_store_id.clone()))
            .bind(("version", self.version))
            .bind(("creates", creates))
            .bind(("changes", changes))
            .bind(("removals", removals))
            .await
            .map_err(map_query_error)?
            .check()
            .map_err(map_query_error)?;

        Ok(returned)
    }

    /// Remove the collection, its metadata and its files in one atomic
    /// transaction. The remote index collection is the caller's concern.
    pub async fn delete_cascade(
        project_id: &str,
        vector_store_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mutation = format!(
            r"
            BEGIN TRANSACTION;
            LET $existing = (
                SELECT * FROM collection
                WHERE project_id = $project_id AND vector_store_id = $vector_store_id
            );
            IF array::len($existing) == 0 {{ THROW '{SENTINEL_NOT_FOUND} vector store'; }};
            DELETE collection WHERE project_id = $project_id AND vector_store_id = $vector_store_id;
            DELETE collection_metadata WHERE vector_store_id = $vector_store_id;
            DELETE collection_file WHERE vector_store_id = $vector_store_id;
            COMMIT TRANSACTION;
        "
        );

        db.query(mutation)
            .bind(("project_id", project_id.to_string()))
            .bind(("vector_store_id", vector_store_id.to_string()))
            .await
            .map_err(map_query_error)?
            .check()
            .map_err(map_query_error)?;

        Ok(())
    }
}
