use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    /// Namespace/database pair holding the vector index tables. The index is
    /// addressed through its own connection so it can fail independently of
    /// the resource store.
    #[serde(default = "default_index_namespace")]
    pub index_namespace: String,
    #[serde(default = "default_index_database")]
    pub index_database: String,
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Heuristic ratio used to convert token budgets into character budgets
    /// before splitting.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
}

fn default_index_namespace() -> String {
    "vector_index".to_string()
}

fn default_index_database() -> String {
    "primary".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_chars_per_token() -> usize {
    4
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// Configuration suitable for tests: in-memory blob storage, throwaway
    /// credentials.
    pub fn for_tests() -> Self {
        AppConfig {
            surrealdb_address: "mem://".into(),
            surrealdb_username: "test".into(),
            surrealdb_password: "test".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            index_namespace: "test_index".into(),
            index_database: "primary".into(),
            openai_api_key: "test".into(),
            openai_base_url: default_base_url(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            data_dir: "/tmp/unused".into(),
            storage: StorageKind::Memory,
            chars_per_token: default_chars_per_token(),
        }
    }
}
