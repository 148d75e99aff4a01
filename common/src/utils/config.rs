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
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    /// Base directory of the immutable raw-file store.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    /// Base directory of the staging store bridging the raw store and the
    /// vector service's server-to-server import path. Staged imports are
    /// skipped when unset.
    #[serde(default)]
    pub staging_dir: Option<String>,
    /// Endpoint of the managed vector-retrieval service. When unset the
    /// engine falls back to local extraction for every document.
    #[serde(default)]
    pub vector_index_url: Option<String>,
    #[serde(default)]
    pub vector_index_api_key: Option<String>,
    #[serde(default = "default_vector_index_timeout_secs")]
    pub vector_index_timeout_secs: u64,
    #[serde(default = "default_summarizer_model")]
    pub summarizer_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
}

impl Default for StorageKind {
    fn default() -> Self {
        default_storage_kind()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            data_dir: default_data_dir(),
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            staging_dir: None,
            vector_index_url: None,
            vector_index_api_key: None,
            vector_index_timeout_secs: default_vector_index_timeout_secs(),
            summarizer_model: default_summarizer_model(),
            embedding_backend: default_embedding_backend(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
        }
    }
}

impl AppConfig {
    pub fn vector_index_enabled(&self) -> bool {
        self.vector_index_url.is_some()
    }

    pub fn staging_configured(&self) -> bool {
        self.staging_dir.is_some()
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_vector_index_timeout_secs() -> u64 {
    30
}

fn default_summarizer_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_backend() -> String {
    "fastembed".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
