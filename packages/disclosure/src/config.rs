//! Application configuration loaded from environment variables.
//!
//! Loaded once at startup; components receive the settings by reference and
//! never read the environment themselves.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DisclosureError, Result};

/// Typed settings for the disclosure core.
#[derive(Debug, Clone)]
pub struct Settings {
    /// OpenAI API key. Required when any LLM-backed stage runs.
    pub openai_api_key: Option<String>,
    /// Chat model for extraction and analysis calls.
    pub openai_model: String,
    /// Embedding model for section mapping.
    pub openai_embedding_model: String,
    /// Per-request deadline for model calls.
    pub openai_timeout: Duration,
    /// Provider switch: "openai" (default) or "azure".
    pub openai_provider: String,
    pub azure_openai_endpoint: Option<String>,
    pub azure_openai_api_version: Option<String>,

    pub document_upload_max_files: usize,
    pub document_upload_max_file_size_mb: u64,
    /// Retention horizon applied to uploaded documents.
    pub document_retention_hours: i64,

    pub document_classification_use_llm: bool,
    pub document_classification_max_prompt_chars: usize,

    /// Broker/result backend URLs for the external job runner. Carried as
    /// opaque configuration; the core never dials them itself.
    pub broker_url: Option<String>,
    pub result_backend_url: Option<String>,

    /// Root directory for uploads/, metadata/, comparisons/ and progress/.
    pub storage_dir: PathBuf,
    /// Directory of per-document-type template files.
    pub templates_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: "gpt-4.1".to_string(),
            openai_embedding_model: "text-embedding-3-small".to_string(),
            openai_timeout: Duration::from_secs(120),
            openai_provider: "openai".to_string(),
            azure_openai_endpoint: None,
            azure_openai_api_version: None,
            document_upload_max_files: 5,
            document_upload_max_file_size_mb: 50,
            document_retention_hours: 24,
            document_classification_use_llm: true,
            document_classification_max_prompt_chars: 4000,
            broker_url: None,
            result_backend_url: None,
            storage_dir: PathBuf::from("storage"),
            templates_dir: PathBuf::from("templates"),
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults.
    ///
    /// Returns `Config` errors only for values that are present but
    /// unparseable; absent optional values fall back silently.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_model: env_opt("OPENAI_MODEL").unwrap_or(defaults.openai_model),
            openai_embedding_model: env_opt("OPENAI_EMBEDDING_MODEL")
                .unwrap_or(defaults.openai_embedding_model),
            openai_timeout: match env_opt("OPENAI_TIMEOUT_SECONDS") {
                Some(raw) => Duration::from_secs_f64(parse(&raw, "OPENAI_TIMEOUT_SECONDS")?),
                None => defaults.openai_timeout,
            },
            openai_provider: env_opt("OPENAI_PROVIDER").unwrap_or(defaults.openai_provider),
            azure_openai_endpoint: env_opt("AZURE_OPENAI_ENDPOINT"),
            azure_openai_api_version: env_opt("AZURE_OPENAI_API_VERSION"),
            document_upload_max_files: parse_or(
                "DOCUMENT_UPLOAD_MAX_FILES",
                defaults.document_upload_max_files,
            )?,
            document_upload_max_file_size_mb: parse_or(
                "DOCUMENT_UPLOAD_MAX_FILE_SIZE_MB",
                defaults.document_upload_max_file_size_mb,
            )?,
            document_retention_hours: parse_or(
                "DOCUMENT_RETENTION_HOURS",
                defaults.document_retention_hours,
            )?,
            document_classification_use_llm: parse_or(
                "DOCUMENT_CLASSIFICATION_USE_LLM",
                defaults.document_classification_use_llm,
            )?,
            document_classification_max_prompt_chars: parse_or(
                "DOCUMENT_CLASSIFICATION_MAX_PROMPT_CHARS",
                defaults.document_classification_max_prompt_chars,
            )?,
            broker_url: env_opt("BROKER_URL"),
            result_backend_url: env_opt("RESULT_BACKEND_URL"),
            storage_dir: env_opt("STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            templates_dir: env_opt("TEMPLATES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.templates_dir),
        })
    }

    /// The API key, or a `Config` error if it is missing.
    ///
    /// Called by components that cannot run without a model; startup fails
    /// fast instead of failing on the first model call.
    pub fn require_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| DisclosureError::Config("OPENAI_API_KEY not set".into()))
    }

    /// Whether the Azure provider is selected.
    pub fn uses_azure(&self) -> bool {
        self.openai_provider.eq_ignore_ascii_case("azure")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.storage_dir.join("uploads")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.storage_dir.join("metadata")
    }

    pub fn comparisons_dir(&self) -> PathBuf {
        self.storage_dir.join("comparisons")
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.storage_dir.join("progress")
    }

    /// Point all storage paths under the given root (used by tests).
    pub fn with_storage_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.storage_dir = dir.as_ref().to_path_buf();
        self
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| DisclosureError::Config(format!("invalid value for {key}: {raw:?}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_opt(key) {
        Some(raw) => parse(&raw, key),
        None => Ok(default),
    }
}
