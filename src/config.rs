//! `kgsync.toml` - storage, embedding and import settings
//!
//! Precedence: CLI flags, then `KGSYNC_*` environment variables, then the
//! file, then built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use crate::embedding::batcher::DEFAULT_BATCH_SIZE;
use crate::embedding::local::DEFAULT_LOCAL_MODEL;
use crate::embedding::ollama::{DEFAULT_OLLAMA_HOST, DEFAULT_OLLAMA_MODEL};
use crate::embedding::{Embedder, EmbeddingProvider, FastEmbedProvider, OllamaProvider};
use crate::import::{GraphMerge, ImportOptions};
use crate::retry::RetryPolicy;
use crate::storage::{Backends, Engine, EngineSelection};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KgsyncConfig {
    pub namespace: String,
    pub database: String,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub import: ImportConfig,
}

impl Default for KgsyncConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            database: default_database_path_in(Path::new("")).display().to_string(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

/// Engine per backend role, `sqlite` or `memory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kv: String,
    pub vector: String,
    pub graph: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kv: "sqlite".to_string(),
            vector: "sqlite".to_string(),
            graph: "sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `fastembed` (local) or `ollama`
    pub provider: String,
    /// Defaults per provider when unset
    pub model: Option<String>,
    /// Ollama base URL
    pub host: String,
    /// Expected vector length; learned from the first batch when unset
    pub dimension: Option<usize>,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "fastembed".to_string(),
            model: None,
            host: DEFAULT_OLLAMA_HOST.to_string(),
            dimension: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub reset: bool,
    pub full_reset: bool,
    /// `additive` or `replace`
    pub graph_merge: String,
    pub workers: usize,
    pub verify: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub lease_ttl_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let options = ImportOptions::default();
        Self {
            reset: options.reset,
            full_reset: options.full_reset,
            graph_merge: options.graph_merge.as_str().to_string(),
            workers: options.workers,
            verify: options.verify,
            max_attempts: options.retry.max_attempts,
            base_delay_ms: options.retry.base_delay.as_millis() as u64,
            max_delay_ms: options.retry.max_delay.as_millis() as u64,
            lease_ttl_secs: options.lease_ttl.as_secs(),
        }
    }
}

impl KgsyncConfig {
    /// Override fields from `KGSYNC_*` variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Like [`KgsyncConfig::apply_env`] with an explicit lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |name: &str, value: String| -> Result<usize> {
            value
                .parse()
                .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", name, value)))
        };

        if let Some(v) = lookup("KGSYNC_NAMESPACE") {
            self.namespace = v;
        }
        if let Some(v) = lookup("KGSYNC_DATABASE") {
            self.database = v;
        }
        if let Some(v) = lookup("KGSYNC_KV_STORAGE") {
            self.storage.kv = v;
        }
        if let Some(v) = lookup("KGSYNC_VECTOR_STORAGE") {
            self.storage.vector = v;
        }
        if let Some(v) = lookup("KGSYNC_GRAPH_STORAGE") {
            self.storage.graph = v;
        }
        if let Some(v) = lookup("KGSYNC_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Some(v) = lookup("KGSYNC_EMBEDDING_MODEL") {
            self.embedding.model = Some(v);
        }
        if let Some(v) = lookup("KGSYNC_EMBEDDING_HOST") {
            self.embedding.host = v;
        }
        if let Some(v) = lookup("KGSYNC_EMBEDDING_DIM") {
            self.embedding.dimension = Some(number("KGSYNC_EMBEDDING_DIM", v)?);
        }
        if let Some(v) = lookup("KGSYNC_BATCH_SIZE") {
            self.embedding.batch_size = number("KGSYNC_BATCH_SIZE", v)?;
        }
        if let Some(v) = lookup("KGSYNC_WORKERS") {
            self.import.workers = number("KGSYNC_WORKERS", v)?;
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.database)
    }

    /// Parsed engine names; unknown names are configuration errors
    pub fn engine_selection(&self) -> Result<EngineSelection> {
        Ok(EngineSelection {
            kv: self.storage.kv.parse()?,
            vector: self.storage.vector.parse()?,
            graph: self.storage.graph.parse()?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.import.max_attempts.max(1),
            base_delay: Duration::from_millis(self.import.base_delay_ms),
            max_delay: Duration::from_millis(self.import.max_delay_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn import_options(&self) -> Result<ImportOptions> {
        let graph_merge: GraphMerge = self.import.graph_merge.parse()?;
        Ok(ImportOptions {
            namespace: self.namespace.clone(),
            reset: self.import.reset,
            full_reset: self.import.full_reset,
            graph_merge,
            workers: self.import.workers.max(1),
            verify: self.import.verify,
            retry: self.retry_policy(),
            lease_ttl: Duration::from_secs(self.import.lease_ttl_secs),
            ..ImportOptions::default()
        })
    }

    /// Open the configured backends, creating the database directory when
    /// a role uses SQLite
    pub fn open_backends(&self) -> Result<Backends> {
        let selection = self.engine_selection()?;
        let db_path = self.database_path();
        if [selection.kv, selection.vector, selection.graph].contains(&Engine::Sqlite) {
            ensure_db_dir(&db_path)?;
        }
        Backends::open(selection, &db_path)
    }

    /// Build the configured embedding provider behind an [`Embedder`]
    pub fn build_embedder(&self) -> Result<Embedder> {
        let embedding = &self.embedding;
        let provider: Arc<dyn EmbeddingProvider> = match embedding.provider.to_lowercase().as_str() {
            "fastembed" | "local" => {
                let model = embedding.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
                Arc::new(FastEmbedProvider::new(model)?)
            }
            "ollama" => {
                let model = embedding.model.as_deref().unwrap_or(DEFAULT_OLLAMA_MODEL);
                Arc::new(OllamaProvider::new(
                    &embedding.host,
                    model,
                    embedding.dimension,
                    Duration::from_secs(embedding.timeout_secs),
                )?)
            }
            other => return Err(Error::Config(format!("Unknown embedding provider: {}", other))),
        };

        Ok(Embedder::new(provider, embedding.batch_size, self.retry_policy()))
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("kgsync.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".kgsync").join("kgsync.db")
}

pub fn load_config(path: Option<&Path>) -> Result<Option<KgsyncConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: KgsyncConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &KgsyncConfig, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "config already exists at {} (use --force to overwrite)",
            path.display()
        )));
    }

    let contents = toml::to_string_pretty(config).map_err(|e| Error::Config(e.to_string()))?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".kgsync/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendAdapter;
    use std::collections::HashMap;

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config: KgsyncConfig = toml::from_str(
            r#"
            namespace = "prod"

            [storage]
            vector = "memory"

            [embedding]
            provider = "ollama"
            model = "bge-m3"
            dimension = 1024

            [import]
            graph_merge = "replace"
            workers = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.namespace, "prod");
        assert_eq!(config.storage.kv, "sqlite");
        assert_eq!(config.embedding.dimension, Some(1024));
        assert_eq!(config.embedding.batch_size, DEFAULT_BATCH_SIZE);

        let selection = config.engine_selection().unwrap();
        assert_eq!(selection.vector, Engine::Memory);
        assert_eq!(selection.graph, Engine::Sqlite);

        let options = config.import_options().unwrap();
        assert_eq!(options.graph_merge, GraphMerge::Replace);
        assert_eq!(options.workers, 8);
        assert!(options.reset);
    }

    #[test]
    fn test_unknown_engine_is_fatal() {
        let mut config = KgsyncConfig::default();
        config.storage.graph = "neo4j".to_string();
        assert!(matches!(config.engine_selection(), Err(Error::Config(_))));
        assert!(matches!(config.open_backends(), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_provider_is_fatal() {
        let mut config = KgsyncConfig::default();
        config.embedding.provider = "openai".to_string();
        assert!(matches!(config.build_embedder(), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KGSYNC_NAMESPACE", "staging"),
            ("KGSYNC_KV_STORAGE", "memory"),
            ("KGSYNC_BATCH_SIZE", "4"),
        ]
        .into_iter()
        .collect();

        let mut config = KgsyncConfig::default();
        config
            .apply_env_from(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.namespace, "staging");
        assert_eq!(config.storage.kv, "memory");
        assert_eq!(config.embedding.batch_size, 4);

        let err = config
            .apply_env_from(|name| (name == "KGSYNC_WORKERS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("KGSYNC_WORKERS"));
    }

    #[test]
    fn test_write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kgsync.toml");
        let mut config = KgsyncConfig::default();
        config.namespace = "roundtrip".to_string();

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded, config);
        assert!(load_config(Some(&dir.path().join("missing.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_gitignore_entry_added_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/").unwrap();

        ensure_gitignore(dir.path()).unwrap();
        ensure_gitignore(dir.path()).unwrap();

        let content = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert_eq!(content, "target/\n.kgsync/\n");
    }

    #[test]
    fn test_open_memory_backends_without_database() {
        let mut config = KgsyncConfig::default();
        config.storage = StorageConfig {
            kv: "memory".into(),
            vector: "memory".into(),
            graph: "memory".into(),
        };
        config.database = "/nonexistent/dir/kg.db".to_string();
        let backends = config.open_backends().unwrap();
        assert_eq!(backends.graph.backend(), "memory-graph");
    }
}
