//! Configuration for chunkhound
//!
//! Values are assembled by precedence (highest first): CLI arguments,
//! `CHUNKHOUND_*` environment variables, a local `.chunkhound.json` file
//! at the project root, built-in defaults. Environment variables mirror
//! the config hierarchy with double-underscore path segments, e.g.
//! `CHUNKHOUND_EMBEDDING__API_KEY`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Project-local config file name
pub const CONFIG_FILE: &str = ".chunkhound.json";

/// Environment variable prefix
const ENV_PREFIX: &str = "CHUNKHOUND_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse {0}: {1}")]
    Parse(String, String),
    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

/// Raw configuration as loaded; every field optional so the file and the
/// environment can each fill in part of the picture. Use the resolved
/// accessors (`database_path`, `embedding`, `indexing`, `mcp`) for
/// defaulted values.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseSection,
    pub embedding: EmbeddingSection,
    pub indexing: IndexingSection,
    pub mcp: McpSection,
    pub debug: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// On-disk location of the store (default: `<base>/.chunkhound/db`)
    pub path: Option<PathBuf>,
    /// Storage backend identifier
    pub provider: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub batch_size: Option<usize>,
    pub max_concurrent_batches: Option<usize>,
    pub timeout: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_batch_tokens: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct IndexingSection {
    pub include: Option<Vec<String>>,
    pub exclude: Option<Vec<String>>,
    pub watch: Option<bool>,
    pub debounce_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub db_batch_size: Option<usize>,
    pub max_concurrent: Option<usize>,
    pub max_file_size: Option<u64>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct McpSection {
    pub transport: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Resolved embedding settings (provider configured)
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub batch_size: usize,
    pub max_concurrent_batches: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_batch_tokens: usize,
}

/// Resolved indexing settings
#[derive(Debug, Clone)]
pub struct IndexingSettings {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub watch: bool,
    pub debounce_ms: u64,
    /// Concurrent `process_file` invocations on the one-shot path
    pub max_concurrent: usize,
    /// Rows per bulk INSERT statement
    pub db_batch_size: usize,
    pub max_file_size: u64,
}

/// MCP transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

/// Resolved MCP settings
#[derive(Debug, Clone)]
pub struct McpSettings {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Config {
    /// Load config for a base directory: defaults, then
    /// `.chunkhound.json`, then environment variables. CLI flags are
    /// applied on top by the caller.
    pub fn load(base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&base_dir.join(CONFIG_FILE))?.unwrap_or_default();
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file; None when it does not exist.
    pub fn load_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e.to_string()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(Some(config))
    }

    /// Overlay environment variables (`CHUNKHOUND_SECTION__OPTION`).
    /// Unknown keys are warnings, not errors, so newer configs do not
    /// break older binaries.
    pub fn apply_env(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), ConfigError> {
        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match path.to_ascii_lowercase().as_str() {
                "database__path" => self.database.path = Some(PathBuf::from(&value)),
                "database__provider" => self.database.provider = Some(value),
                "embedding__provider" => self.embedding.provider = Some(value),
                "embedding__api_key" => self.embedding.api_key = Some(value),
                "embedding__base_url" => self.embedding.base_url = Some(value),
                "embedding__model" => self.embedding.model = Some(value),
                "embedding__batch_size" => {
                    self.embedding.batch_size = Some(parse_env(&key, &value)?)
                }
                "embedding__max_concurrent_batches" => {
                    self.embedding.max_concurrent_batches = Some(parse_env(&key, &value)?)
                }
                "embedding__timeout" => self.embedding.timeout = Some(parse_env(&key, &value)?),
                "embedding__max_retries" => {
                    self.embedding.max_retries = Some(parse_env(&key, &value)?)
                }
                "embedding__max_batch_tokens" => {
                    self.embedding.max_batch_tokens = Some(parse_env(&key, &value)?)
                }
                "indexing__include" => {
                    self.indexing.include = Some(split_list(&value));
                }
                "indexing__exclude" => {
                    self.indexing.exclude = Some(split_list(&value));
                }
                "indexing__watch" => self.indexing.watch = Some(parse_env(&key, &value)?),
                "indexing__debounce_ms" => {
                    self.indexing.debounce_ms = Some(parse_env(&key, &value)?)
                }
                "indexing__batch_size" => {
                    self.indexing.batch_size = Some(parse_env(&key, &value)?)
                }
                "indexing__db_batch_size" => {
                    self.indexing.db_batch_size = Some(parse_env(&key, &value)?)
                }
                "indexing__max_concurrent" => {
                    self.indexing.max_concurrent = Some(parse_env(&key, &value)?)
                }
                "indexing__max_file_size" => {
                    self.indexing.max_file_size = Some(parse_env(&key, &value)?)
                }
                "mcp__transport" => self.mcp.transport = Some(value),
                "mcp__host" => self.mcp.host = Some(value),
                "mcp__port" => self.mcp.port = Some(parse_env(&key, &value)?),
                "debug" => self.debug = Some(parse_env(&key, &value)?),
                other => {
                    tracing::warn!(key = %other, "Unknown CHUNKHOUND_ environment variable, ignoring");
                }
            }
        }
        Ok(())
    }

    /// Reject configurations that cannot work before anything starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let provider = self.database_provider();
        if crate::store::capabilities_for(&provider).is_empty() {
            return Err(ConfigError::InvalidValue(format!(
                "Unknown database provider '{provider}'. Supported: sqlite"
            )));
        }
        if let Some(p) = &self.embedding.provider {
            if !matches!(p.as_str(), "openai" | "openai-compatible" | "tei" | "bge-in-icl") {
                return Err(ConfigError::InvalidValue(format!(
                    "Unknown embedding provider '{p}'. Supported: openai, openai-compatible, tei, bge-in-icl"
                )));
            }
        }
        if let Some(t) = &self.mcp.transport {
            if !matches!(t.as_str(), "stdio" | "http") {
                return Err(ConfigError::InvalidValue(format!(
                    "Unknown mcp transport '{t}'. Supported: stdio, http"
                )));
            }
        }
        Ok(())
    }

    // ===== Resolved accessors =====

    /// Storage backend identifier (default "sqlite")
    pub fn database_provider(&self) -> String {
        self.database
            .provider
            .clone()
            .unwrap_or_else(|| "sqlite".to_string())
    }

    /// On-disk database location for a base directory
    pub fn database_path(&self, base_dir: &Path) -> PathBuf {
        match &self.database.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_dir.join(path),
            None => base_dir.join(".chunkhound").join("db"),
        }
    }

    /// Embedding settings, None when no provider is configured
    pub fn embedding(&self) -> Option<EmbeddingSettings> {
        let provider = self.embedding.provider.clone()?;
        Some(EmbeddingSettings {
            provider,
            api_key: self.embedding.api_key.clone(),
            base_url: self.embedding.base_url.clone(),
            model: self
                .embedding
                .model
                .clone()
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            batch_size: self.embedding.batch_size.unwrap_or(100),
            max_concurrent_batches: self.embedding.max_concurrent_batches.unwrap_or(4),
            timeout_secs: self.embedding.timeout.unwrap_or(60),
            max_retries: self.embedding.max_retries.unwrap_or(3),
            max_batch_tokens: self.embedding.max_batch_tokens.unwrap_or(50_000),
        })
    }

    pub fn indexing(&self) -> IndexingSettings {
        IndexingSettings {
            include: self
                .indexing
                .include
                .clone()
                .unwrap_or_else(crate::discovery::FileFilter::default_includes),
            exclude: self.indexing.exclude.clone().unwrap_or_default(),
            watch: self.indexing.watch.unwrap_or(true),
            debounce_ms: self.indexing.debounce_ms.unwrap_or(500),
            max_concurrent: self.indexing.max_concurrent.unwrap_or(4).max(1),
            db_batch_size: self.indexing.db_batch_size.unwrap_or(500).clamp(1, 1000),
            max_file_size: self.indexing.max_file_size.unwrap_or(1024 * 1024),
        }
    }

    pub fn mcp(&self) -> McpSettings {
        let transport = match self.mcp.transport.as_deref() {
            Some("http") => Transport::Http,
            _ => Transport::Stdio,
        };
        McpSettings {
            transport,
            host: self
                .mcp
                .host
                .clone()
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.mcp.port.unwrap_or(3000),
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.unwrap_or(false)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{key}={value}: {e}")))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database_provider(), "sqlite");
        assert!(config.embedding().is_none());
        let indexing = config.indexing();
        assert!(indexing.watch);
        assert_eq!(indexing.debounce_ms, 500);
        assert_eq!(config.mcp().transport, Transport::Stdio);
        assert_eq!(config.mcp().host, "127.0.0.1");
    }

    #[test]
    fn test_load_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{
                "database": { "path": "custom/db" },
                "embedding": { "provider": "openai", "api_key": "sk-test" },
                "indexing": { "watch": false, "exclude": ["vendor/**"] },
                "mcp": { "transport": "http", "port": 8123 }
            }"#,
        )
        .unwrap();

        let config = Config::load_file(&path).unwrap().unwrap();
        assert_eq!(
            config.database_path(dir.path()),
            dir.path().join("custom/db")
        );
        let embedding = config.embedding().unwrap();
        assert_eq!(embedding.provider, "openai");
        assert_eq!(embedding.model, "text-embedding-3-small");
        assert!(!config.indexing().watch);
        assert_eq!(config.mcp().port, 8123);
        assert_eq!(config.mcp().transport, Transport::Http);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load_file(&dir.path().join(CONFIG_FILE))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "not json {{{").unwrap();
        assert!(Config::load_file(&path).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config {
            embedding: EmbeddingSection {
                provider: Some("openai".into()),
                api_key: Some("from-file".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        config
            .apply_env(vec![
                (
                    "CHUNKHOUND_EMBEDDING__API_KEY".to_string(),
                    "from-env".to_string(),
                ),
                ("CHUNKHOUND_MCP__PORT".to_string(), "9999".to_string()),
                ("UNRELATED".to_string(), "ignored".to_string()),
            ])
            .unwrap();

        assert_eq!(config.embedding().unwrap().api_key.as_deref(), Some("from-env"));
        assert_eq!(config.mcp().port, 9999);
    }

    #[test]
    fn test_env_invalid_number_rejected() {
        let mut config = Config::default();
        let err = config.apply_env(vec![(
            "CHUNKHOUND_MCP__PORT".to_string(),
            "not-a-port".to_string(),
        )]);
        assert!(err.is_err());
    }

    #[test]
    fn test_env_list_parsing() {
        let mut config = Config::default();
        config
            .apply_env(vec![(
                "CHUNKHOUND_INDEXING__EXCLUDE".to_string(),
                "vendor/**, gen/**".to_string(),
            )])
            .unwrap();
        assert_eq!(
            config.indexing().exclude,
            vec!["vendor/**".to_string(), "gen/**".to_string()]
        );
    }

    #[test]
    fn test_validate_rejects_unknown_providers() {
        let config = Config {
            database: DatabaseSection {
                provider: Some("mystery".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            embedding: EmbeddingSection {
                provider: Some("mystery".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_database_path() {
        let config = Config::default();
        assert_eq!(
            config.database_path(Path::new("/p1")),
            PathBuf::from("/p1/.chunkhound/db")
        );
    }
}
