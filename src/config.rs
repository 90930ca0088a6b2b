//! Configuration for gambit paths and providers.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (GAMBIT_HOME)
//! 2. Config file (.gambit/config.yaml, discovered upward from the
//!    current directory)
//! 3. Defaults (~/.gambit)

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::engine::EngineLimits;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub limits: Option<EngineLimits>,

    #[serde(default)]
    pub generation: Option<GenerationConfig>,

    #[serde(default)]
    pub embeddings: Option<EmbeddingsConfig>,
}

/// Generation endpoint settings; absent means the deterministic stub
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Embeddings endpoint settings; absent means the hash-derived stub
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to gambit home (engine state)
    pub home: PathBuf,

    /// Engine traversal limits
    pub limits: EngineLimits,

    /// Generation endpoint, when configured
    pub generation: Option<GenerationConfig>,

    /// Embeddings endpoint, when configured
    pub embeddings: Option<EmbeddingsConfig>,

    /// Path to the config file, if one was found
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.home.join("gambit.db")
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".gambit").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".gambit");

    let config_path = find_config_file();
    let file = match config_path {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let home = if let Ok(env_home) = std::env::var("GAMBIT_HOME") {
        PathBuf::from(env_home)
    } else if let Some(ref home) = file.home {
        let base = config_path
            .as_ref()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let path = PathBuf::from(home);
        if path.is_absolute() {
            path
        } else {
            base.join(path)
        }
    } else {
        default_home
    };

    Ok(ResolvedConfig {
        home,
        limits: file.limits.unwrap_or_default(),
        generation: file.generation,
        embeddings: file.embeddings,
        config_file: config_path,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let gambit_dir = temp.path().join(".gambit");
        std::fs::create_dir_all(&gambit_dir).unwrap();

        let config_path = gambit_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
home: ./state
limits:
  max_steps: 25
generation:
  base_url: http://localhost:8080/v1
  model: local-model
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.home, Some("./state".to_string()));
        assert_eq!(config.limits.unwrap().max_steps, 25);

        let generation = config.generation.unwrap();
        assert_eq!(generation.base_url, "http://localhost:8080/v1");
        assert_eq!(generation.model, "local-model");
    }

    #[test]
    fn test_empty_config_file_uses_defaults() {
        let config: ConfigFile = serde_yaml::from_str("{}").unwrap();
        assert!(config.home.is_none());
        assert!(config.limits.is_none());
        assert!(config.generation.is_none());
    }

    #[test]
    fn test_database_path_under_home() {
        let config = ResolvedConfig {
            home: PathBuf::from("/data/gambit"),
            limits: EngineLimits::default(),
            generation: None,
            embeddings: None,
            config_file: None,
        };

        assert_eq!(config.database_path(), PathBuf::from("/data/gambit/gambit.db"));
    }
}
