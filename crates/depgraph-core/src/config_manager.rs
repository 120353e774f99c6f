use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

pub const LOCAL_CONFIG_FILE: &str = ".depgraph.toml";
pub const DATA_DIR_NAME: &str = ".depgraph";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::DepGraphError {
    fn from(e: ConfigError) -> Self {
        crate::DepGraphError::Config(e.to_string())
    }
}

/// Main configuration for a DepGraph workspace engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DepGraphConfig {
    /// File change coalescing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Persistent analysis cache
    #[serde(default)]
    pub cache: AnalysisCacheConfig,

    /// Progress reporting
    #[serde(default)]
    pub status: StatusConfig,

    /// Parser runtime and grammars
    #[serde(default)]
    pub parser: ParserConfig,

    /// Reverse dependency index
    #[serde(default)]
    pub index: IndexConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Quiet period before a changed file is reanalyzed (ms)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCacheConfig {
    /// Disable to run without cached verdicts
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum cached source files (never below 10)
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    /// Cache file; defaults to `<root>/.depgraph/analysis-cache.json`
    #[serde(default)]
    pub cache_file: Option<PathBuf>,
}

impl Default for AnalysisCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_max_entries(),
            cache_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Minimum spacing between progress notifications (ms)
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParserConfig {
    /// Parser runtime module handed to `ParserFactory::init`
    #[serde(default)]
    pub runtime_module_path: Option<PathBuf>,

    /// Directory holding per-language grammar artifacts
    #[serde(default)]
    pub grammar_dir: Option<PathBuf>,
}

impl ParserConfig {
    /// `<grammar_dir>/tree-sitter-<language>.wasm` when a grammar directory is set
    pub fn grammar_path(&self, language: &str) -> Option<PathBuf> {
        self.grammar_dir
            .as_ref()
            .map(|dir| dir.join(format!("tree-sitter-{}.wasm", language)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Save the reverse index on shutdown and load it on startup
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Index file; defaults to `<root>/.depgraph/reverse-index.json`
    #[serde(default)]
    pub index_file: Option<PathBuf>,

    /// File extensions fed to the analyzer
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Directory names never watched or indexed
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persist: true,
            index_file: None,
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    300
}
fn default_cache_max_entries() -> usize {
    1000
}
fn default_progress_interval_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}
fn default_extensions() -> Vec<String> {
    ["rs", "py", "js", "jsx", "ts", "tsx", "go"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", "target", "dist", "__pycache__", DATA_DIR_NAME]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl DepGraphConfig {
    pub fn index_file(&self, workspace_root: &Path) -> PathBuf {
        self.index
            .index_file
            .clone()
            .unwrap_or_else(|| workspace_root.join(DATA_DIR_NAME).join("reverse-index.json"))
    }

    pub fn cache_file(&self, workspace_root: &Path) -> PathBuf {
        self.cache
            .cache_file
            .clone()
            .unwrap_or_else(|| workspace_root.join(DATA_DIR_NAME).join("analysis-cache.json"))
    }
}

/// Configuration manager with defaults, file lookup and env overrides
pub struct ConfigManager {
    config: DepGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`DEPGRAPH_*`)
    /// 2. Config file (`<root>/.depgraph.toml`, then `~/.depgraph/config.toml`)
    /// 3. Defaults
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let (config, config_path) = Self::load_config_file(workspace_root)?;
        let config = Self::apply_env_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        match &config_path {
            Some(path) => info!("Configuration loaded from {}", path.display()),
            None => info!("No config file found, using defaults"),
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load a specific config file without searching or env overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let config = Self::read_toml_file(path)?;
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    pub fn config(&self) -> &DepGraphConfig {
        &self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn into_config(self) -> DepGraphConfig {
        self.config
    }

    fn load_config_file(
        workspace_root: &Path,
    ) -> Result<(DepGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = workspace_root.join(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            let config = Self::read_toml_file(&local_config)?;
            return Ok((config, Some(local_config)));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(DATA_DIR_NAME).join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((DepGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<DepGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `DEPGRAPH_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(mut config: DepGraphConfig, lookup: F) -> DepGraphConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DEPGRAPH_DEBOUNCE_MS").and_then(|v| v.parse().ok()) {
            config.scheduler.debounce_ms = v;
        }
        if let Some(v) = lookup("DEPGRAPH_CACHE_ENABLED").and_then(|v| v.parse().ok()) {
            config.cache.enabled = v;
        }
        if let Some(v) = lookup("DEPGRAPH_CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            config.cache.max_entries = v;
        }
        if let Some(v) = lookup("DEPGRAPH_PROGRESS_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.status.progress_interval_ms = v;
        }
        if let Some(v) = lookup("DEPGRAPH_PARSER_RUNTIME") {
            config.parser.runtime_module_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("DEPGRAPH_GRAMMAR_DIR") {
            config.parser.grammar_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("DEPGRAPH_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Some(v) = lookup("DEPGRAPH_LOG_FORMAT") {
            config.logging.format = v;
        }
        config
    }

    fn validate_config(config: &DepGraphConfig) -> Result<(), ConfigError> {
        if config.scheduler.debounce_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scheduler.debounce_ms must be greater than 0".to_string(),
            ));
        }

        if config.cache.max_entries < 10 {
            warn!(
                "cache.max_entries = {} is below the minimum, 10 will be used",
                config.cache.max_entries
            );
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&config.logging.format.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log format '{}'. Must be one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            )));
        }

        if config.index.extensions.is_empty() {
            return Err(ConfigError::ValidationError(
                "index.extensions must list at least one extension".to_string(),
            ));
        }

        Ok(())
    }
}
