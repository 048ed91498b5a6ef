use crate::cli::{Cli, VerbosityLevel};
use crate::file_discovery::DEFAULT_PATTERN;
use crate::report::ReportFormat;
use crate::runner::BatchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "BATCH_VALIDATE_XML_";

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable error: {0}")]
    Environment(String),

    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub batch: BatchSettings,
    pub output: OutputSettings,
    pub validation: ValidationSettings,
}

/// What to validate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    /// Regular expression searched for in base filenames
    pub pattern: String,
    /// Schema every file is validated against
    pub schema: Option<PathBuf>,
}

/// Where and how the report is written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub directory: PathBuf,
    pub format: ReportFormat,
    pub verbose: bool,
    pub quiet: bool,
}

/// Runner behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationSettings {
    /// Number of concurrent validations; defaults to the CPU count
    pub threads: Option<usize>,
    pub follow_symlinks: bool,
    /// Write completed results as a partial report on cancellation
    pub best_effort_on_cancel: bool,
    pub write_retries: u32,
    pub write_retry_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.to_string(),
            schema: None,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            format: ReportFormat::Csv,
            verbose: false,
            quiet: false,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            threads: None,
            follow_symlinks: false,
            best_effort_on_cancel: false,
            write_retries: 2,
            write_retry_delay_ms: 500,
        }
    }
}

impl Config {
    pub fn verbosity(&self) -> VerbosityLevel {
        VerbosityLevel::from_flags(self.output.verbose, self.output.quiet)
    }

    /// Effective thread count
    pub fn thread_count(&self) -> usize {
        self.validation.threads.unwrap_or_else(num_cpus::get)
    }

    /// Build the runner input for `root`
    pub fn to_batch_config(&self, root: PathBuf) -> Result<BatchConfig> {
        let schema = self.batch.schema.clone().ok_or_else(|| {
            ConfigError::Validation("A schema file must be specified".to_string())
        })?;

        Ok(BatchConfig {
            root,
            pattern: self.batch.pattern.clone(),
            schema,
            output_dir: self.output.directory.clone(),
            format: self.output.format,
            threads: self.thread_count(),
            follow_symlinks: self.validation.follow_symlinks,
            best_effort_on_cancel: self.validation.best_effort_on_cancel,
            write_retries: self.validation.write_retries,
            write_retry_delay: Duration::from_millis(self.validation.write_retry_delay_ms),
        })
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment -> CLI
    pub async fn load_config(cli: &Cli) -> Result<Config> {
        Self::load_config_with(&SystemEnvProvider, cli).await
    }

    pub async fn load_config_with(env: &impl EnvProvider, cli: &Cli) -> Result<Config> {
        let mut config = Config::default();

        if let Some(config_path) = &cli.config {
            let file_config = Self::load_from_file(config_path).await?;
            config = Self::merge_configs(config, file_config);
        } else if let Some(found_config) = Self::find_config_file().await? {
            config = Self::merge_configs(config, found_config);
        }

        config = Self::apply_environment_overrides_with(env, config)?;
        config = Self::merge_with_cli(config, cli);

        Self::validate_config(&config)?;

        Ok(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub async fn load_from_file(path: &Path) -> Result<Config> {
        let content = tokio::fs::read_to_string(path).await?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Find configuration file in standard locations
    pub async fn find_config_file() -> Result<Option<Config>> {
        let config_names = [
            "batch-validate-xml.toml",
            "batch-validate-xml.json",
            ".batch-validate-xml.toml",
            ".batch-validate-xml.json",
        ];

        for name in &config_names {
            let path = PathBuf::from(name);
            if path.exists() {
                tracing::debug!("Using configuration file {}", path.display());
                return Ok(Some(Self::load_from_file(&path).await?));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let app_config_dir = config_dir.join("batch-validate-xml");
            for name in &config_names {
                let path = app_config_dir.join(name);
                if path.exists() {
                    tracing::debug!("Using configuration file {}", path.display());
                    return Ok(Some(Self::load_from_file(&path).await?));
                }
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> Result<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> Result<Config> {
        if let Some(pattern) = env.get(&env_key("PATTERN")) {
            config.batch.pattern = pattern;
        }
        if let Some(schema) = env.get(&env_key("SCHEMA")) {
            config.batch.schema = Some(PathBuf::from(schema));
        }

        if let Some(directory) = env.get(&env_key("OUTPUT_DIR")) {
            config.output.directory = PathBuf::from(directory);
        }
        if let Some(format) = env.get(&env_key("FORMAT")) {
            config.output.format = match format.to_lowercase().as_str() {
                "csv" => ReportFormat::Csv,
                "text" => ReportFormat::Text,
                _ => {
                    return Err(ConfigError::Environment(format!(
                        "Invalid {} value: {}",
                        env_key("FORMAT"),
                        format
                    )));
                }
            };
        }
        if let Some(verbose) = parse_env(env, "VERBOSE")? {
            config.output.verbose = verbose;
        }
        if let Some(quiet) = parse_env(env, "QUIET")? {
            config.output.quiet = quiet;
        }

        if let Some(threads) = parse_env(env, "THREADS")? {
            config.validation.threads = Some(threads);
        }
        if let Some(follow) = parse_env(env, "FOLLOW_SYMLINKS")? {
            config.validation.follow_symlinks = follow;
        }
        if let Some(partial) = parse_env(env, "PARTIAL_ON_CANCEL")? {
            config.validation.best_effort_on_cancel = partial;
        }
        if let Some(retries) = parse_env(env, "WRITE_RETRIES")? {
            config.validation.write_retries = retries;
        }

        Ok(config)
    }

    /// Merge CLI arguments with configuration (CLI takes precedence)
    pub fn merge_with_cli(mut config: Config, cli: &Cli) -> Config {
        if let Some(pattern) = &cli.pattern {
            config.batch.pattern = pattern.clone();
        }
        if let Some(schema) = &cli.schema {
            config.batch.schema = Some(schema.clone());
        }

        if let Some(directory) = &cli.output_dir {
            config.output.directory = directory.clone();
        }
        if let Some(format) = cli.format {
            config.output.format = format;
        }
        if cli.verbose {
            config.output.verbose = true;
            config.output.quiet = false;
        }
        if cli.quiet {
            config.output.quiet = true;
            config.output.verbose = false;
        }

        if cli.threads.is_some() {
            config.validation.threads = cli.threads;
        }
        if cli.follow_symlinks {
            config.validation.follow_symlinks = true;
        }
        if cli.partial_on_cancel {
            config.validation.best_effort_on_cancel = true;
        }
        if let Some(retries) = cli.write_retries {
            config.validation.write_retries = retries;
        }

        config
    }

    /// Merge two configurations (second takes precedence for non-None values)
    pub fn merge_configs(mut base: Config, override_config: Config) -> Config {
        base.batch.pattern = override_config.batch.pattern;
        if override_config.batch.schema.is_some() {
            base.batch.schema = override_config.batch.schema;
        }

        base.output = override_config.output;

        if override_config.validation.threads.is_some() {
            base.validation.threads = override_config.validation.threads;
        }
        base.validation.follow_symlinks = override_config.validation.follow_symlinks;
        base.validation.best_effort_on_cancel = override_config.validation.best_effort_on_cancel;
        base.validation.write_retries = override_config.validation.write_retries;
        base.validation.write_retry_delay_ms = override_config.validation.write_retry_delay_ms;

        base
    }

    /// Validate configuration values
    pub fn validate_config(config: &Config) -> Result<()> {
        if let Some(threads) = config.validation.threads {
            if threads == 0 {
                return Err(ConfigError::Validation(
                    "Number of threads must be greater than 0".to_string(),
                ));
            }
            if threads > 1000 {
                return Err(ConfigError::Validation(
                    "Number of threads cannot exceed 1000".to_string(),
                ));
            }
        }

        if config.validation.write_retries > 10 {
            return Err(ConfigError::Validation(
                "Write retries cannot exceed 10".to_string(),
            ));
        }

        if config.batch.schema.is_none() {
            return Err(ConfigError::Validation(
                "A schema file must be specified".to_string(),
            ));
        }

        if config.batch.pattern.is_empty() {
            return Err(ConfigError::Validation(
                "Filename pattern must not be empty".to_string(),
            ));
        }

        if config.output.verbose && config.output.quiet {
            return Err(ConfigError::Validation(
                "Cannot enable both verbose and quiet modes".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_key(name: &str) -> String {
    format!("{}{}", ENV_PREFIX, name)
}

fn parse_env<T: FromStr>(env: &impl EnvProvider, name: &str) -> Result<Option<T>> {
    let key = env_key(name);
    match env.get(&key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Environment(format!("Invalid {} value: {}", key, raw))),
    }
}
