//! Pipeline configuration.
//!
//! Configuration comes from three layers, each overriding the previous one:
//! built-in defaults, an optional YAML file and `NEWS_FORGE_*` environment
//! variables. The result is validated before anything is constructed from
//! it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::collaborators::Destination;
use crate::scoring::features::WordBand;
use crate::scoring::DEFAULT_ACCEPT_THRESHOLD;

/// Upper bound accepted for `max_correction_attempts`.
const MAX_CORRECTION_ATTEMPTS_LIMIT: u32 = 10;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable or file entry has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading a configuration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for this schema.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for the news pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    // Dispatch settings
    /// Maximum number of stage tasks executing at once.
    pub dispatcher_capacity: usize,
    /// Maximum number of queued tasks before `submit` waits.
    pub max_queued_tasks: usize,

    // Correction loop settings
    /// Correction cycles allowed after the first scored script.
    pub max_correction_attempts: u32,
    /// Composite reward at or above which a script is accepted.
    pub accept_threshold: f64,
    /// Target script length.
    pub script_word_band: WordBand,
    /// Derive weights from recent score history instead of fixed weights.
    pub adaptive_weights: bool,
    /// Number of recent score records the adaptive policy looks at.
    pub history_window: usize,

    // Collaborator settings
    /// Timeout applied to every text analysis, store and push call.
    pub collaborator_timeout: Duration,
    /// Timeout applied to content fetching.
    pub fetch_timeout: Duration,
    /// Categories that make an article relevant.
    pub relevant_categories: Vec<String>,
    /// Base URL of the text analysis service.
    pub analyzer_base_url: String,
    /// Bearer key for the text analysis service.
    pub analyzer_api_key: Option<String>,
    /// Base URL of the delivery service.
    pub push_base_url: String,
    /// Bearer key for the delivery service.
    pub push_api_key: Option<String>,
    /// Default delivery channels.
    pub push_channels: Vec<String>,
    /// Default delivery avatars.
    pub push_avatars: Vec<String>,

    // Storage settings
    /// SQLite URL; in-memory storage is used when unset.
    pub database_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatcher_capacity: 5,
            max_queued_tasks: 1024,

            max_correction_attempts: 3,
            accept_threshold: DEFAULT_ACCEPT_THRESHOLD,
            script_word_band: WordBand::default(),
            adaptive_weights: false,
            history_window: 50,

            collaborator_timeout: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            relevant_categories: ["news", "politics", "business", "technology", "sports", "entertainment"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            analyzer_base_url: "http://localhost:8001".to_string(),
            analyzer_api_key: None,
            push_base_url: "http://localhost:8080".to_string(),
            push_api_key: None,
            push_channels: vec!["news".to_string()],
            push_avatars: vec!["anchor".to_string()],

            database_url: None,
        }
    }
}

/// On-disk YAML layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    dispatcher_capacity: Option<usize>,
    max_queued_tasks: Option<usize>,
    max_correction_attempts: Option<u32>,
    accept_threshold: Option<f64>,
    script_min_words: Option<usize>,
    script_max_words: Option<usize>,
    adaptive_weights: Option<bool>,
    history_window: Option<usize>,
    collaborator_timeout_secs: Option<u64>,
    fetch_timeout_secs: Option<u64>,
    relevant_categories: Option<Vec<String>>,
    analyzer_base_url: Option<String>,
    analyzer_api_key: Option<String>,
    push_base_url: Option<String>,
    push_api_key: Option<String>,
    push_channels: Option<Vec<String>>,
    push_avatars: Option<Vec<String>>,
    database_url: Option<String>,
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `NEWS_FORGE_CAPACITY`: Dispatcher capacity (default: 5)
    /// - `NEWS_FORGE_MAX_QUEUED`: Queue bound before submissions wait (default: 1024)
    /// - `NEWS_FORGE_MAX_ATTEMPTS`: Correction cycles (default: 3)
    /// - `NEWS_FORGE_ACCEPT_THRESHOLD`: Acceptance threshold (default: 0.6)
    /// - `NEWS_FORGE_SCRIPT_MIN_WORDS` / `NEWS_FORGE_SCRIPT_MAX_WORDS`: Script word band
    /// - `NEWS_FORGE_ADAPTIVE_WEIGHTS`: Enable adaptive weights (default: false)
    /// - `NEWS_FORGE_HISTORY_WINDOW`: Score history window (default: 50)
    /// - `NEWS_FORGE_COLLABORATOR_TIMEOUT_SECS`: Collaborator timeout (default: 30)
    /// - `NEWS_FORGE_FETCH_TIMEOUT_SECS`: Fetch timeout (default: 10)
    /// - `NEWS_FORGE_CATEGORIES`: Comma-separated relevant categories
    /// - `NEWS_FORGE_ANALYZER_URL` / `NEWS_FORGE_ANALYZER_API_KEY`: Text analysis service
    /// - `NEWS_FORGE_PUSH_URL` / `NEWS_FORGE_PUSH_API_KEY`: Delivery service
    /// - `NEWS_FORGE_PUSH_CHANNELS` / `NEWS_FORGE_PUSH_AVATARS`: Comma-separated destinations
    /// - `NEWS_FORGE_DATABASE_URL`: SQLite URL (default: in-memory store)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Loads a YAML file over the defaults, then applies the environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or parsed, or the
    /// result is invalid.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)?.merge_env(|key| std::env::var(key).ok())
    }

    /// Parses YAML over the defaults without consulting the environment.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        let mut config = Self::default();
        if let Some(v) = file.dispatcher_capacity {
            config.dispatcher_capacity = v;
        }
        if let Some(v) = file.max_queued_tasks {
            config.max_queued_tasks = v;
        }
        if let Some(v) = file.max_correction_attempts {
            config.max_correction_attempts = v;
        }
        if let Some(v) = file.accept_threshold {
            config.accept_threshold = v;
        }
        if let Some(v) = file.script_min_words {
            config.script_word_band.min = v;
        }
        if let Some(v) = file.script_max_words {
            config.script_word_band.max = v;
        }
        if let Some(v) = file.adaptive_weights {
            config.adaptive_weights = v;
        }
        if let Some(v) = file.history_window {
            config.history_window = v;
        }
        if let Some(v) = file.collaborator_timeout_secs {
            config.collaborator_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.fetch_timeout_secs {
            config.fetch_timeout = Duration::from_secs(v);
        }
        if let Some(v) = file.relevant_categories {
            config.relevant_categories = v;
        }
        if let Some(v) = file.analyzer_base_url {
            config.analyzer_base_url = v;
        }
        if file.analyzer_api_key.is_some() {
            config.analyzer_api_key = file.analyzer_api_key;
        }
        if let Some(v) = file.push_base_url {
            config.push_base_url = v;
        }
        if file.push_api_key.is_some() {
            config.push_api_key = file.push_api_key;
        }
        if let Some(v) = file.push_channels {
            config.push_channels = v;
        }
        if let Some(v) = file.push_avatars {
            config.push_avatars = v;
        }
        if file.database_url.is_some() {
            config.database_url = file.database_url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies `NEWS_FORGE_*` overrides read through `lookup`, then validates.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Dispatch settings
        if let Some(val) = lookup("NEWS_FORGE_CAPACITY") {
            self.dispatcher_capacity = parse_env_value(&val, "NEWS_FORGE_CAPACITY")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_MAX_QUEUED") {
            self.max_queued_tasks = parse_env_value(&val, "NEWS_FORGE_MAX_QUEUED")?;
        }

        // Correction loop settings
        if let Some(val) = lookup("NEWS_FORGE_MAX_ATTEMPTS") {
            self.max_correction_attempts = parse_env_value(&val, "NEWS_FORGE_MAX_ATTEMPTS")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_ACCEPT_THRESHOLD") {
            self.accept_threshold = parse_env_value(&val, "NEWS_FORGE_ACCEPT_THRESHOLD")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_SCRIPT_MIN_WORDS") {
            self.script_word_band.min = parse_env_value(&val, "NEWS_FORGE_SCRIPT_MIN_WORDS")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_SCRIPT_MAX_WORDS") {
            self.script_word_band.max = parse_env_value(&val, "NEWS_FORGE_SCRIPT_MAX_WORDS")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_ADAPTIVE_WEIGHTS") {
            self.adaptive_weights = parse_env_bool(&val, "NEWS_FORGE_ADAPTIVE_WEIGHTS")?;
        }

        if let Some(val) = lookup("NEWS_FORGE_HISTORY_WINDOW") {
            self.history_window = parse_env_value(&val, "NEWS_FORGE_HISTORY_WINDOW")?;
        }

        // Collaborator settings
        if let Some(val) = lookup("NEWS_FORGE_COLLABORATOR_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWS_FORGE_COLLABORATOR_TIMEOUT_SECS")?;
            self.collaborator_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("NEWS_FORGE_FETCH_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "NEWS_FORGE_FETCH_TIMEOUT_SECS")?;
            self.fetch_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("NEWS_FORGE_CATEGORIES") {
            self.relevant_categories = parse_list(&val);
        }

        if let Some(val) = lookup("NEWS_FORGE_ANALYZER_URL") {
            self.analyzer_base_url = val;
        }

        if let Some(val) = lookup("NEWS_FORGE_ANALYZER_API_KEY") {
            self.analyzer_api_key = Some(val);
        }

        if let Some(val) = lookup("NEWS_FORGE_PUSH_URL") {
            self.push_base_url = val;
        }

        if let Some(val) = lookup("NEWS_FORGE_PUSH_API_KEY") {
            self.push_api_key = Some(val);
        }

        if let Some(val) = lookup("NEWS_FORGE_PUSH_CHANNELS") {
            self.push_channels = parse_list(&val);
        }

        if let Some(val) = lookup("NEWS_FORGE_PUSH_AVATARS") {
            self.push_avatars = parse_list(&val);
        }

        // Storage settings
        if let Some(val) = lookup("NEWS_FORGE_DATABASE_URL") {
            self.database_url = Some(val);
        }

        self.validate()?;
        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "dispatcher_capacity must be greater than 0".to_string(),
            ));
        }

        if self.max_queued_tasks == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_queued_tasks must be greater than 0".to_string(),
            ));
        }

        if self.max_correction_attempts > MAX_CORRECTION_ATTEMPTS_LIMIT {
            return Err(ConfigError::ValidationFailed(format!(
                "max_correction_attempts must be at most {}",
                MAX_CORRECTION_ATTEMPTS_LIMIT
            )));
        }

        if !(0.0..=1.0).contains(&self.accept_threshold) {
            return Err(ConfigError::ValidationFailed(
                "accept_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.script_word_band.min >= self.script_word_band.max {
            return Err(ConfigError::ValidationFailed(
                "script_word_band min must be less than max".to_string(),
            ));
        }

        if self.history_window == 0 {
            return Err(ConfigError::ValidationFailed(
                "history_window must be greater than 0".to_string(),
            ));
        }

        if self.collaborator_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "collaborator_timeout must be greater than 0".to_string(),
            ));
        }

        if self.fetch_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "fetch_timeout must be greater than 0".to_string(),
            ));
        }

        if self.relevant_categories.iter().all(|c| c.trim().is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "relevant_categories cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Default delivery destinations: every channel paired with every avatar.
    pub fn destinations(&self) -> Vec<Destination> {
        Destination::matrix(&self.push_channels, &self.push_avatars)
    }

    /// Builder method to set dispatcher capacity.
    pub fn with_dispatcher_capacity(mut self, capacity: usize) -> Self {
        self.dispatcher_capacity = capacity;
        self
    }

    /// Builder method to set the queue bound.
    pub fn with_max_queued_tasks(mut self, max: usize) -> Self {
        self.max_queued_tasks = max;
        self
    }

    /// Builder method to set max correction attempts.
    pub fn with_max_correction_attempts(mut self, attempts: u32) -> Self {
        self.max_correction_attempts = attempts;
        self
    }

    /// Builder method to set the acceptance threshold.
    pub fn with_accept_threshold(mut self, threshold: f64) -> Self {
        self.accept_threshold = threshold;
        self
    }

    /// Builder method to set the script word band.
    pub fn with_script_word_band(mut self, min: usize, max: usize) -> Self {
        self.script_word_band = WordBand { min, max };
        self
    }

    /// Builder method to enable or disable adaptive weights.
    pub fn with_adaptive_weights(mut self, enabled: bool) -> Self {
        self.adaptive_weights = enabled;
        self
    }

    /// Builder method to set the history window.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// Builder method to set the collaborator timeout.
    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    /// Builder method to set the fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Builder method to set relevant categories.
    pub fn with_relevant_categories(mut self, categories: Vec<String>) -> Self {
        self.relevant_categories = categories;
        self
    }

    /// Builder method to configure the text analysis service.
    pub fn with_analyzer(mut self, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        self.analyzer_base_url = base_url.into();
        self.analyzer_api_key = api_key;
        self
    }

    /// Builder method to configure the delivery service.
    pub fn with_push(mut self, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        self.push_base_url = base_url.into();
        self.push_api_key = api_key;
        self
    }

    /// Builder method to set default destinations.
    pub fn with_destinations(mut self, channels: Vec<String>, avatars: Vec<String>) -> Self {
        self.push_channels = channels;
        self.push_avatars = avatars;
        self
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.dispatcher_capacity, 5);
        assert_eq!(config.max_correction_attempts, 3);
        assert!((config.accept_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.collaborator_timeout, Duration::from_secs(30));
        assert_eq!(config.fetch_timeout, Duration::from_secs(10));
        assert!(config.analyzer_api_key.is_none());
        assert!(!config.adaptive_weights);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_dispatcher_capacity(8)
            .with_max_correction_attempts(2)
            .with_accept_threshold(0.7)
            .with_script_word_band(10, 80)
            .with_collaborator_timeout(Duration::from_millis(250))
            .with_analyzer("https://analyzer.test", Some("key".into()))
            .with_destinations(vec!["a".into(), "b".into()], vec!["x".into()]);

        assert_eq!(config.dispatcher_capacity, 8);
        assert_eq!(config.max_correction_attempts, 2);
        assert_eq!(config.script_word_band, WordBand { min: 10, max: 80 });
        assert_eq!(config.analyzer_api_key.as_deref(), Some("key"));
        assert_eq!(config.destinations().len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_merge_env() {
        let config = PipelineConfig::default()
            .merge_env(env(&[
                ("NEWS_FORGE_CAPACITY", "3"),
                ("NEWS_FORGE_ADAPTIVE_WEIGHTS", "yes"),
                ("NEWS_FORGE_CATEGORIES", "news, world ,,"),
                ("NEWS_FORGE_FETCH_TIMEOUT_SECS", "4"),
                ("NEWS_FORGE_ANALYZER_API_KEY", "secret"),
            ]))
            .unwrap();

        assert_eq!(config.dispatcher_capacity, 3);
        assert!(config.adaptive_weights);
        assert_eq!(config.relevant_categories, vec!["news", "world"]);
        assert_eq!(config.fetch_timeout, Duration::from_secs(4));
        assert_eq!(config.analyzer_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_merge_env_invalid_value() {
        let err = PipelineConfig::default()
            .merge_env(env(&[("NEWS_FORGE_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("NEWS_FORGE_MAX_ATTEMPTS"));

        let err = PipelineConfig::default()
            .merge_env(env(&[("NEWS_FORGE_CAPACITY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("dispatcher_capacity"));
    }

    #[test]
    fn test_from_yaml_str() {
        let config = PipelineConfig::from_yaml_str(
            r#"
dispatcher_capacity: 2
accept_threshold: 0.75
script_min_words: 5
script_max_words: 50
push_channels: [news, sport]
push_avatars: [anchor]
collaborator_timeout_secs: 5
"#,
        )
        .unwrap();

        assert_eq!(config.dispatcher_capacity, 2);
        assert!((config.accept_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.script_word_band, WordBand { min: 5, max: 50 });
        assert_eq!(config.destinations().len(), 2);
        assert_eq!(config.collaborator_timeout, Duration::from_secs(5));
        assert_eq!(config.max_correction_attempts, 3);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_keys() {
        assert!(matches!(
            PipelineConfig::from_yaml_str("max_steps: 4"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(PipelineConfig::from_yaml_str("").is_ok());
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("news-forge.yaml");
        std::fs::write(&path, "max_correction_attempts: 1\n").unwrap();

        let config = PipelineConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.max_correction_attempts, 1);
        assert!(PipelineConfig::from_yaml_file(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            (PipelineConfig::default().with_dispatcher_capacity(0), "dispatcher_capacity"),
            (PipelineConfig::default().with_max_queued_tasks(0), "max_queued_tasks"),
            (PipelineConfig::default().with_max_correction_attempts(11), "max_correction_attempts"),
            (PipelineConfig::default().with_accept_threshold(1.5), "accept_threshold"),
            (PipelineConfig::default().with_script_word_band(50, 50), "script_word_band"),
            (PipelineConfig::default().with_history_window(0), "history_window"),
            (
                PipelineConfig::default().with_collaborator_timeout(Duration::ZERO),
                "collaborator_timeout",
            ),
            (PipelineConfig::default().with_fetch_timeout(Duration::ZERO), "fetch_timeout"),
            (PipelineConfig::default().with_relevant_categories(vec![]), "relevant_categories"),
        ];

        for (config, field) in cases {
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains(field), "{} not in {}", field, err);
        }
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("TRUE", "test").unwrap());
        assert!(parse_env_bool("on", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(parse_env_bool("invalid", "test").is_err());
    }
}
