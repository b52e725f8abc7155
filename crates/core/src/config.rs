use serde::Deserialize;

/// Root engine configuration. Loaded from environment variables
/// with the prefix `ENGAGE_OPTIMIZER__`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub experiments: ExperimentConfig,
    #[serde(default)]
    pub bandit: BanditConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Experiment manager policy. The stopping thresholds are tunable policy,
/// not derived constants.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_thompson_draws")]
    pub thompson_draws: usize,
    #[serde(default = "default_probability_threshold")]
    pub probability_threshold: f64,
    #[serde(default = "default_information_gain_threshold")]
    pub information_gain_threshold: f64,
    #[serde(default = "default_experiment_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_experiment_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BanditConfig {
    #[serde(default = "default_feature_dimension")]
    pub feature_dimension: usize,
    #[serde(default = "default_exploration_parameter")]
    pub exploration_parameter: f64,
    #[serde(default = "default_regularization")]
    pub regularization: f64,
    #[serde(default = "default_initial_confidence")]
    pub initial_confidence: f64,
    #[serde(default = "default_selection_cache_ttl_secs")]
    pub selection_cache_ttl_secs: u64,
    #[serde(default = "default_cache_bypass_probability")]
    pub cache_bypass_probability: f64,
    #[serde(default = "default_selection_cache_capacity")]
    pub selection_cache_capacity: usize,
    #[serde(default = "default_model_version")]
    pub model_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_pending_capacity")]
    pub pending_capacity: usize,
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    #[serde(default = "default_ingest_buffer")]
    pub ingest_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

// Default functions
fn default_thompson_draws() -> usize {
    10_000
}
fn default_probability_threshold() -> f64 {
    0.95
}
fn default_information_gain_threshold() -> f64 {
    0.10
}
fn default_experiment_cache_capacity() -> usize {
    10_000
}
fn default_experiment_cache_ttl_secs() -> u64 {
    3600
}
fn default_feature_dimension() -> usize {
    20
}
fn default_exploration_parameter() -> f64 {
    1.0
}
fn default_regularization() -> f64 {
    1.0
}
fn default_initial_confidence() -> f64 {
    0.1
}
fn default_selection_cache_ttl_secs() -> u64 {
    60
}
fn default_cache_bypass_probability() -> f64 {
    0.1
}
fn default_selection_cache_capacity() -> usize {
    50_000
}
fn default_model_version() -> String {
    "linear-v1".to_string()
}
fn default_pending_capacity() -> usize {
    100_000
}
fn default_pending_ttl_secs() -> u64 {
    7 * 24 * 3600
}
fn default_ingest_buffer() -> usize {
    10_000
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_key_prefix() -> String {
    "engage".to_string()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            thompson_draws: default_thompson_draws(),
            probability_threshold: default_probability_threshold(),
            information_gain_threshold: default_information_gain_threshold(),
            cache_capacity: default_experiment_cache_capacity(),
            cache_ttl_secs: default_experiment_cache_ttl_secs(),
        }
    }
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            feature_dimension: default_feature_dimension(),
            exploration_parameter: default_exploration_parameter(),
            regularization: default_regularization(),
            initial_confidence: default_initial_confidence(),
            selection_cache_ttl_secs: default_selection_cache_ttl_secs(),
            cache_bypass_probability: default_cache_bypass_probability(),
            selection_cache_capacity: default_selection_cache_capacity(),
            model_version: default_model_version(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pending_capacity: default_pending_capacity(),
            pending_ttl_secs: default_pending_ttl_secs(),
            ingest_buffer: default_ingest_buffer(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ENGAGE_OPTIMIZER")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
