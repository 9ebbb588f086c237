use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `WAVELINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Tuning for the dispatch engine.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single flood-control backoff, so one throttled
    /// account cannot stall a campaign indefinitely.
    #[serde(default = "default_flood_wait_cap_secs")]
    pub flood_wait_cap_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Delay applied to newly created accounts when none is specified.
    #[serde(default = "default_account_delay_secs")]
    pub default_account_delay_secs: u32,
}

/// Behavior of the simulated transport used by the demo driver and tests.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    #[serde(default = "default_min_latency_ms")]
    pub min_latency_ms: u64,
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Probability in [0, 1] that a send fails with a generic provider error.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
    /// Probability in [0, 1] that a send fails with a flood-control error.
    #[serde(default = "default_flood_rate")]
    pub flood_rate: f64,
    #[serde(default = "default_flood_retry_after_secs")]
    pub flood_retry_after_secs: u64,
}

// Default functions
fn default_flood_wait_cap_secs() -> u64 {
    120
}
fn default_account_delay_secs() -> u32 {
    1200
}
fn default_min_latency_ms() -> u64 {
    40
}
fn default_max_latency_ms() -> u64 {
    160
}
fn default_failure_rate() -> f64 {
    0.0
}
fn default_flood_rate() -> f64 {
    0.0
}
fn default_flood_retry_after_secs() -> u64 {
    3
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            flood_wait_cap_secs: default_flood_wait_cap_secs(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_account_delay_secs: default_account_delay_secs(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            min_latency_ms: default_min_latency_ms(),
            max_latency_ms: default_max_latency_ms(),
            failure_rate: default_failure_rate(),
            flood_rate: default_flood_rate(),
            flood_retry_after_secs: default_flood_retry_after_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            store: StoreConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("WAVELINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
