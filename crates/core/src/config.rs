use serde::Deserialize;

/// Root application configuration. Loaded from an optional `engage.toml`
/// file and environment variables with the prefix `ENGAGE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub frequency: FrequencyConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    /// JSON file holding an array of engagement rules. Empty disables file loading.
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrequencyConfig {
    #[serde(default = "default_frequency_backend")]
    pub backend: FrequencyBackend,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_window_days")]
    pub default_window_days: u32,
    #[serde(default = "default_no_response_cutoff_secs")]
    pub no_response_cutoff_secs: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

// Default functions
fn default_node_id() -> String {
    "engage-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_frequency_backend() -> FrequencyBackend {
    FrequencyBackend::Memory
}
fn default_store_timeout_ms() -> u64 {
    50
}
fn default_max_retries() -> u32 {
    2
}
fn default_eviction_interval_secs() -> u64 {
    300
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_key_prefix() -> String {
    "engage".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_window_days() -> u32 {
    30
}
fn default_no_response_cutoff_secs() -> u64 {
    86_400
}
fn default_scan_timeout_ms() -> u64 {
    2000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            backend: default_frequency_backend(),
            store_timeout_ms: default_store_timeout_ms(),
            max_retries: default_max_retries(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_window_days: default_window_days(),
            no_response_cutoff_secs: default_no_response_cutoff_secs(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            rules: RulesConfig::default(),
            frequency: FrequencyConfig::default(),
            redis: RedisConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the optional `engage.toml` file, then
    /// environment variables (which win).
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("engage").required(false))
            .add_source(
                config::Environment::with_prefix("ENGAGE")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("redis.urls"),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.frequency.backend, FrequencyBackend::Memory);
        assert_eq!(config.analytics.default_window_days, 30);
        assert_eq!(config.analytics.no_response_cutoff_secs, 86_400);
        assert!(config.rules.path.is_empty());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: AppConfig = serde_json::from_str(
            r#"{"node_id": "n-7", "frequency": {"backend": "redis"}}"#,
        )
        .unwrap();
        assert_eq!(config.node_id, "n-7");
        assert_eq!(config.frequency.backend, FrequencyBackend::Redis);
        assert_eq!(config.frequency.max_retries, 2);
        assert_eq!(config.redis.key_prefix, "engage");
    }
}
