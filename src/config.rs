use crate::error::{GatewayError, Result};
use serde::Deserialize;
use std::env;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Persist conversations and messages for canonical requests.
    #[serde(default = "default_true")]
    pub history_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Requests admitted per key per rolling window.
    pub requests_per_window: u32,
    pub window_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_entries: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 6000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    /// Global per-stream deadline.
    pub deadline_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self { deadline_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Usage collector endpoint; billing is disabled when unset.
    pub callback_url: Option<String>,
    pub callback_auth: Option<String>,
    #[serde(default = "default_billing_timeout")]
    pub timeout_secs: u64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            callback_url: None,
            callback_auth: None,
            timeout_secs: default_billing_timeout(),
        }
    }
}

fn default_billing_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    /// Provider used when a model id carries no recognized prefix.
    pub default: String,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub endpoint: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_provider_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let listen_addr =
            env::var("GATEWAY_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

        let history_enabled = env::var("GATEWAY_HISTORY_ENABLED")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| GatewayError::ConfigError("OPENAI_API_KEY not set".to_string()))?;

        let endpoint =
            env::var("OPENAI_ENDPOINT").unwrap_or_else(|_| "https://api.openai.com".to_string());

        let mut config = GatewayConfig {
            server: ServerConfig {
                listen_addr,
                history_enabled,
            },
            admission: AdmissionConfig::default(),
            idempotency: IdempotencyConfig::default(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            streaming: StreamingConfig::default(),
            billing: BillingConfig::default(),
            providers: ProvidersConfig {
                default: "openai".to_string(),
                openai: OpenAiConfig {
                    api_key,
                    endpoint,
                    timeout_secs: default_provider_timeout(),
                },
            },
        };

        if let Ok(rate) = env::var("GATEWAY_RATE_LIMIT_PER_MINUTE") {
            config.admission.requests_per_window = rate.parse::<u32>().map_err(|e| {
                GatewayError::ConfigError(format!("Invalid rate limit value: {}", e))
            })?;
        }

        if let Ok(url) = env::var("GATEWAY_USAGE_CALLBACK_URL") {
            config.billing.callback_url = Some(url);
        }
        if let Ok(auth) = env::var("GATEWAY_USAGE_CALLBACK_AUTH") {
            config.billing.callback_auth = Some(auth);
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| GatewayError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = toml::from_str(&contents).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        // Allow environment variables to override file config
        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            config.providers.openai.api_key = api_key;
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(GatewayError::ConfigError(
                "Listen address is empty".to_string(),
            ));
        }

        if self.providers.openai.api_key.is_empty() {
            return Err(GatewayError::ConfigError("API key is empty".to_string()));
        }

        if self.providers.openai.endpoint.is_empty() {
            return Err(GatewayError::ConfigError("Endpoint is empty".to_string()));
        }

        if self.admission.requests_per_window == 0 {
            return Err(GatewayError::ConfigError(
                "Admission rate must be greater than 0".to_string(),
            ));
        }

        if self.admission.window_secs == 0 {
            return Err(GatewayError::ConfigError(
                "Admission window must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(GatewayError::ConfigError(
                "Retry attempts must be greater than 0".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(GatewayError::ConfigError(
                "Breaker failure threshold must be greater than 0".to_string(),
            ));
        }

        if self.streaming.deadline_secs == 0 {
            return Err(GatewayError::ConfigError(
                "Stream deadline must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
