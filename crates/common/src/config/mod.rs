//! Configuration management for FieldForm services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values
//!
//! The loaded value is immutable; rotating the plugin token or the vault key
//! means starting a new process with new configuration.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::errors::{AppError, Result};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Plugin authentication configuration
    pub auth: AuthConfig,

    /// Credential vault configuration
    pub vault: VaultConfig,

    /// Plan tiers and their quotas
    #[serde(default)]
    pub plans: PlansConfig,

    /// Response listing configuration
    #[serde(default)]
    pub responses: ResponsesConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally visible base URL used to build collection links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply embedded migrations on startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared secret presented by the mapping-tool plugin
    pub plugin_token: String,

    /// Header carrying the plugin secret
    #[serde(default = "default_plugin_token_header")]
    pub plugin_token_header: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultConfig {
    /// Secret the credential encryption key is derived from
    pub encryption_key: String,
}

/// Quota profile of a single plan tier
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PlanLimits {
    /// Maximum active forms; absent means unlimited
    #[serde(default)]
    pub max_forms: Option<u32>,

    /// Maximum fields per form
    pub max_fields: u32,

    /// Response ceiling frozen onto each new form
    pub max_responses: u32,

    /// Tier the tenant moves to once a tenant-owned store is configured
    #[serde(default)]
    pub upgrade_on_storage_config: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlansConfig {
    /// Tier name to limits
    #[serde(default = "default_plan_tiers")]
    pub tiers: BTreeMap<String, PlanLimits>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponsesConfig {
    /// Page size used when the caller does not ask for one
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Hard ceiling on a single page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second across the plugin API
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_public_base_url() -> String { "http://localhost:8080".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_plugin_token_header() -> String { "X-Plugin-Token".to_string() }
fn default_page_size() -> u64 { 1000 }
fn default_max_page_size() -> u64 { 5000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "fieldform".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

fn default_plan_tiers() -> BTreeMap<String, PlanLimits> {
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "free".to_string(),
        PlanLimits {
            max_forms: Some(2),
            max_fields: 5,
            max_responses: 40,
            upgrade_on_storage_config: Some("basic".to_string()),
        },
    );
    tiers.insert(
        "basic".to_string(),
        PlanLimits {
            max_forms: Some(6),
            max_fields: 30,
            max_responses: 300,
            upgrade_on_storage_config: None,
        },
    );
    tiers.insert(
        "premium".to_string(),
        PlanLimits {
            max_forms: None,
            max_fields: 15,
            max_responses: 1000,
            upgrade_on_storage_config: None,
        },
    );
    tiers
}

impl Default for PlansConfig {
    fn default() -> Self {
        Self { tiers: default_plan_tiers() }
    }
}

impl Default for ResponsesConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__AUTH__PLUGIN_TOKEN=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations the engine cannot run safely with
    pub fn validate(&self) -> Result<()> {
        if self.auth.plugin_token.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "auth.plugin_token must not be empty".to_string(),
            });
        }
        if self.vault.encryption_key.trim().is_empty() {
            return Err(AppError::Configuration {
                message: "vault.encryption_key must not be empty".to_string(),
            });
        }
        if self.plans.tiers.is_empty() {
            return Err(AppError::Configuration {
                message: "plans.tiers must define at least one tier".to_string(),
            });
        }
        if let Some((name, _)) = self
            .plans
            .tiers
            .iter()
            .find(|(_, limits)| limits.max_responses > i32::MAX as u32)
        {
            return Err(AppError::Configuration {
                message: format!("plans.tiers.{}.max_responses exceeds {}", name, i32::MAX),
            });
        }
        if self.responses.max_page_size == 0 {
            return Err(AppError::Configuration {
                message: "responses.max_page_size must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                public_base_url: default_public_base_url(),
                request_timeout_secs: default_request_timeout(),
                max_concurrent_requests: default_max_concurrent(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/fieldform".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                run_migrations: default_enabled(),
            },
            auth: AuthConfig {
                plugin_token: String::new(),
                plugin_token_header: default_plugin_token_header(),
            },
            vault: VaultConfig {
                encryption_key: String::new(),
            },
            plans: PlansConfig::default(),
            responses: ResponsesConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}
