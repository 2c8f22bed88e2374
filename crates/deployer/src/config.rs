//! Deployer Configuration
//!
//! Polling budgets, registry settings and default container environment used by
//! the orchestrator. Loaded from a mounted YAML file; every key is optional and
//! falls back to the values in [`DeployerConfig::default`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crds::EnvVar;
use crate::identity::IdentityConfig;
use crate::orchestrator::PollPolicy;

/// Default in-cluster registry used for source builds
pub const LOCAL_REGISTRY: &str = "registry.cr-system.svc.cluster.local:5000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main deployer configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployerConfig {
    /// Namespace used when a request does not name one
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Environment injected into every component ahead of request variables
    #[serde(default = "default_env")]
    pub default_env: Vec<EnvVar>,

    /// Workload identity wiring; `None` leaves manifests untouched
    #[serde(default)]
    pub identity: Option<IdentityConfig>,
}

/// Poll cadence and per-phase attempt budgets
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    #[serde(default = "default_max_attempts")]
    pub max_build_attempts: u32,

    #[serde(default = "default_max_attempts")]
    pub max_deploy_attempts: u32,
}

/// Target registry for images built from source
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// External registries need push credentials
    #[serde(default)]
    pub requires_auth: bool,

    /// Secret holding the push credentials when `requires_auth` is set
    #[serde(default)]
    pub credentials_secret: Option<String>,
}

fn default_namespace() -> String {
    "team1".to_string()
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    120
}

fn default_registry_url() -> String {
    LOCAL_REGISTRY.to_string()
}

fn default_env() -> Vec<EnvVar> {
    vec![
        EnvVar::literal("PORT", "8000"),
        EnvVar::literal("HOST", "0.0.0.0"),
        EnvVar::literal(
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "http://otel-collector.kagenti-system.svc.cluster.local:8335",
        ),
        EnvVar::literal("KEYCLOAK_URL", "http://keycloak.keycloak.svc.cluster.local:8080"),
        EnvVar::literal("UV_CACHE_DIR", "/app/.cache/uv"),
    ]
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            max_build_attempts: default_max_attempts(),
            max_deploy_attempts: default_max_attempts(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            requires_auth: false,
            credentials_secret: None,
        }
    }
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            polling: PollingConfig::default(),
            registry: RegistryConfig::default(),
            default_env: default_env(),
            identity: None,
        }
    }
}

impl PollingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn build_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), self.max_build_attempts)
    }

    pub fn deploy_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval(), self.max_deploy_attempts)
    }
}

impl DeployerConfig {
    /// Load configuration from a mounted YAML file
    pub fn from_mounted_file(config_path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    /// Load the mounted file if present, otherwise fall back to defaults.
    /// The result is always validated.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading deployer configuration");
                Self::from_mounted_file(path)?
            }
            Some(path) => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration has usable values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }

        if self.polling.poll_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "polling.pollIntervalSeconds must be greater than zero".to_string(),
            ));
        }

        if self.polling.max_build_attempts == 0 || self.polling.max_deploy_attempts == 0 {
            return Err(ConfigError::Invalid(
                "polling.maxBuildAttempts and polling.maxDeployAttempts must be at least 1"
                    .to_string(),
            ));
        }

        if self.registry.url.trim().is_empty() {
            return Err(ConfigError::Invalid("registry.url must not be empty".to_string()));
        }

        if self.registry.requires_auth
            && self
                .registry
                .credentials_secret
                .as_deref()
                .map_or(true, |s| s.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "registry.credentialsSecret is required when registry.requiresAuth is true"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
