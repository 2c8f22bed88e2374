//! Workload identity providers.
//!
//! A provider knows how to read the current workload's identity token and how
//! to patch a component manifest so the deployed workload receives one. Two
//! variants exist, SPIRE (JWT-SVID) and Kubernetes `ServiceAccount` tokens, and
//! the choice is always explicit: configuration or `KAGENTI_IDENTITY_PROVIDER`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod service_account;
pub mod spire;

pub use service_account::{ServiceAccountIdentity, ServiceAccountProvider};
pub use spire::{SpireIdentity, SpireProvider};

/// Environment variable consulted when no provider is configured
pub const PROVIDER_ENV_VAR: &str = "KAGENTI_IDENTITY_PROVIDER";

pub type Claims = Map<String, Value>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Identity provider not available: {0}")]
    ProviderNotFound(String),
}

/// Identity of the workload this process runs as
pub trait WorkloadIdentity: Send + Sync {
    /// Identity subject (SPIFFE ID or `system:serviceaccount:<ns>:<name>`)
    fn subject(&self) -> Result<String, IdentityError>;

    /// Raw token string
    fn token(&self) -> Result<String, IdentityError>;

    /// Decoded token claims
    fn claims(&self) -> Result<Claims, IdentityError>;
}

/// Volumes, mounts and service account to merge into a component's pod spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestPatches {
    pub service_account_name: Option<String>,
    pub volumes: Vec<Value>,
    pub volume_mounts: Vec<Value>,
}

pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn current_identity(&self) -> Box<dyn WorkloadIdentity>;

    fn manifest_patches(&self, component_name: &str) -> ManifestPatches;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityProviderKind {
    Spire,
    #[serde(alias = "service-account")]
    ServiceAccount,
}

impl IdentityProviderKind {
    pub fn default_token_path(self) -> &'static str {
        match self {
            Self::Spire => spire::DEFAULT_TOKEN_PATH,
            Self::ServiceAccount => service_account::DEFAULT_TOKEN_PATH,
        }
    }
}

impl fmt::Display for IdentityProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spire => write!(f, "spire"),
            Self::ServiceAccount => write!(f, "serviceaccount"),
        }
    }
}

impl FromStr for IdentityProviderKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "spire" => Ok(Self::Spire),
            "serviceaccount" | "service-account" => Ok(Self::ServiceAccount),
            other => Err(IdentityError::ProviderNotFound(format!(
                "Invalid identity provider name: '{other}'. Valid options are: 'spire', 'serviceaccount'"
            ))),
        }
    }
}

/// Identity settings from the deployer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityConfig {
    pub provider: IdentityProviderKind,

    /// Overrides the provider's default token location
    #[serde(default)]
    pub token_path: Option<PathBuf>,
}

impl IdentityConfig {
    pub fn token_path(&self) -> PathBuf {
        self.token_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.provider.default_token_path()))
    }
}

/// Build the configured provider. The token file must already exist.
pub fn provider_from_config(
    config: &IdentityConfig,
) -> Result<Box<dyn IdentityProvider>, IdentityError> {
    let token_path = config.token_path();
    if !token_path.exists() {
        return Err(IdentityError::ProviderNotFound(format!(
            "{} provider requested but token not found at {}",
            config.provider,
            token_path.display()
        )));
    }

    Ok(match config.provider {
        IdentityProviderKind::Spire => Box::new(SpireProvider::new(token_path)),
        IdentityProviderKind::ServiceAccount => Box::new(ServiceAccountProvider::new(token_path)),
    })
}

/// Resolve the provider from `KAGENTI_IDENTITY_PROVIDER` using default token paths
pub fn provider_from_env() -> Result<Box<dyn IdentityProvider>, IdentityError> {
    let name = std::env::var(PROVIDER_ENV_VAR).unwrap_or_default();
    if name.trim().is_empty() {
        return Err(IdentityError::ProviderNotFound(format!(
            "Identity provider must be explicitly specified. Set {PROVIDER_ENV_VAR} to 'spire' or 'serviceaccount'."
        )));
    }

    provider_from_config(&IdentityConfig {
        provider: name.parse()?,
        token_path: None,
    })
}

pub(crate) fn read_token(path: &Path, label: &str) -> Result<String, IdentityError> {
    let token = std::fs::read_to_string(path).map_err(|e| {
        IdentityError::TokenNotFound(format!(
            "Failed to read {label} token from {}: {e}",
            path.display()
        ))
    })?;

    let token = token.trim().to_string();
    if token.is_empty() {
        return Err(IdentityError::TokenNotFound(format!(
            "{label} token file {} is empty",
            path.display()
        )));
    }
    Ok(token)
}

/// Decode JWT claims without verifying the signature; the issuing system
/// (SPIRE agent or kubelet) is trusted for that.
pub(crate) fn decode_claims(token: &str, label: &str) -> Result<Claims, IdentityError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => {
            return Err(IdentityError::InvalidToken(format!(
                "{label} token is not a JWT (expected three segments)"
            )))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| IdentityError::InvalidToken(format!("Failed to decode {label} JWT payload: {e}")))?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(_) => Err(IdentityError::InvalidToken(format!(
            "{label} JWT payload is not a JSON object"
        ))),
        Err(e) => Err(IdentityError::InvalidToken(format!(
            "Failed to parse {label} JWT claims: {e}"
        ))),
    }
}
