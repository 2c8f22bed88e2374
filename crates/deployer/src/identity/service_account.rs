//! Kubernetes `ServiceAccount` identity provider

use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::{json, Value};

use super::{
    decode_claims, read_token, Claims, IdentityError, IdentityProvider, ManifestPatches,
    WorkloadIdentity,
};

pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

const NAMESPACE_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";
const SERVICE_ACCOUNT_MOUNT: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const LABEL: &str = "ServiceAccount";

pub struct ServiceAccountIdentity {
    token_path: PathBuf,
    namespace_path: PathBuf,
    token: OnceLock<String>,
}

impl ServiceAccountIdentity {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            namespace_path: PathBuf::from(NAMESPACE_PATH),
            token: OnceLock::new(),
        }
    }

    /// Read the namespace from a non-standard location
    #[must_use]
    pub fn with_namespace_path(mut self, namespace_path: impl Into<PathBuf>) -> Self {
        self.namespace_path = namespace_path.into();
        self
    }

    /// Pod namespace from the projected file, then `POD_NAMESPACE`, then "default"
    fn namespace(&self) -> String {
        std::fs::read_to_string(&self.namespace_path)
            .map(|ns| ns.trim().to_string())
            .ok()
            .filter(|ns| !ns.is_empty())
            .or_else(|| std::env::var("POD_NAMESPACE").ok())
            .unwrap_or_else(|| "default".to_string())
    }

    fn raw_claims(&self) -> Result<Claims, IdentityError> {
        decode_claims(&self.token()?, LABEL)
    }
}

impl WorkloadIdentity for ServiceAccountIdentity {
    /// `system:serviceaccount:<namespace>:<name>`
    fn subject(&self) -> Result<String, IdentityError> {
        if let Some(sub) = self.raw_claims()?.get("sub").and_then(Value::as_str) {
            return Ok(sub.to_string());
        }
        Ok(format!("system:serviceaccount:{}:default", self.namespace()))
    }

    fn token(&self) -> Result<String, IdentityError> {
        if let Some(token) = self.token.get() {
            return Ok(token.clone());
        }
        let token = read_token(&self.token_path, LABEL)?;
        Ok(self.token.get_or_init(|| token).clone())
    }

    fn claims(&self) -> Result<Claims, IdentityError> {
        let mut claims = self.raw_claims()?;
        if !claims.contains_key("namespace") {
            claims.insert("namespace".to_string(), Value::String(self.namespace()));
        }
        Ok(claims)
    }
}

pub struct ServiceAccountProvider {
    token_path: PathBuf,
}

impl ServiceAccountProvider {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }
}

impl IdentityProvider for ServiceAccountProvider {
    fn name(&self) -> &'static str {
        "serviceaccount"
    }

    fn current_identity(&self) -> Box<dyn WorkloadIdentity> {
        Box::new(ServiceAccountIdentity::new(self.token_path.clone()))
    }

    /// Run the component under its own service account with a projected,
    /// audience-scoped token at the standard location.
    fn manifest_patches(&self, component_name: &str) -> ManifestPatches {
        ManifestPatches {
            service_account_name: Some(component_name.to_string()),
            volumes: vec![json!({
                "name": "kagenti-identity-token",
                "projected": {
                    "sources": [{
                        "serviceAccountToken": {
                            "path": "token",
                            "expirationSeconds": 3600,
                            "audience": "kagenti"
                        }
                    }]
                }
            })],
            volume_mounts: vec![json!({
                "name": "kagenti-identity-token",
                "mountPath": SERVICE_ACCOUNT_MOUNT,
                "readOnly": true
            })],
        }
    }
}
