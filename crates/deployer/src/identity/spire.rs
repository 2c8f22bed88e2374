//! SPIRE/SPIFFE identity provider

use std::path::PathBuf;
use std::sync::OnceLock;

use serde_json::json;

use super::{
    decode_claims, read_token, Claims, IdentityError, IdentityProvider, ManifestPatches,
    WorkloadIdentity,
};

/// JWT-SVID written by the SPIFFE helper sidecar
pub const DEFAULT_TOKEN_PATH: &str = "/opt/jwt_svid.token";

const LABEL: &str = "SPIRE";

/// Identity backed by a JWT-SVID file. The token is read once and cached.
pub struct SpireIdentity {
    token_path: PathBuf,
    token: OnceLock<String>,
}

impl SpireIdentity {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
            token: OnceLock::new(),
        }
    }
}

impl WorkloadIdentity for SpireIdentity {
    fn subject(&self) -> Result<String, IdentityError> {
        match self.claims()?.get("sub").and_then(|v| v.as_str()) {
            Some(sub) => Ok(sub.to_string()),
            None => Err(IdentityError::InvalidToken(
                "SPIRE JWT token does not contain a 'sub' claim".to_string(),
            )),
        }
    }

    fn token(&self) -> Result<String, IdentityError> {
        if let Some(token) = self.token.get() {
            return Ok(token.clone());
        }
        let token = read_token(&self.token_path, LABEL)?;
        Ok(self.token.get_or_init(|| token).clone())
    }

    fn claims(&self) -> Result<Claims, IdentityError> {
        decode_claims(&self.token()?, LABEL)
    }
}

pub struct SpireProvider {
    token_path: PathBuf,
}

impl SpireProvider {
    pub fn new(token_path: impl Into<PathBuf>) -> Self {
        Self {
            token_path: token_path.into(),
        }
    }
}

impl IdentityProvider for SpireProvider {
    fn name(&self) -> &'static str {
        "spire"
    }

    fn current_identity(&self) -> Box<dyn WorkloadIdentity> {
        Box::new(SpireIdentity::new(self.token_path.clone()))
    }

    /// Mount the SPIFFE workload API socket through the CSI driver.
    fn manifest_patches(&self, _component_name: &str) -> ManifestPatches {
        ManifestPatches {
            service_account_name: None,
            volumes: vec![json!({
                "name": "spiffe-workload-api",
                "csi": { "driver": "csi.spiffe.io", "readOnly": true }
            })],
            volume_mounts: vec![json!({
                "name": "spiffe-workload-api",
                "mountPath": "/spiffe-workload-api",
                "readOnly": true
            })],
        }
    }
}
