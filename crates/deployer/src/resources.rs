//! `Component` manifest construction from a [`BuildRequest`].

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::config::{DeployerConfig, RegistryConfig};
use crate::crds::{
    AgentSpec, BuildSpec, Component, ComponentSpec, ComputeResources, ContainerPort, DeployerSpec,
    EnvVar, ImageSpec, KubernetesDeployerSpec, LocalObjectReference, PipelineParameter,
    PipelineSpec, ServicePort, ToolSpec,
};
use crate::identity::IdentityProvider;
use crate::request::{BuildRequest, ImageReference, ImageReferenceError, ResourceKind, Source};

/// Port the workload listens on inside the cluster
pub const DEFAULT_PORT: i32 = 8000;

/// Tag given to images built from source
pub const DEFAULT_IMAGE_TAG: &str = "v0.0.1";

/// Secret holding the git token used to clone private repositories
const SOURCE_REPO_SECRET: &str = "github-token-secret";

const DEV_LOCAL_MODE: &str = "dev-local";
const DEV_EXTERNAL_MODE: &str = "dev-external";

const CREATED_BY: &str = "kagenti-deployer";
const MANAGED_BY_OPERATOR: &str = "kagenti-operator";

lazy_static! {
    static ref RESOURCE_NAME: Regex = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("'{0}' is not a valid resource name (lowercase alphanumerics and '-', at most 63 characters)")]
    InvalidName(String),

    #[error("namespace must not be empty")]
    MissingNamespace,

    #[error("git source requires a repository URL")]
    MissingRepository,

    #[error("environment variable at position {0} has an empty name")]
    InvalidEnv(usize),

    #[error(transparent)]
    Image(#[from] ImageReferenceError),
}

/// Turns requests into `Component` manifests using deployer-wide settings
#[derive(Clone)]
pub struct ComponentBuilder {
    registry: RegistryConfig,
    default_env: Vec<EnvVar>,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl std::fmt::Debug for ComponentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentBuilder")
            .field("registry", &self.registry)
            .field("default_env", &self.default_env.len())
            .field("identity", &self.identity.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl Default for ComponentBuilder {
    fn default() -> Self {
        Self::new(&DeployerConfig::default())
    }
}

impl ComponentBuilder {
    pub fn new(config: &DeployerConfig) -> Self {
        Self {
            registry: config.registry.clone(),
            default_env: config.default_env.clone(),
            identity: None,
        }
    }

    /// Merge the provider's manifest patches into every component
    #[must_use]
    pub fn with_identity(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(provider);
        self
    }

    pub fn build(&self, request: &BuildRequest) -> Result<Component, ConstructionError> {
        validate(request)?;

        let (image_spec, build) = match &request.source {
            Source::Git {
                repo_url,
                branch,
                subfolder,
            } => {
                if repo_url.trim().is_empty() {
                    return Err(ConstructionError::MissingRepository);
                }
                let image_spec = self.source_image(&request.name);
                let build = self.build_spec(&image_spec, repo_url, branch, subfolder);
                (image_spec, Some(build))
            }
            Source::Image {
                reference,
                pull_secret,
            } => (existing_image(reference, pull_secret.as_deref())?, None),
        };

        let mut env = self.default_env.clone();
        env.extend(request.env.iter().cloned());

        let mut kubernetes = KubernetesDeployerSpec {
            image_spec,
            container_ports: vec![ContainerPort {
                name: "http".to_string(),
                container_port: DEFAULT_PORT,
                protocol: "TCP".to_string(),
            }],
            service_ports: vec![ServicePort {
                name: "http".to_string(),
                port: DEFAULT_PORT,
                target_port: DEFAULT_PORT,
                protocol: "TCP".to_string(),
            }],
            resources: Some(default_resources()),
            volumes: vec![json!({ "name": "cache", "emptyDir": {} })],
            volume_mounts: vec![json!({ "name": "cache", "mountPath": "/app/.cache" })],
            service_account_name: None,
        };

        if let Some(provider) = &self.identity {
            let patches = provider.manifest_patches(&request.name);
            debug!(provider = provider.name(), name = %request.name, "Applying identity patches");
            kubernetes.volumes.extend(patches.volumes);
            kubernetes.volume_mounts.extend(patches.volume_mounts);
            if patches.service_account_name.is_some() {
                kubernetes.service_account_name = patches.service_account_name;
            }
        }

        let (agent, tool) = match request.kind {
            ResourceKind::Agent => (Some(AgentSpec { build }), None),
            ResourceKind::Tool => (
                None,
                Some(ToolSpec {
                    tool_type: "MCP".to_string(),
                    build,
                }),
            ),
        };

        let mut component = Component::new(
            &request.name,
            ComponentSpec {
                description: request.description.clone(),
                suspend: false,
                agent,
                tool,
                deployer: DeployerSpec {
                    name: request.name.clone(),
                    namespace: request.namespace.clone(),
                    deploy_after_build: true,
                    kubernetes,
                    env,
                },
            },
        );
        component.metadata = ObjectMeta {
            name: Some(request.name.clone()),
            namespace: Some(request.namespace.clone()),
            labels: Some(labels(request)),
            ..ObjectMeta::default()
        };

        Ok(component)
    }

    fn source_image(&self, name: &str) -> ImageSpec {
        let pull_secrets = match (self.registry.requires_auth, &self.registry.credentials_secret) {
            (true, Some(secret)) => vec![LocalObjectReference {
                name: secret.clone(),
            }],
            _ => Vec::new(),
        };

        ImageSpec {
            image: name.to_string(),
            image_tag: DEFAULT_IMAGE_TAG.to_string(),
            image_registry: self.registry.url.clone(),
            image_pull_policy: "Always".to_string(),
            image_pull_secrets: pull_secrets,
        }
    }

    fn build_spec(
        &self,
        image: &ImageSpec,
        repo_url: &str,
        branch: &str,
        subfolder: &str,
    ) -> BuildSpec {
        let mut parameters = vec![
            param("SOURCE_REPO_SECRET", SOURCE_REPO_SECRET),
            param("repo-url", strip_scheme(repo_url.trim())),
            param("revision", branch),
            param("subfolder-path", subfolder),
            param("image", &image.reference()),
        ];

        let mode = if self.registry.requires_auth {
            if let Some(secret) = &self.registry.credentials_secret {
                parameters.push(param("registry-secret", secret));
            }
            DEV_EXTERNAL_MODE
        } else {
            DEV_LOCAL_MODE
        };

        BuildSpec {
            mode: mode.to_string(),
            pipeline: PipelineSpec { parameters },
            cleanup_after_build: true,
        }
    }
}

fn validate(request: &BuildRequest) -> Result<(), ConstructionError> {
    if request.name.len() > 63 || !RESOURCE_NAME.is_match(&request.name) {
        return Err(ConstructionError::InvalidName(request.name.clone()));
    }
    if request.namespace.trim().is_empty() {
        return Err(ConstructionError::MissingNamespace);
    }
    if let Some(index) = request.env.iter().position(|e| e.name.trim().is_empty()) {
        return Err(ConstructionError::InvalidEnv(index));
    }
    Ok(())
}

fn existing_image(reference: &str, pull_secret: Option<&str>) -> Result<ImageSpec, ConstructionError> {
    let parsed = ImageReference::parse(reference)?;
    Ok(ImageSpec {
        image: parsed.image,
        image_tag: parsed.tag,
        image_registry: parsed.registry,
        image_pull_policy: "Always".to_string(),
        image_pull_secrets: pull_secret
            .filter(|s| !s.trim().is_empty())
            .map(|name| LocalObjectReference {
                name: name.to_string(),
            })
            .into_iter()
            .collect(),
    })
}

fn labels(request: &BuildRequest) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("kagenti.io/type".to_string(), request.kind.to_string()),
        ("kagenti.io/protocol".to_string(), request.protocol.clone()),
        ("kagenti.io/framework".to_string(), request.framework.clone()),
        ("app.kubernetes.io/created-by".to_string(), CREATED_BY.to_string()),
        ("app.kubernetes.io/name".to_string(), MANAGED_BY_OPERATOR.to_string()),
    ])
}

fn default_resources() -> ComputeResources {
    ComputeResources {
        limits: BTreeMap::from([
            ("cpu".to_string(), "500m".to_string()),
            ("memory".to_string(), "1Gi".to_string()),
        ]),
        requests: BTreeMap::from([
            ("cpu".to_string(), "100m".to_string()),
            ("memory".to_string(), "256Mi".to_string()),
        ]),
    }
}

fn param(name: &str, value: &str) -> PipelineParameter {
    PipelineParameter {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}
