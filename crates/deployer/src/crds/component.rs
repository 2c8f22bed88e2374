//! `Component` Custom Resource Definition for agent and tool workloads

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// API group served by the Kagenti operator
pub const CRD_GROUP: &str = "kagenti.operator.dev";

/// API version of the `Component` resource
pub const CRD_VERSION: &str = "v1alpha1";

/// Plural resource name used in API paths
pub const COMPONENTS_PLURAL: &str = "components";

fn default_tool_type() -> String {
    "MCP".to_string()
}

fn default_true() -> bool {
    true
}

fn default_pull_policy() -> String {
    "Always".to_string()
}

fn default_port_protocol() -> String {
    "TCP".to_string()
}

/// Environment variable entry passed through to the deployed container
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Name of the environment variable
    pub name: String,

    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Reference to a secret or config map key (`secretKeyRef`, `configMapKeyRef`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<serde_json::Value>,
}

impl EnvVar {
    /// Plain `name=value` entry
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            value_from: None,
        }
    }
}

/// Name/value pair handed to the build pipeline
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct PipelineParameter {
    pub name: String,
    pub value: String,
}

/// Build pipeline definition
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct PipelineSpec {
    #[serde(default)]
    pub parameters: Vec<PipelineParameter>,
}

/// Source build configuration
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// Pipeline mode ("dev-local", "dev-external")
    pub mode: String,

    pub pipeline: PipelineSpec,

    /// Remove intermediate build resources once the image is pushed
    #[serde(default = "default_true")]
    pub cleanup_after_build: bool,
}

/// Agent-specific settings
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct AgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
}

/// Tool-specific settings
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool protocol family (currently always "MCP")
    #[serde(default = "default_tool_type")]
    pub tool_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSpec>,
}

/// Reference to a registry pull secret
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
pub struct LocalObjectReference {
    pub name: String,
}

/// Image coordinates for the deployed workload
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub image: String,
    pub image_tag: String,
    pub image_registry: String,
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
}

impl ImageSpec {
    /// Fully qualified `<registry>/<image>:<tag>` reference
    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.image_registry, self.image, self.image_tag)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    pub name: String,
    pub container_port: i32,
    #[serde(default = "default_port_protocol")]
    pub protocol: String,
}

/// CPU/memory quantities keyed by resource name ("cpu", "memory")
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct ComputeResources {
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: String,
    pub port: i32,
    pub target_port: i32,
    #[serde(default = "default_port_protocol")]
    pub protocol: String,
}

/// Pod-level settings applied by the operator's Kubernetes deployer
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesDeployerSpec {
    pub image_spec: ImageSpec,

    #[serde(default)]
    pub container_ports: Vec<ContainerPort>,

    #[serde(default)]
    pub service_ports: Vec<ServicePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ComputeResources>,

    /// Raw pod volumes (emptyDir, projected, csi)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// Deployment settings for the component
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployerSpec {
    pub name: String,
    pub namespace: String,

    /// Deploy automatically once the build succeeds
    #[serde(default = "default_true")]
    pub deploy_after_build: bool,

    pub kubernetes: KubernetesDeployerSpec,

    #[serde(default)]
    pub env: Vec<EnvVar>,
}

/// `Component` CRD reconciled by the Kagenti operator
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "kagenti.operator.dev", version = "v1alpha1", kind = "Component")]
#[kube(namespaced)]
#[kube(status = "ComponentStatus")]
#[kube(printcolumn = r#"{"name":"Build","type":"string","jsonPath":".status.buildStatus.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Deploy","type":"string","jsonPath":".status.deploymentStatus.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub suspend: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSpec>,

    pub deployer: DeployerSpec,
}

impl ComponentSpec {
    /// Whether the operator has to build an image before deploying
    pub fn has_build(&self) -> bool {
        self.agent.as_ref().is_some_and(|a| a.build.is_some())
            || self.tool.as_ref().is_some_and(|t| t.build.is_some())
    }
}

/// Lifecycle phase reported by the operator for a build or a deployment
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Hash)]
pub enum Phase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    Ready,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Phase {
    /// Terminal phases of a build: `Succeeded`, `Failed`, `Error`
    pub fn is_build_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }

    /// Terminal phases of a deployment: `Ready`, `Failed`, `Error`
    pub fn is_deploy_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Error)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Error => "Error",
            Self::Ready => "Ready",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Error" => Self::Error,
            "Ready" => Self::Ready,
            _ => Self::Unknown,
        })
    }
}

/// Phase plus the operator's explanation for it
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Deployment status may carry this alongside, or instead of, `message`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_message: Option<String>,
}

impl PhaseStatus {
    /// `deploymentMessage` wins over `message` when both are set
    pub fn message_or_empty(&self) -> &str {
        self.deployment_message
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or_default()
    }
}

/// Status of the `Component`
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_status: Option<PhaseStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_status: Option<PhaseStatus>,
}
