//! Cluster access for `Component` resources.
//!
//! The orchestrator only ever creates a component once and then reads it, so
//! the seam is deliberately two calls wide. Errors are classified here so that
//! nothing above this module has to look at `kube::Error`.

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::crds::Component;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Create rejected because (namespace, name) is taken
    #[error("Component {namespace}/{name} already exists")]
    AlreadyExists { namespace: String, name: String },

    /// Structural 404: the component was never created or has been deleted
    #[error("Component {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    /// API server refused the request for a reason retrying will not fix
    #[error("Kubernetes API rejected the request ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// Network failures, timeouts, 5xx and throttling
    #[error("Transient Kubernetes API error: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Map a kube client error for the component (namespace, name)
    pub fn from_kube(err: kube::Error, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(response) => match response.code {
                404 => Self::NotFound {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                409 => Self::AlreadyExists {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                },
                408 | 429 | 500..=599 => Self::Transient(format!(
                    "{} ({}): {}",
                    response.reason, response.code, response.message
                )),
                code => Self::Rejected {
                    code,
                    message: response.message,
                },
            },
            other => Self::Transient(other.to_string()),
        }
    }
}

/// Create/read access to `Component` resources.
///
/// Implementations must be safe to share between concurrent orchestrations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ComponentStore: Send + Sync {
    /// Create the component in `namespace`; never overwrites an existing one.
    async fn create(&self, namespace: &str, component: &Component) -> Result<Component, StoreError>;

    /// Fetch the current state of (namespace, name).
    async fn get(&self, namespace: &str, name: &str) -> Result<Component, StoreError>;
}

/// `ComponentStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeComponentStore {
    client: Client,
}

impl KubeComponentStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Component> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ComponentStore for KubeComponentStore {
    async fn create(&self, namespace: &str, component: &Component) -> Result<Component, StoreError> {
        let name = component.name_any();
        debug!(namespace = %namespace, name = %name, "Creating Component");

        match self.api(namespace).create(&PostParams::default(), component).await {
            Ok(created) => Ok(created),
            Err(e) => {
                let err = StoreError::from_kube(e, namespace, &name);
                warn!(namespace = %namespace, name = %name, error = %err, "Component create failed");
                Err(err)
            }
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Component, StoreError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPONENTS_PATH: &str = "/apis/kagenti.operator.dev/v1alpha1/namespaces/team1/components";

    fn status_body(code: u16, reason: &str, message: &str) -> serde_json::Value {
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code
        })
    }

    fn component_json(name: &str) -> serde_json::Value {
        json!({
            "apiVersion": "kagenti.operator.dev/v1alpha1",
            "kind": "Component",
            "metadata": { "name": name, "namespace": "team1" },
            "spec": {
                "description": "",
                "deployer": {
                    "name": name,
                    "namespace": "team1",
                    "kubernetes": {
                        "imageSpec": {
                            "image": name,
                            "imageTag": "v0.0.1",
                            "imageRegistry": "ghcr.io/kagenti"
                        }
                    }
                }
            },
            "status": {
                "buildStatus": { "phase": "Running", "message": "building" },
                "deploymentStatus": {
                    "phase": "Pending",
                    "message": "waiting for build",
                    "deploymentMessage": "0/1 replicas"
                }
            }
        })
    }

    async fn store_for(server: &MockServer) -> KubeComponentStore {
        let config = kube::Config::new(server.uri().parse().unwrap());
        KubeComponentStore::new(Client::try_from(config).unwrap())
    }

    #[tokio::test]
    async fn get_decodes_component_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{COMPONENTS_PATH}/weather-tool")))
            .respond_with(ResponseTemplate::new(200).set_body_json(component_json("weather-tool")))
            .mount(&server)
            .await;

        let component = store_for(&server).await.get("team1", "weather-tool").await.unwrap();
        let status = component.status.unwrap();
        let build = status.build_status.unwrap();
        assert_eq!(build.phase, crate::crds::Phase::Running);
        assert_eq!(build.message.as_deref(), Some("building"));

        let deploy = status.deployment_status.unwrap();
        assert_eq!(deploy.phase, crate::crds::Phase::Pending);
        assert_eq!(deploy.message_or_empty(), "0/1 replicas");
    }

    #[tokio::test]
    async fn not_found_is_structural() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{COMPONENTS_PATH}/gone")))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(status_body(404, "NotFound", "components \"gone\" not found")),
            )
            .mount(&server)
            .await;

        let err = store_for(&server).await.get("team1", "gone").await.unwrap_err();
        assert_eq!(
            err,
            StoreError::NotFound {
                namespace: "team1".into(),
                name: "gone".into()
            }
        );
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{COMPONENTS_PATH}/flaky")))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(status_body(503, "ServiceUnavailable", "etcd leader changed")),
            )
            .mount(&server)
            .await;

        let err = store_for(&server).await.get("team1", "flaky").await.unwrap_err();
        assert!(matches!(err, StoreError::Transient(msg) if msg.contains("etcd leader changed")));
    }

    #[tokio::test]
    async fn create_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPONENTS_PATH))
            .respond_with(
                ResponseTemplate::new(409).set_body_json(status_body(409, "AlreadyExists", "components \"weather-tool\" already exists")),
            )
            .mount(&server)
            .await;

        let component: Component = serde_json::from_value(component_json("weather-tool")).unwrap();
        let err = store_for(&server).await.create("team1", &component).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::AlreadyExists {
                namespace: "team1".into(),
                name: "weather-tool".into()
            }
        );
    }

    #[tokio::test]
    async fn create_forbidden_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPONENTS_PATH))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(status_body(403, "Forbidden", "cannot create components")),
            )
            .mount(&server)
            .await;

        let component: Component = serde_json::from_value(component_json("weather-tool")).unwrap();
        let err = store_for(&server).await.create("team1", &component).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Rejected {
                code: 403,
                message: "cannot create components".into()
            }
        );
    }
}
