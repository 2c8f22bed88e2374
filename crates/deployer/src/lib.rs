//! Build-and-deploy orchestration for Kagenti agent and tool components.
//!
//! Submits a `Component` custom resource to the cluster, follows the
//! operator's build and then its deployment, and reduces the whole run to a
//! single [`FinalOutcome`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use deployer::{KubeComponentStore, Orchestrator, RunBudget};
//! use tokio_util::sync::CancellationToken;
//!
//! let client = kube::Client::try_default().await?;
//! let orchestrator = Orchestrator::builder()
//!     .store(Arc::new(KubeComponentStore::new(client)))
//!     .build();
//!
//! let outcome = orchestrator
//!     .run_to_completion(&request, &RunBudget::default(), &CancellationToken::new())
//!     .await;
//! println!("{outcome}");
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod crds;
pub mod identity;
pub mod orchestrator;
pub mod progress;
pub mod request;
pub mod resources;
pub mod store;
pub mod telemetry;

pub use config::{ConfigError, DeployerConfig, PollingConfig, RegistryConfig};
pub use crds::{Component, ComponentSpec, ComponentStatus, Phase, PhaseStatus};
pub use orchestrator::{
    BuildOutcome, DeployOutcome, FinalOutcome, Orchestrator, OrchestratorBuilder, PhaseOutcome,
    PollPolicy, RunBudget, Stage, SubmissionError, WorkloadHandle,
};
pub use progress::{ChannelObserver, ProgressEvent, ProgressObserver, ProgressUpdate, TracingObserver};
pub use request::{parse_env_file, BuildRequest, ImageReference, ResourceKind, Source};
pub use resources::{ComponentBuilder, ConstructionError};
pub use store::{ComponentStore, KubeComponentStore, StoreError};
