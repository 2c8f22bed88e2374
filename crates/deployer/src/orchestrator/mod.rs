//! Build/deploy orchestration for `Component` resources.
//!
//! A run submits one component, watches `buildStatus` until it is terminal and,
//! only when the build `Succeeded`, watches `deploymentStatus` until the
//! workload is `Ready`. Both stages share one fixed-interval poll loop with a
//! per-stage attempt budget and wall-clock deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PollingConfig;
use crate::crds::Phase;
use crate::progress::{ProgressEvent, ProgressObserver, ProgressUpdate, TracingObserver};
use crate::request::BuildRequest;
use crate::resources::ComponentBuilder;
use crate::store::{ComponentStore, StoreError};

pub mod outcome;

pub use outcome::{
    BuildOutcome, DeployOutcome, FinalOutcome, PhaseOutcome, Stage, SubmissionError,
    WorkloadHandle,
};

/// Poll cadence and attempt budget for one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Wall-clock budget for the stage: `interval × max_attempts`
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollingConfig::default().build_policy()
    }
}

/// Budgets for a full build-then-deploy run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    pub poll_interval: Duration,
    pub max_build_attempts: u32,
    pub max_deploy_attempts: u32,
}

impl RunBudget {
    pub fn build_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.max_build_attempts)
    }

    pub fn deploy_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval, self.max_deploy_attempts)
    }
}

impl From<&PollingConfig> for RunBudget {
    fn from(config: &PollingConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_build_attempts: config.max_build_attempts,
            max_deploy_attempts: config.max_deploy_attempts,
        }
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::from(&PollingConfig::default())
    }
}

/// Drives requests from submission to a [`FinalOutcome`].
///
/// Cheap to clone; clones share the store and observer.
#[derive(Clone)]
pub struct Orchestrator {
    store: Option<Arc<dyn ComponentStore>>,
    components: ComponentBuilder,
    observer: Arc<dyn ProgressObserver>,
}

#[derive(Default)]
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn ComponentStore>>,
    components: Option<ComponentBuilder>,
    observer: Option<Arc<dyn ProgressObserver>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ComponentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Leave the store unset when no cluster connection could be made;
    /// submissions then fail with `ClientUnavailable`.
    #[must_use]
    pub fn maybe_store(mut self, store: Option<Arc<dyn ComponentStore>>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn components(mut self, components: ComponentBuilder) -> Self {
        self.components = Some(components);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            store: self.store,
            components: self.components.unwrap_or_default(),
            observer: self.observer.unwrap_or_else(|| Arc::new(TracingObserver)),
        }
    }
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Create the component for `request`. Never overwrites an existing one.
    #[instrument(skip(self, request), fields(namespace = %request.namespace, name = %request.name, kind = %request.kind))]
    pub async fn submit(&self, request: &BuildRequest) -> Result<WorkloadHandle, SubmissionError> {
        let Some(store) = self.store.as_ref() else {
            error!("Kubernetes client not initialized, cannot create component");
            return Err(SubmissionError::ClientUnavailable);
        };

        let component = self.components.build(request)?;
        let requires_build = component.spec.has_build();
        debug!(requires_build, "Constructed component manifest");

        match store.create(&request.namespace, &component).await {
            Ok(_) => {
                info!(requires_build, "Component creation request sent");
                Ok(WorkloadHandle::new(
                    request.namespace.clone(),
                    request.name.clone(),
                    requires_build,
                ))
            }
            Err(StoreError::AlreadyExists { namespace, name }) => {
                warn!("Component already exists");
                Err(SubmissionError::AlreadyExists { namespace, name })
            }
            Err(e) => {
                error!(error = %e, "Failed to create component");
                Err(SubmissionError::Rejected {
                    name: request.name.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Poll `buildStatus` until `Succeeded`, `Failed` or `Error`
    pub async fn await_build_completion(
        &self,
        handle: &WorkloadHandle,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> BuildOutcome {
        self.poll_stage(Stage::Build, handle, policy, cancel).await
    }

    /// Poll `deploymentStatus` until `Ready`, `Failed` or `Error`
    pub async fn await_deploy_completion(
        &self,
        handle: &WorkloadHandle,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> DeployOutcome {
        self.poll_stage(Stage::Deploy, handle, policy, cancel).await
    }

    /// Submit, wait for the build and, only if it `Succeeded`, wait for the deployment
    #[instrument(skip_all, fields(namespace = %request.namespace, name = %request.name))]
    pub async fn run_to_completion(
        &self,
        request: &BuildRequest,
        budget: &RunBudget,
        cancel: &CancellationToken,
    ) -> FinalOutcome {
        if cancel.is_cancelled() {
            info!("Cancelled before submission, nothing created");
            return FinalOutcome::Cancelled {
                stage: Stage::Build,
                reason: format!("deployment of '{}' cancelled before submission", request.name),
            };
        }

        let handle = match self.submit(request).await {
            Ok(handle) => handle,
            Err(e) => return e.into(),
        };

        if handle.requires_build {
            let build = self
                .await_build_completion(&handle, &budget.build_policy(), cancel)
                .await;
            if let Err(outcome) = build.into_result(Stage::Build, &handle) {
                warn!(outcome = %outcome, "Build did not succeed");
                return outcome;
            }
            info!("Build succeeded, waiting for deployment");
        } else {
            info!("Prebuilt image, waiting for deployment");
        }

        let deploy = self
            .await_deploy_completion(&handle, &budget.deploy_policy(), cancel)
            .await;
        match deploy.into_result(Stage::Deploy, &handle) {
            Ok(message) => {
                info!("Component deployed");
                FinalOutcome::Deployed { handle, message }
            }
            Err(outcome) => {
                warn!(outcome = %outcome, "Deployment did not become ready");
                outcome
            }
        }
    }

    #[instrument(skip_all, fields(stage = %stage, namespace = %handle.namespace, name = %handle.name, max_attempts = policy.max_attempts))]
    async fn poll_stage(
        &self,
        stage: Stage,
        handle: &WorkloadHandle,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        let Some(store) = self.store.as_ref() else {
            error!("Kubernetes client not initialized, cannot poll status");
            return PhaseOutcome::Unavailable;
        };

        // Reads run on a fixed grid, `start + interval × n`, so time spent inside
        // a read never pushes the last one past the deadline.
        let start = Instant::now();
        let deadline = start + policy.budget();
        let mut last_phase = Phase::Unknown;
        let mut last_message = String::new();
        let mut attempts = 0;

        while attempts < policy.max_attempts {
            if cancel.is_cancelled() {
                info!(attempts, "Polling cancelled");
                return PhaseOutcome::Cancelled { attempts };
            }
            attempts += 1;

            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(attempts, "Polling cancelled during status read");
                    return PhaseOutcome::Cancelled { attempts };
                }
                read = timeout_at(deadline, store.get(&handle.namespace, &handle.name)) => read,
            };

            let Ok(read) = read else {
                warn!(attempts, "Phase deadline reached during status read");
                return PhaseOutcome::TimedOut {
                    last_phase,
                    last_message,
                    attempts,
                    budget: policy.budget(),
                };
            };

            match read {
                Ok(component) => {
                    let status = stage.status_of(&component);
                    let message = status.message_or_empty().to_string();
                    self.report(stage, handle, attempts, policy, ProgressUpdate::Status {
                        phase: status.phase,
                        message: message.clone(),
                    });

                    if status.phase != last_phase {
                        debug!(attempt = attempts, phase = %status.phase, "Phase changed");
                    }

                    if stage.is_terminal(status.phase) {
                        return if status.phase == stage.success_phase() {
                            PhaseOutcome::Completed { message, attempts }
                        } else {
                            PhaseOutcome::Failed {
                                phase: status.phase,
                                message,
                                attempts,
                            }
                        };
                    }

                    last_phase = status.phase;
                    last_message = message;
                }
                Err(StoreError::NotFound { .. }) => {
                    warn!(attempt = attempts, "Component not found");
                    self.report(stage, handle, attempts, policy, ProgressUpdate::PollError {
                        message: format!("component '{}' not found", handle.name),
                    });
                    return PhaseOutcome::NotFound { attempts };
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Error polling status, will retry");
                    self.report(stage, handle, attempts, policy, ProgressUpdate::PollError {
                        message: e.to_string(),
                    });
                }
            }

            if attempts < policy.max_attempts {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        info!(attempts, "Polling cancelled while waiting");
                        return PhaseOutcome::Cancelled { attempts };
                    }
                    () = sleep_until(start + policy.interval.saturating_mul(attempts)) => {}
                }
            }
        }

        warn!(attempts, last_phase = %last_phase, "Attempt budget exhausted");
        PhaseOutcome::TimedOut {
            last_phase,
            last_message,
            attempts,
            budget: policy.budget(),
        }
    }

    fn report(
        &self,
        stage: Stage,
        handle: &WorkloadHandle,
        attempt: u32,
        policy: &PollPolicy,
        update: ProgressUpdate,
    ) {
        self.observer.on_progress(&ProgressEvent {
            namespace: handle.namespace.clone(),
            name: handle.name.clone(),
            stage,
            attempt,
            max_attempts: policy.max_attempts,
            update,
            observed_at: Utc::now(),
        });
    }
}
