//! Typed results of a single phase and of a whole run

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crds::{Component, Phase, PhaseStatus};
use crate::resources::ConstructionError;

/// Which half of the lifecycle is being watched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Deploy,
}

impl Stage {
    /// Phase that ends the stage successfully
    pub fn success_phase(self) -> Phase {
        match self {
            Self::Build => Phase::Succeeded,
            Self::Deploy => Phase::Ready,
        }
    }

    pub fn is_terminal(self, phase: Phase) -> bool {
        match self {
            Self::Build => phase.is_build_terminal(),
            Self::Deploy => phase.is_deploy_terminal(),
        }
    }

    /// Status block this stage reads; a missing block reads as `Unknown`
    pub fn status_of(self, component: &Component) -> PhaseStatus {
        let status = component.status.as_ref();
        match self {
            Self::Build => status.and_then(|s| s.build_status.clone()),
            Self::Deploy => status.and_then(|s| s.deployment_status.clone()),
        }
        .unwrap_or_default()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
        }
    }
}

/// Resource successfully submitted to the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadHandle {
    pub namespace: String,
    pub name: String,
    /// Image-sourced components go straight to the deploy stage
    pub requires_build: bool,
}

impl WorkloadHandle {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, requires_build: bool) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            requires_build,
        }
    }
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Non-retryable failures of `submit`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("Component {namespace}/{name} already exists; choose a different name or delete it first")]
    AlreadyExists { namespace: String, name: String },

    #[error("Kubernetes client not initialized; cannot create components")]
    ClientUnavailable,

    #[error("Failed to construct component: {0}")]
    Construction(#[from] ConstructionError),

    #[error("Kubernetes API rejected component {name}: {message}")]
    Rejected { name: String, message: String },
}

/// How one polled stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Reached the stage's success phase
    Completed { message: String, attempts: u32 },
    /// `Failed` or `Error`, with the cluster message verbatim
    Failed {
        phase: Phase,
        message: String,
        attempts: u32,
    },
    /// The component does not exist (never created, or deleted mid-poll)
    NotFound { attempts: u32 },
    /// Attempt budget or phase deadline exhausted while non-terminal
    TimedOut {
        last_phase: Phase,
        last_message: String,
        attempts: u32,
        budget: Duration,
    },
    Cancelled { attempts: u32 },
    /// No cluster store was configured
    Unavailable,
}

pub type BuildOutcome = PhaseOutcome;
pub type DeployOutcome = PhaseOutcome;

impl PhaseOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Number of status reads performed
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts, .. }
            | Self::Failed { attempts, .. }
            | Self::NotFound { attempts }
            | Self::TimedOut { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
            Self::Unavailable => 0,
        }
    }

    /// The cluster's success message, or the final outcome for a stage that
    /// did not complete
    pub fn into_result(self, stage: Stage, handle: &WorkloadHandle) -> Result<String, FinalOutcome> {
        let failed = |reason: String| match stage {
            Stage::Build => FinalOutcome::BuildFailed { reason },
            Stage::Deploy => FinalOutcome::DeployFailed { reason },
        };

        Err(match self {
            Self::Completed { message, .. } => return Ok(message),
            Self::Failed { phase, message, .. } => failed(format!(
                "{stage} of '{}' in '{}' finished with status {phase}: {message}",
                handle.name, handle.namespace
            )),
            Self::NotFound { attempts } => failed(format!(
                "component '{}' in '{}' not found during {stage} polling (attempt {attempts})",
                handle.name, handle.namespace
            )),
            Self::Unavailable => failed(format!(
                "Kubernetes client not initialized; cannot poll {stage} status of '{}'",
                handle.name
            )),
            Self::TimedOut {
                last_phase,
                last_message,
                attempts,
                budget,
            } => FinalOutcome::Timeout {
                stage,
                reason: format!(
                    "{stage} of '{}' did not finish after {attempts} attempts ({}s); last status {last_phase}{}",
                    handle.name,
                    budget.as_secs(),
                    if last_message.is_empty() {
                        String::new()
                    } else {
                        format!(": {last_message}")
                    }
                ),
            },
            Self::Cancelled { attempts } => FinalOutcome::Cancelled {
                stage,
                reason: format!(
                    "{stage} monitoring of '{}' cancelled after {attempts} attempts",
                    handle.name
                ),
            },
        })
    }
}

/// Terminal result of `run_to_completion`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalOutcome {
    Deployed {
        handle: WorkloadHandle,
        message: String,
    },
    BuildFailed {
        reason: String,
    },
    DeployFailed {
        reason: String,
    },
    Timeout {
        stage: Stage,
        reason: String,
    },
    SubmissionFailed {
        error: SubmissionError,
    },
    Cancelled {
        stage: Stage,
        reason: String,
    },
}

impl FinalOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deployed { .. })
    }

    /// Human-readable summary
    pub fn message(&self) -> String {
        match self {
            Self::Deployed { handle, message } if message.is_empty() => {
                format!("'{}' deployed in '{}'", handle.name, handle.namespace)
            }
            Self::Deployed { handle, message } => {
                format!("'{}' deployed in '{}': {message}", handle.name, handle.namespace)
            }
            Self::BuildFailed { reason }
            | Self::DeployFailed { reason }
            | Self::Timeout { reason, .. }
            | Self::Cancelled { reason, .. } => reason.clone(),
            Self::SubmissionFailed { error } => error.to_string(),
        }
    }

    /// Short machine-friendly label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Deployed { .. } => "Deployed",
            Self::BuildFailed { .. } => "BuildFailed",
            Self::DeployFailed { .. } => "DeployFailed",
            Self::Timeout {
                stage: Stage::Build,
                ..
            } => "BuildTimedOut",
            Self::Timeout {
                stage: Stage::Deploy,
                ..
            } => "DeployTimedOut",
            Self::SubmissionFailed { .. } => "SubmissionFailed",
            Self::Cancelled { .. } => "Cancelled",
        }
    }
}

impl fmt::Display for FinalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.message())
    }
}

impl From<SubmissionError> for FinalOutcome {
    fn from(error: SubmissionError) -> Self {
        Self::SubmissionFailed { error }
    }
}
