//! Progress reporting for live status displays.
//!
//! Observers are invoked inline from the poll loop, so an implementation must
//! return immediately: log, buffer, or hand the event to a channel.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::crds::Phase;
use crate::orchestrator::Stage;

/// What a single poll tick observed
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    /// Status read succeeded
    Status { phase: Phase, message: String },
    /// Status read failed; the attempt still counts against the budget
    PollError { message: String },
}

/// One poll tick for one component
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub namespace: String,
    pub name: String,
    pub stage: Stage,
    /// 1-based attempt number within the stage
    pub attempt: u32,
    pub max_attempts: u32,
    pub update: ProgressUpdate,
    pub observed_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn phase(&self) -> Option<Phase> {
        match &self.update {
            ProgressUpdate::Status { phase, .. } => Some(*phase),
            ProgressUpdate::PollError { .. } => None,
        }
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.update {
            ProgressUpdate::Status { phase, message } => write!(
                f,
                "{} status for '{}' [{}/{}]: {}{}",
                self.stage,
                self.name,
                self.attempt,
                self.max_attempts,
                phase,
                if message.is_empty() {
                    String::new()
                } else {
                    format!(" - {message}")
                }
            ),
            ProgressUpdate::PollError { message } => write!(
                f,
                "{} status for '{}' [{}/{}]: poll error - {}",
                self.stage, self.name, self.attempt, self.max_attempts, message
            ),
        }
    }
}

/// Receives every poll tick. Must not block.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Writes each tick to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        match &event.update {
            ProgressUpdate::Status { phase, message } => info!(
                namespace = %event.namespace,
                name = %event.name,
                stage = %event.stage,
                attempt = event.attempt,
                max_attempts = event.max_attempts,
                phase = %phase,
                message = %message,
                "Component status"
            ),
            ProgressUpdate::PollError { message } => warn!(
                namespace = %event.namespace,
                name = %event.name,
                stage = %event.stage,
                attempt = event.attempt,
                max_attempts = event.max_attempts,
                error = %message,
                "Error polling component status"
            ),
        }
    }
}

/// Forwards ticks over an unbounded channel; a dropped receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}
