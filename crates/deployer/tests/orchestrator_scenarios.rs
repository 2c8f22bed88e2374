//! End-to-end orchestration scenarios against an in-memory component store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use deployer::crds::EnvVar;
use deployer::{
    BuildRequest, ChannelObserver, Component, ComponentStatus, ComponentStore, FinalOutcome,
    Orchestrator, Phase, PhaseStatus, ProgressEvent, ResourceKind, RunBudget, Source, Stage,
    StoreError, SubmissionError,
};

/// Cluster stand-in: stores created components and walks them through
/// scripted phases, one step per read. Build phases advance until the build is
/// terminal; only after a `Succeeded` build do deploy phases start advancing.
#[derive(Default)]
struct FakeCluster {
    components: Mutex<BTreeMap<(String, String), Component>>,
    progress: Mutex<Progress>,
}

#[derive(Default)]
struct Progress {
    build: VecDeque<Phase>,
    deploy: VecDeque<Phase>,
    build_done: Option<Phase>,
    build_reads: u32,
    deploy_reads: u32,
}

/// Next scripted phase; the final entry repeats forever
fn next(script: &mut VecDeque<Phase>) -> Phase {
    if script.len() > 1 {
        script.pop_front().unwrap_or_default()
    } else {
        script.front().copied().unwrap_or_default()
    }
}

impl FakeCluster {
    fn scripted(build: &[Phase], deploy: &[Phase]) -> Arc<Self> {
        Arc::new(Self {
            components: Mutex::default(),
            progress: Mutex::new(Progress {
                build: build.iter().copied().collect(),
                deploy: deploy.iter().copied().collect(),
                ..Progress::default()
            }),
        })
    }

    fn build_reads(&self) -> u32 {
        self.progress.lock().unwrap().build_reads
    }

    fn deploy_reads(&self) -> u32 {
        self.progress.lock().unwrap().deploy_reads
    }

    fn delete(&self, namespace: &str, name: &str) {
        self.components
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl ComponentStore for FakeCluster {
    async fn create(&self, namespace: &str, component: &Component) -> Result<Component, StoreError> {
        let name = component.metadata.name.clone().unwrap_or_default();
        let mut components = self.components.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if components.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: namespace.to_string(),
                name,
            });
        }
        components.insert(key, component.clone());
        Ok(component.clone())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Component, StoreError> {
        let mut component = self
            .components
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })?;

        let mut progress = self.progress.lock().unwrap();
        let (build, deploy) = if !component.spec.has_build() {
            progress.deploy_reads += 1;
            (None, Some(next(&mut progress.deploy)))
        } else if let Some(done) = progress.build_done {
            if done == Phase::Succeeded {
                progress.deploy_reads += 1;
                (Some(done), Some(next(&mut progress.deploy)))
            } else {
                (Some(done), None)
            }
        } else {
            progress.build_reads += 1;
            let phase = next(&mut progress.build);
            if phase.is_build_terminal() {
                progress.build_done = Some(phase);
            }
            (Some(phase), None)
        };

        component.status = Some(ComponentStatus {
            build_status: build.map(|phase| PhaseStatus {
                phase,
                message: Some(format!("build {phase}")),
                deployment_message: None,
            }),
            deployment_status: deploy.map(|phase| PhaseStatus {
                phase,
                message: None,
                deployment_message: Some(format!("deployment {phase}")),
            }),
        });
        Ok(component)
    }
}

fn weather_tool() -> BuildRequest {
    BuildRequest {
        name: "weather-tool".to_string(),
        namespace: "team1".to_string(),
        kind: ResourceKind::Tool,
        source: Source::Git {
            repo_url: "https://github.com/kagenti/agent-examples".to_string(),
            branch: "main".to_string(),
            subfolder: "mcp/weather_tool".to_string(),
        },
        protocol: "mcp".to_string(),
        framework: "Python".to_string(),
        description: "Weather lookups over MCP".to_string(),
        env: vec![EnvVar::literal("LOG_LEVEL", "INFO")],
    }
}

fn budget(max_build_attempts: u32, max_deploy_attempts: u32) -> RunBudget {
    RunBudget {
        poll_interval: Duration::from_secs(10),
        max_build_attempts,
        max_deploy_attempts,
    }
}

fn orchestrator(cluster: &Arc<FakeCluster>) -> (Orchestrator, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
    let (observer, events) = ChannelObserver::new();
    let orchestrator = Orchestrator::builder()
        .store(cluster.clone())
        .observer(Arc::new(observer))
        .build();
    (orchestrator, events)
}

fn drain(mut events: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn weather_tool_builds_then_deploys() {
    let cluster = FakeCluster::scripted(
        &[Phase::Pending, Phase::Running, Phase::Running, Phase::Succeeded],
        &[Phase::Pending, Phase::Ready],
    );
    let (orchestrator, events) = orchestrator(&cluster);

    let outcome = orchestrator
        .run_to_completion(&weather_tool(), &budget(120, 120), &CancellationToken::new())
        .await;

    assert!(outcome.is_success(), "unexpected outcome: {outcome}");
    assert!(matches!(&outcome, FinalOutcome::Deployed { handle, message }
        if handle.name == "weather-tool" && message == "deployment Ready"));

    let events = drain(events);
    let build: Vec<_> = events.iter().filter(|e| e.stage == Stage::Build).collect();
    let deploy: Vec<_> = events.iter().filter(|e| e.stage == Stage::Deploy).collect();
    assert_eq!(build.len(), 4);
    assert_eq!(deploy.len(), 2);
    assert_eq!(
        build.iter().map(|e| e.phase()).collect::<Vec<_>>(),
        vec![
            Some(Phase::Pending),
            Some(Phase::Running),
            Some(Phase::Running),
            Some(Phase::Succeeded)
        ]
    );
    assert_eq!(deploy.last().and_then(|e| e.phase()), Some(Phase::Ready));
    assert_eq!(build.iter().map(|e| e.attempt).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn failed_build_never_polls_deploy() {
    let cluster = FakeCluster::scripted(&[Phase::Pending, Phase::Failed], &[Phase::Ready]);
    let (orchestrator, events) = orchestrator(&cluster);

    let outcome = orchestrator
        .run_to_completion(&weather_tool(), &budget(120, 120), &CancellationToken::new())
        .await;

    assert!(matches!(&outcome, FinalOutcome::BuildFailed { reason } if reason.contains("build Failed")));
    let events = drain(events);
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.stage == Stage::Build));
}

#[tokio::test(start_paused = true)]
async fn build_stuck_running_times_out_after_exactly_max_attempts() {
    let cluster = FakeCluster::scripted(&[Phase::Running], &[Phase::Ready]);
    let (orchestrator, events) = orchestrator(&cluster);
    let started = Instant::now();

    let outcome = orchestrator
        .run_to_completion(&weather_tool(), &budget(3, 120), &CancellationToken::new())
        .await;

    assert_eq!(outcome.label(), "BuildTimedOut");
    assert!(matches!(outcome, FinalOutcome::Timeout { stage: Stage::Build, .. }));
    assert_eq!(cluster.build_reads(), 3);
    assert_eq!(drain(events).len(), 3);
    // Three polls, two sleeps between them.
    assert_eq!(started.elapsed(), Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn image_source_skips_the_build_stage() {
    let cluster = FakeCluster::scripted(&[Phase::Running], &[Phase::Pending, Phase::Running, Phase::Ready]);
    let (orchestrator, events) = orchestrator(&cluster);
    let request = BuildRequest {
        name: "weather-service".to_string(),
        kind: ResourceKind::Agent,
        source: Source::Image {
            reference: "ghcr.io/kagenti/agent-examples/weather-service:v0.0.1".to_string(),
            pull_secret: None,
        },
        ..weather_tool()
    };

    let outcome = orchestrator
        .run_to_completion(&request, &budget(120, 120), &CancellationToken::new())
        .await;

    assert!(outcome.is_success(), "unexpected outcome: {outcome}");
    assert_eq!(cluster.build_reads(), 0);
    assert_eq!(cluster.deploy_reads(), 3);
    assert!(drain(events).iter().all(|e| e.stage == Stage::Deploy));
}

#[tokio::test(start_paused = true)]
async fn deploy_failure_carries_the_cluster_message() {
    let cluster = FakeCluster::scripted(&[Phase::Succeeded], &[Phase::Pending, Phase::Error]);
    let (orchestrator, _events) = orchestrator(&cluster);

    let outcome = orchestrator
        .run_to_completion(&weather_tool(), &budget(120, 120), &CancellationToken::new())
        .await;

    assert!(matches!(&outcome, FinalOutcome::DeployFailed { reason } if reason.ends_with("deployment Error")));
}

#[tokio::test(start_paused = true)]
async fn deleted_component_is_not_found_mid_poll() {
    let cluster = FakeCluster::scripted(&[Phase::Running], &[Phase::Ready]);
    let (orchestrator, _events) = orchestrator(&cluster);
    let handle = orchestrator.submit(&weather_tool()).await.unwrap();

    let deleter = {
        let cluster = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            cluster.delete("team1", "weather-tool");
        })
    };

    let outcome = orchestrator
        .await_build_completion(&handle, &budget(120, 120).build_policy(), &CancellationToken::new())
        .await;
    deleter.await.unwrap();

    assert_eq!(outcome, deployer::PhaseOutcome::NotFound { attempts: 3 });
    assert_eq!(cluster.build_reads(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_a_running_build() {
    let cluster = FakeCluster::scripted(&[Phase::Running], &[Phase::Ready]);
    let (orchestrator, _events) = orchestrator(&cluster);
    let cancel = CancellationToken::new();

    let run = {
        let orchestrator = orchestrator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            orchestrator
                .run_to_completion(&weather_tool(), &budget(120, 120), &cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_secs(35)).await;
    let cancelled_at = Instant::now();
    cancel.cancel();
    let outcome = run.await.unwrap();

    assert!(matches!(outcome, FinalOutcome::Cancelled { stage: Stage::Build, .. }));
    assert!(cancelled_at.elapsed() < Duration::from_secs(10));
    assert_eq!(cluster.build_reads(), 4);
    assert_eq!(cluster.deploy_reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn resubmitting_the_same_name_is_already_exists() {
    let cluster = FakeCluster::scripted(&[Phase::Succeeded], &[Phase::Ready]);
    let (orchestrator, _events) = orchestrator(&cluster);

    let handle = orchestrator.submit(&weather_tool()).await.unwrap();
    assert_eq!(handle.to_string(), "team1/weather-tool");
    assert!(handle.requires_build);

    let stored = cluster.get("team1", "weather-tool").await.unwrap();
    assert_eq!(stored.metadata.name.as_deref(), Some("weather-tool"));
    assert_eq!(stored.metadata.namespace.as_deref(), Some("team1"));

    let outcome = orchestrator
        .run_to_completion(&weather_tool(), &budget(120, 120), &CancellationToken::new())
        .await;
    assert_eq!(
        outcome,
        FinalOutcome::SubmissionFailed {
            error: SubmissionError::AlreadyExists {
                namespace: "team1".to_string(),
                name: "weather-tool".to_string(),
            }
        }
    );
}
