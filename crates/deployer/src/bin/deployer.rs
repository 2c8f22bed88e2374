//! Deployer CLI - build and deploy Kagenti agents and tools.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use deployer::crds::EnvVar;
use deployer::identity::{self, IdentityProvider};
use deployer::telemetry::{init_tracing, LogFormat};
use deployer::{
    parse_env_file, BuildRequest, ChannelObserver, ComponentBuilder, ComponentStore,
    DeployerConfig, KubeComponentStore, Orchestrator, ResourceKind, RunBudget, Source,
};

/// Deployer CLI - build and deploy Kagenti components.
#[derive(Parser)]
#[command(name = "deployer")]
#[command(about = "Build and deploy Kagenti agents and tools as Component resources")]
#[command(version)]
struct Cli {
    /// Path to the deployer configuration file.
    #[arg(long, env = "DEPLOYER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Namespace to deploy into (defaults to the configured namespace).
    #[arg(short, long, env = "DEPLOYER_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Seconds between status polls.
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    /// Maximum number of build status polls.
    #[arg(long, global = true)]
    max_build_attempts: Option<u32>,

    /// Maximum number of deployment status polls.
    #[arg(long, global = true)]
    max_deploy_attempts: Option<u32>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an image from a git repository, then deploy it.
    Build {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Git repository URL.
        #[arg(long)]
        repo_url: String,

        /// Branch or tag to build.
        #[arg(long, default_value = "main")]
        branch: String,

        /// Subfolder holding the Dockerfile.
        #[arg(long, default_value = "")]
        subfolder: String,
    },

    /// Deploy an existing image (`<registry>/<image>:<tag>`).
    DeployImage {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Image reference.
        #[arg(long)]
        image: String,

        /// Secret used to pull the image.
        #[arg(long)]
        pull_secret: Option<String>,
    },

    /// Show the current build and deployment status of a component.
    Status {
        /// Component name.
        name: String,
    },

    /// Print the identity this process runs as.
    Whoami,
}

#[derive(Args)]
struct WorkloadArgs {
    /// Component name (lowercase alphanumerics and '-').
    #[arg(long)]
    name: String,

    /// Kind of component.
    #[arg(long, default_value = "agent")]
    kind: ResourceKind,

    /// Protocol tag (e.g. a2a, mcp).
    #[arg(long, default_value = "a2a")]
    protocol: String,

    /// Framework tag (e.g. langgraph, crewai).
    #[arg(long, default_value = "langgraph")]
    framework: String,

    #[arg(long, default_value = "")]
    description: String,

    /// Environment variable (KEY=VALUE), may be repeated.
    #[arg(short, long = "env", value_parser = parse_key_val)]
    env: Vec<EnvVar>,

    /// `.env` file to load ahead of `--env` values.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

fn parse_key_val(s: &str) -> Result<EnvVar, String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok(EnvVar::literal(key.trim(), value)),
        _ => Err(format!("invalid KEY=VALUE: no `=` found in `{s}`")),
    }
}

impl WorkloadArgs {
    fn into_request(self, namespace: String, source: Source) -> Result<BuildRequest> {
        let mut env = match &self.env_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read env file {}", path.display()))?;
                parse_env_file(&content)
            }
            None => Vec::new(),
        };
        env.extend(self.env);

        Ok(BuildRequest {
            name: self.name,
            namespace,
            kind: self.kind,
            source,
            protocol: self.protocol,
            framework: self.framework,
            description: self.description,
            env,
        })
    }
}

fn load_config(cli: &Cli) -> Result<DeployerConfig> {
    let mut config = DeployerConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load deployer configuration")?;

    if let Some(namespace) = &cli.namespace {
        config.namespace.clone_from(namespace);
    }
    if let Some(seconds) = cli.poll_interval {
        config.polling.poll_interval_seconds = seconds;
    }
    if let Some(attempts) = cli.max_build_attempts {
        config.polling.max_build_attempts = attempts;
    }
    if let Some(attempts) = cli.max_deploy_attempts {
        config.polling.max_deploy_attempts = attempts;
    }

    config.validate().context("Invalid command line overrides")?;
    Ok(config)
}

fn identity_provider(config: &DeployerConfig) -> Result<Box<dyn IdentityProvider>> {
    match &config.identity {
        Some(identity) => identity::provider_from_config(identity),
        None => identity::provider_from_env(),
    }
    .context("Failed to initialize identity provider")
}

async fn connect() -> Option<Arc<dyn ComponentStore>> {
    match kube::Client::try_default().await {
        Ok(client) => Some(Arc::new(KubeComponentStore::new(client))),
        Err(e) => {
            warn!(error = %e, "Kubernetes client unavailable");
            None
        }
    }
}

async fn run(config: &DeployerConfig, request: BuildRequest) -> Result<ExitCode> {
    let mut components = ComponentBuilder::new(config);
    if config.identity.is_some() {
        components = components.with_identity(Arc::from(identity_provider(config)?));
    }

    let (observer, mut events) = ChannelObserver::new();
    let orchestrator = Orchestrator::builder()
        .maybe_store(connect().await)
        .components(components)
        .observer(Arc::new(observer))
        .build();

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{event}");
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        })
    };

    let budget = RunBudget::from(&config.polling);
    info!(
        name = %request.name,
        namespace = %request.namespace,
        poll_interval_secs = budget.poll_interval.as_secs(),
        max_build_attempts = budget.max_build_attempts,
        max_deploy_attempts = budget.max_deploy_attempts,
        "Starting deployment"
    );
    let outcome = orchestrator.run_to_completion(&request, &budget, &cancel).await;

    interrupt.abort();
    drop(orchestrator);
    printer.await.context("Progress printer failed")?;

    println!("{outcome}");
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn status(namespace: &str, name: &str) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let component = KubeComponentStore::new(client)
        .get(namespace, name)
        .await
        .with_context(|| format!("Failed to get component {namespace}/{name}"))?;

    let status = component.status.unwrap_or_default();
    let build = status.build_status.unwrap_or_default();
    let deploy = status.deployment_status.unwrap_or_default();

    println!("\nComponent {namespace}/{name}:");
    if component.spec.has_build() {
        println!("  Build:  {:<10} {}", build.phase, build.message_or_empty());
    }
    println!("  Deploy: {:<10} {}", deploy.phase, deploy.message_or_empty());
    Ok(())
}

fn whoami(config: &DeployerConfig) -> Result<()> {
    let provider = identity_provider(config)?;
    let identity = provider.current_identity();
    let subject = identity.subject().context("Failed to read identity subject")?;
    let claims = identity.claims().context("Failed to read identity claims")?;

    println!("Provider: {}", provider.name());
    println!("Subject:  {subject}");
    println!(
        "Claims:\n{}",
        serde_json::to_string_pretty(&claims).context("Failed to render claims")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let config = load_config(&cli)?;
    let namespace = config.namespace.clone();

    match cli.command {
        Commands::Build {
            workload,
            repo_url,
            branch,
            subfolder,
        } => {
            let request = workload.into_request(
                namespace,
                Source::Git {
                    repo_url,
                    branch,
                    subfolder,
                },
            )?;
            run(&config, request).await
        }

        Commands::DeployImage {
            workload,
            image,
            pull_secret,
        } => {
            let request = workload.into_request(
                namespace,
                Source::Image {
                    reference: image,
                    pull_secret,
                },
            )?;
            run(&config, request).await
        }

        Commands::Status { name } => {
            status(&namespace, &name).await?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Whoami => {
            whoami(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
