//! Robocat - main entry point.
//!
//! Loads and validates configuration, wires the service clients, the git
//! workspace, and the actor registry together, and runs the HTTP event feed
//! plus the periodic reconciliation poller until shutdown. Startup failures
//! (unreadable config, unreachable forge) exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use robocat::checkers::{ToolComplianceChecker, ToolSubmoduleChecker};
use robocat::config::Config;
use robocat::context::Context;
use robocat::forge::{ForgeApi, ForgeClient};
use robocat::gitops::GitWorkspace;
use robocat::ingress::EventIntake;
use robocat::registry::ActorRegistry;
use robocat::server::{build_router, AppState};
use robocat::tracker::TrackerClient;

/// Merge-request workflow bot for a self-hosted forge.
#[derive(Debug, Parser)]
#[command(name = "robocat", version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "robocat.yaml")]
    config: PathBuf,

    /// Log level filter (e.g. `info`, `robocat=debug`).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum number of MR cycles running concurrently.
    #[arg(long, short = 'p')]
    parallelism: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = Config::load(&cli.config)?;
    if let Some(parallelism) = cli.parallelism {
        config.engine.parallelism = parallelism;
    }
    let config = Arc::new(config);
    info!(config = %cli.config.display(), "Configuration loaded");

    // Secrets come from mounted files, never flags.
    let forge_token = Config::read_secret(&config.forge.token_file)?;
    let tracker_password = Config::read_secret(&config.jira.password_file)?;
    let feed_secret = Config::read_secret(&config.ingress.secret_file)?;

    let forge = ForgeClient::new(&config.forge, forge_token)?;
    let tracker = TrackerClient::new(&config.jira, tracker_password)?;

    // The checker tools ship with the deployment image.
    let compliance = ToolComplianceChecker::new("/opt/robocat/bin/check-source-compliance");
    let submodules = ToolSubmoduleChecker::new("/opt/robocat/bin/check-nx-submodule");

    let git = GitWorkspace::new(config.repo.path.clone(), config.repo.url.clone());
    git.ensure_ready().await?;

    // The forge must answer before we accept events.
    let open_mrs = forge.list_open_mrs().await?;
    info!(open_mrs = open_mrs.len(), "Forge reachable");

    let ctx = Arc::new(Context::new(
        Arc::clone(&config),
        forge,
        tracker,
        compliance,
        submodules,
        git,
    ));

    let shutdown = CancellationToken::new();
    let registry = ActorRegistry::new(Arc::clone(&ctx), shutdown.clone());
    let intake = Arc::new(EventIntake::new(
        config.bot.handle.clone(),
        Duration::from_secs(config.engine.dedupe_ttl),
    ));

    // Periodic reconciliation: a timer tick per open MR. This catches missed
    // webhooks and re-drives deferred work.
    let poller = tokio::spawn(run_poller(
        Arc::clone(&ctx),
        Arc::clone(&registry),
        Arc::clone(&intake),
        shutdown.clone(),
    ));

    let app = build_router(AppState {
        intake,
        registry,
        feed_secret: feed_secret.into_bytes(),
    });

    let listener = tokio::net::TcpListener::bind(&config.ingress.listen_addr).await?;
    info!(addr = %config.ingress.listen_addr, "Listening for events");

    let server = {
        let shutdown = shutdown.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
    };

    tokio::select! {
        result = server => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    }

    // Actors finish their current action and exit; every action is
    // individually idempotent, so a partial plan is safe.
    let _ = poller.await;
    info!("Shutdown complete");
    Ok(())
}

/// Feeds a timer tick per open MR into the registry every poll interval.
async fn run_poller<F, T, C, S>(
    ctx: Arc<Context<F, T, C, S>>,
    registry: Arc<ActorRegistry<F, T, C, S>>,
    intake: Arc<EventIntake>,
    shutdown: CancellationToken,
) where
    F: ForgeApi + 'static,
    T: robocat::tracker::TrackerApi + 'static,
    C: robocat::checkers::ComplianceChecker + 'static,
    S: robocat::checkers::SubmoduleChecker + 'static,
{
    let interval = Duration::from_secs(ctx.config.engine.poll_interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match ctx.forge.list_open_mrs().await {
            Ok(mrs) => {
                for mr_id in mrs {
                    registry.dispatch(intake.timer_tick(mr_id)).await;
                }
            }
            Err(e) => warn!(error = %e, "Reconciliation poll failed"),
        }
    }
}
