use anyhow::Context;
use dockerbox::cli::{Args, ConfigDiscovery, CreateConfig, ExecutionMode};
use dockerbox::container::{ContainerClient, SessionOrchestrator, SessionOutcome, StdinTerminal};
use dockerbox::env;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    // Logs go to stderr so they never mix with the session's stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env::DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(run(mode)) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };

    // The stdin reader sits in a blocking read that would keep the runtime
    // from shutting down, so leave without dropping it.
    std::process::exit(code);
}

async fn run(mode: ExecutionMode) -> anyhow::Result<i32> {
    match mode {
        ExecutionMode::Create(config) => run_create(config).await,
        ExecutionMode::ShowConfig { config_override } => {
            ConfigDiscovery::show_discovery_info(config_override.as_deref());
            Ok(0)
        }
    }
}

async fn run_create(config: CreateConfig) -> anyhow::Result<i32> {
    let file_config = ConfigDiscovery::load(config.config_override.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {}", e))?;
    let options = file_config
        .session_options_for(&config)
        .context("invalid configuration")?;
    debug!("Session options: {:?}", options);

    let shutdown = shutdown_signal();

    let client = ContainerClient::new().await?;
    match client.runtime_type().await {
        Ok(runtime) => info!("Using {} runtime", runtime),
        Err(e) => debug!("Runtime detection failed: {}", e),
    }

    let outcome = SessionOrchestrator::new(Arc::new(client), Box::new(StdinTerminal), options)
        .run_until(config.request, shutdown)
        .await;

    report(&outcome, config.json)?;
    Ok(outcome.exit_code())
}

fn report(outcome: &SessionOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    if let Some(primary) = &outcome.primary_error {
        eprintln!("Error: {}", primary);
    }
    for teardown in &outcome.teardown_errors {
        eprintln!("Warning: {}", teardown);
    }
    Ok(())
}

/// Install Ctrl-C, SIGTERM and SIGHUP handlers and return a future that
/// completes on the first of them.
///
/// The handlers are registered before this returns, so a signal arriving
/// while the container is still being set up is caught too.
#[cfg(unix)]
fn shutdown_signal() -> impl Future<Output = ()> + Send {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    );

    async move {
        match handlers {
            (Ok(mut int), Ok(mut term), Ok(mut hup)) => {
                tokio::select! {
                    _ = int.recv() => info!("Received Ctrl-C"),
                    _ = term.recv() => info!("Received SIGTERM"),
                    _ = hup.recv() => info!("Received SIGHUP"),
                }
            }
            _ => {
                warn!("Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
fn shutdown_signal() -> impl Future<Output = ()> + Send {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl-C");
    }
}
