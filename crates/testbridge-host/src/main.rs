//! testbridge-host: owns one runner session on a Unix socket, issues a
//! single discovery or execution request and prints the result as one JSON
//! line on stdout. Diagnostics go to stderr.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, Signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use testbridge::report::Report;
use testbridge::{
    AttachedRunner, CommandRunner, DiscoveryAdapter, ExecutionAdapter, ExecutionEnvironment,
    RecordingResolver, RunContext, SessionConfig, SessionError, TestServerSession,
};

const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "testbridge-host", version, about)]
struct Cli {
    /// Listening socket (default: $TESTBRIDGE_SOCKET_DIR or ~/.testbridge/sockets)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Give up on a request after this many milliseconds (0 waits forever)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Command that starts the runner; it finds the socket in $TESTBRIDGE_SOCKET
    #[arg(long, global = true)]
    runner: Option<String>,

    /// Argument passed to the runner command (repeatable)
    #[arg(long = "runner-arg", global = true, allow_hyphen_values = true)]
    runner_args: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Discover the tests under ROOT
    Discover { root: PathBuf },
    /// Run the given test ids under ROOT
    Run {
        root: PathBuf,
        #[arg(required = true)]
        test_ids: Vec<String>,
        #[arg(long)]
        debug: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum HostError {
    #[error("failed to open session socket: {0}")]
    Listen(#[from] io::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
    #[error("runner returned no result")]
    NoResult,
    #[error("interrupted")]
    Interrupted,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(report) => {
            let passed = report.passed();
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => {
                    eprintln!("error: {}", HostError::Report(e));
                    return ExitCode::from(EXIT_ERROR);
                }
            }
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_FAILED)
            }
        }
        Err(HostError::Interrupted) => {
            eprintln!("error: {}", HostError::Interrupted);
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn session_config(cli: &Cli) -> SessionConfig {
    let mut config = SessionConfig::from_env();
    if let Some(path) = &cli.socket {
        config = config.with_socket_path(path);
    }
    if let Some(ms) = cli.timeout_ms {
        config = config.with_request_timeout((ms > 0).then(|| Duration::from_millis(ms)));
    }
    config
}

async fn run(cli: Cli) -> Result<Report, HostError> {
    // Registered before the socket exists so a SIGTERM sent once it appears
    // is never lost.
    let sigterm = signal(SignalKind::terminate())
        .map_err(|e| warn!(error = %e, "cannot listen for SIGTERM"))
        .ok();
    let session = Arc::new(TestServerSession::listen(session_config(&cli))?);
    let resolver = Arc::new(RecordingResolver::new());
    let run = RunContext::new();

    let launcher = cli
        .runner
        .as_ref()
        .map(|program| CommandRunner::new(program.clone(), cli.runner_args.clone()));
    let env: &dyn ExecutionEnvironment = match &launcher {
        Some(runner) => runner,
        None => &AttachedRunner,
    };

    // ── SIGTERM / ctrl-c ────────────────────────────────────────────
    let signal_task = tokio::spawn({
        let session = Arc::clone(&session);
        let run = run.clone();
        async move {
            shutdown_signal(sigterm).await;
            run.cancel();
            session.shutdown().await;
        }
    });

    let outcome = match &cli.command {
        Command::Discover { root } => {
            DiscoveryAdapter::new(Arc::clone(&session), resolver.clone())
                .discover_tests(root, env)
                .await
        }
        Command::Run {
            root,
            test_ids,
            debug,
        } => {
            ExecutionAdapter::new(Arc::clone(&session), resolver.clone())
                .run_tests(root, test_ids, *debug, &run, env)
                .await
        }
    };

    signal_task.abort();
    session.shutdown().await;
    if let Some(runner) = &launcher {
        runner.kill().await;
    }

    if let Err(e) = outcome {
        return Err(if run.is_cancelled() {
            HostError::Interrupted
        } else {
            e.into()
        });
    }

    let report = match &cli.command {
        Command::Discover { .. } => resolver.discoveries().first().map(Report::from_discovery),
        Command::Run { .. } => resolver.executions().first().map(Report::from_execution),
    };
    report.ok_or(HostError::NoResult)
}

async fn shutdown_signal(sigterm: Option<Signal>) {
    let terminate = async move {
        match sigterm {
            Some(mut sigterm) => {
                sigterm.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = interrupt => info!("received ctrl-c, shutting down"),
    }
}
