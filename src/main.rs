//! scribed daemon entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use scribed::config::{CliOverrides, OptionSources};
use scribed::lifecycle::{ServerEvent, Signals, StartupBundle};
use scribed::observability::init_tracing;
use scribed::ServerRun;

/// Collaborative-editing server daemon.
#[derive(Debug, Parser)]
#[command(name = "scribed", version, about)]
struct Args {
    /// Config file(s), searched in order; the first existing one is used.
    #[arg(long, value_name = "PATH")]
    config: Vec<PathBuf>,

    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured document root.
    #[arg(long, value_name = "DIR")]
    root_directory: Option<PathBuf>,

    /// Require clients to authenticate with this password.
    #[arg(long)]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    let sources = if args.config.is_empty() {
        OptionSources::default_paths()
    } else {
        OptionSources::explicit(args.config)
    };
    let overrides = CliOverrides {
        port: args.port,
        root_directory: args.root_directory,
        password: args.password,
    };

    let bundle = match StartupBundle::build(&sources, &overrides) {
        Ok(bundle) => bundle,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build startup configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut run = match ServerRun::new(bundle, sources, None) {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to register signal handlers");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        port = run.current_port(),
        policy = %run.options().security.policy,
        "scribed started"
    );

    // The control loop below is the only place reloads are triggered from,
    // so at most one is ever in flight.
    loop {
        match signals.recv().await {
            ServerEvent::Reload => match run.reload() {
                Ok(()) => {
                    tracing::info!(port = run.current_port(), "Configuration reloaded");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Reload failed, keeping previous configuration"
                    );
                }
            },
            ServerEvent::Shutdown => break,
        }
    }

    run.shutdown().await;
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
