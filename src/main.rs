//! `forge-loom` CLI launcher: loads configuration, wires the orchestrator,
//! and dispatches the `start`/`status`/`step`/`serve` subcommands.

use clap::Parser;
use forge_loom::cli::{Cli, Commands};
use forge_loom::{bridge, init_logging, Orchestrator, OrchestratorConfig, OrchestratorError};

const EXIT_SUCCESS: i32 = 0;
const EXIT_INVALID_ARGS: i32 = 1;
const EXIT_NOT_FOUND: i32 = 2;
const EXIT_INTERNAL_ERROR: i32 = 3;

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = match OrchestratorConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load config: {}", e);
            std::process::exit(EXIT_INVALID_ARGS);
        }
    };

    let orchestrator = match Orchestrator::new(config).await {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!("failed to initialize orchestrator: {}", e);
            std::process::exit(EXIT_INTERNAL_ERROR);
        }
    };

    let exit_code = run(&orchestrator, cli.command).await;
    let _ = orchestrator.terminate().await;
    std::process::exit(exit_code);
}

async fn run(orchestrator: &Orchestrator, command: Commands) -> i32 {
    match command {
        Commands::Start { prompt } => match orchestrator.start(prompt).await {
            Ok(operation_id) => {
                println!("{}", operation_id);
                EXIT_SUCCESS
            }
            Err(e) => report(e),
        },
        Commands::Status { operation_id } => match orchestrator.status(&operation_id).await {
            Ok(status) => {
                print_json(&status);
                EXIT_SUCCESS
            }
            Err(e) => report(e),
        },
        Commands::Step { operation_id } => match orchestrator.step(&operation_id).await {
            Ok(status) => {
                print_json(&status);
                EXIT_SUCCESS
            }
            Err(e) => report(e),
        },
        Commands::Serve => {
            let events = bridge::install(&orchestrator.event_bus, &orchestrator.config.bridge.min_event_priority).await;
            let router = bridge::router(
                orchestrator.monitor.inner.clone(),
                orchestrator.metrics.clone(),
                events,
            );
            match bridge::serve(router, &orchestrator.config.bridge.address, orchestrator.config.bridge.port).await {
                Ok(()) => EXIT_SUCCESS,
                Err(e) => {
                    tracing::error!("bridge server failed: {}", e);
                    EXIT_INTERNAL_ERROR
                }
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::error!("failed to serialize response: {}", e),
    }
}

fn report(err: OrchestratorError) -> i32 {
    tracing::error!("{}", err);
    match err {
        OrchestratorError::NotFound(_) => EXIT_NOT_FOUND,
        OrchestratorError::InvalidTransition(_) | OrchestratorError::ConfigError(_) => EXIT_INVALID_ARGS,
        _ => EXIT_INTERNAL_ERROR,
    }
}
