use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tango_replay::{
    CancellationToken, ChromeEngine, ExecutionLog, LogEntry, ReplayConfig, WorkflowRunner,
};
use tango_replay_server::cli::{Cli, Commands, RunArgs, ServeArgs};
use tango_replay_server::logging::init_logging;
use tango_replay_server::{start_server, AppState};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.logging.verbose, cli.logging.file_dir())?;

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Run(args) => run(args).await,
    }
}

fn runner(config: ReplayConfig) -> WorkflowRunner {
    WorkflowRunner::new(Arc::new(ChromeEngine::new()), config)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.engine.load_config()?;
    info!(
        port = args.port,
        headless = config.launch.headless,
        "Starting tango-replay server"
    );
    start_server(AppState::new(runner(config)), args.port).await
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.engine.load_config()?;
    let runner = runner(config);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping the replay");
            on_ctrl_c.cancel();
        }
    });

    let log = ExecutionLog::new().with_sink(|entry: &LogEntry| println!("{}", entry.render()));
    let report = runner.run(&args.url, log, cancel).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if let Some(error) = report.error {
        bail!("replay failed: {error}");
    }
    Ok(())
}
