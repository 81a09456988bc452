use anyhow::Result;
use clap::Parser;
use idontexist_rescue::backup::rsync::RsyncAdapter;
use idontexist_rescue::backup::{BackupManager, Operation, RunState, Target};
use idontexist_rescue::cli::Cli;
use idontexist_rescue::utils::config::Config;
use idontexist_rescue::utils::privilege::{self, ElevationPolicy};
use idontexist_rescue::utils::{logging, Progress};
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_tracing("info", Default::default());
            error!("{:#}", e);
            return ExitCode::from(RunState::Aborted.exit_code());
        }
    };

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    logging::init_tracing(level, config.log_format);

    match run(cli, config).await {
        Ok(state) => ExitCode::from(state.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(RunState::Aborted.exit_code())
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<RunState> {
    let registry = config.registry()?;

    if cli.list {
        for app in registry.entries() {
            let paths: Vec<String> = app.paths.iter().map(|p| p.display().to_string()).collect();
            println!("{:<12} {}", app.name, paths.join(", "));
        }
        return Ok(RunState::Completed);
    }

    let session = cli.session(&config)?;

    // Reject unknown applications before any prompt or file-system mutation
    if let Some(Target::App(name)) = &session.target {
        registry.select(&Target::App(name.clone()))?;
    }

    let policy = if cli.skip_elevation {
        ElevationPolicy::Skip
    } else {
        config.elevation
    };
    privilege::ensure_elevated(policy, config.loaded_from.as_deref())?;

    let progress = if cli.no_progress {
        Progress::hidden()
    } else {
        Progress::terminal()
    };
    let manager = BackupManager::new(registry, RsyncAdapter::from_config(&config)?, progress);

    info!("Starting idontexist-rescue v{}", env!("CARGO_PKG_VERSION"));
    let report = manager.run(&session).await?;

    let verb = match session.operation {
        Operation::Backup => "Backup",
        Operation::Restore { .. } => "Restore",
    };
    for output in &report.outputs {
        println!(":: {} {}", verb.to_lowercase(), output.display());
    }
    for failure in &report.errors {
        println!(":: FAILED {}", failure);
    }

    let state = report.state();
    match state {
        RunState::Completed => println!(":: {} completed.", verb),
        _ => println!(":: {} completed with {} error(s).", verb, report.errors.len()),
    }
    Ok(state)
}
