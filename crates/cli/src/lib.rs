//! `warden` command-line front-end.

mod cli;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use policy_backend_factory::factory;
use std::sync::Arc;
use tracing::debug;
use warden_broker::{JsonFileStore, PolicyOrchestrator, Request, ServiceHandle};
use warden_common::{BackendKind, Envelope, WardenConfig};

pub use cli::{Cli, Command, ConfigAction, Switch};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_RECOVERABLE: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

/// Parse arguments, run one command and return the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("warden: {err:#}");
            EXIT_FATAL
        }
    }
}

fn load_config(cli: &Cli) -> Result<WardenConfig> {
    let mut config = WardenConfig::load(cli.config.as_deref())?;
    config
        .apply_env_overrides()
        .context("invalid environment override")?;
    if cli.simulate {
        config.backend = BackendKind::Simulated;
    }
    config.validate()?;
    Ok(config)
}

fn execute(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;

    let request = match cli.command.request() {
        Some(request) => request,
        None => return show_config(&cli, &config),
    };

    let _guard = logging::init(&config.log_dir_path()?, cli.quiet)?;
    debug!(backend = config.backend.as_str(), "configuration loaded");

    let envelope = match request {
        Ok(request) => dispatch(&config, request)?,
        Err(err) => Envelope::failure(err),
    };
    print_json(&envelope, cli.pretty)?;
    Ok(exit_code(&envelope))
}

fn dispatch(config: &WardenConfig, request: Request) -> Result<Envelope> {
    let targets = factory(config)?;
    let store = Arc::new(JsonFileStore::new(config.state_file_path()?));
    let orchestrator = PolicyOrchestrator::assemble(
        targets.gate,
        targets.drive,
        targets.browsers,
        targets.domain_source,
        store,
    )?;
    let handle = ServiceHandle::new(orchestrator);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    Ok(runtime.block_on(handle.dispatch(request)))
}

fn show_config(cli: &Cli, config: &WardenConfig) -> Result<i32> {
    let Command::Config(cmd) = &cli.command else {
        return Ok(EXIT_SUCCESS);
    };
    match cmd.action {
        ConfigAction::Show { json: true } => print_json(config, true)?,
        ConfigAction::Show { json: false } => {
            let rendered = serde_yaml::to_string(config).context("failed to render config")?;
            print!("{rendered}");
        }
    }
    Ok(EXIT_SUCCESS)
}

fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("failed to encode output")?;
    println!("{rendered}");
    Ok(())
}

pub fn exit_code(envelope: &Envelope) -> i32 {
    match &envelope.error {
        None => EXIT_SUCCESS,
        Some(err) if err.recoverable => EXIT_RECOVERABLE,
        Some(_) => EXIT_FATAL,
    }
}
