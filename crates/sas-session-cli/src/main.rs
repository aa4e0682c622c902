//! startsas - stage XMM-Newton observations for SAS.
//!
//! A process cannot change its parent's environment, so the variables a run
//! produces are printed as `export` lines on stdout:
//!
//! ```sh
//! eval "$(startsas init)"
//! startsas run --odfid 0104860501 --exports-file sas.env && . ./sas.env
//! ```

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigAction, InitArgs, RunArgs};
use sas_session::config::CalibrationConfig;
use sas_session::{
    command_exists, init_task_logger, CalibrationOptions, EnvSnapshot, EnvironmentInitializer,
    ObservationSession, PathCheckPolicy, SasDefaults, SessionError, SessionExports, SessionRequest,
    SettingsStore, TaskLogSettings,
};
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, warn};

const TASK_NAME: &str = "startsas";

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{TASK_NAME}: {e:#}");
            let code = e
                .downcast_ref::<SessionError>()
                .map(SessionError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let start_dir = std::env::current_dir().context("Failed to read current directory")?;
    let env = EnvSnapshot::capture();

    let mut log_settings = TaskLogSettings::resolve(TASK_NAME, &env, &start_dir);
    if let Some(verbosity) = cli.verbosity {
        log_settings = log_settings.with_verbosity(verbosity);
    }
    init_task_logger(&log_settings)?;
    info!("Logging to {}", log_settings.log_file.display());

    let store = match &cli.settings {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location()?,
    };

    match cli.command {
        Commands::Run(args) => cmd_run(args, &store, env, &start_dir),
        Commands::Init(args) => cmd_init(args, cli.verbosity, &store, &env),
        Commands::Config { action } => cmd_config(action, &store),
    }
}

fn initializer_from(defaults: &SasDefaults) -> EnvironmentInitializer {
    EnvironmentInitializer {
        sas_dir: defaults.sas_dir.clone(),
        sas_ccfpath: defaults.sas_ccfpath.clone(),
        verbosity: defaults.verbosity,
        suppress_warning: defaults.suppress_warning,
    }
}

fn cmd_init(args: InitArgs, verbosity: Option<u8>, store: &SettingsStore, env: &EnvSnapshot) -> Result<()> {
    let mut defaults = store.load()?;
    if let Some(dir) = args.sas_dir {
        defaults.sas_dir = Some(dir);
    }
    if let Some(dir) = args.sas_ccfpath {
        defaults.sas_ccfpath = Some(dir);
    }
    if let Some(level) = args.suppress_warning {
        defaults.suppress_warning = level;
    }
    if let Some(level) = verbosity {
        defaults.verbosity = level;
    }

    let plan = initializer_from(&defaults).plan(env)?;
    if args.save {
        store.save(&defaults)?;
        info!("Saved defaults to {}", store.path().display());
    }
    print!("{}", plan.to_shell());
    Ok(())
}

fn cmd_run(args: RunArgs, store: &SettingsStore, mut env: EnvSnapshot, start_dir: &Path) -> Result<()> {
    let defaults = store.load()?;
    let mut exports = SessionExports::new();

    if args.init {
        if !defaults.can_initialize() {
            warn!("Configured SAS directories are missing or do not exist");
        }
        let plan = initializer_from(&defaults).initialize()?;
        env = env.overlay(&plan);
        for (name, value) in plan.iter() {
            exports.set(name, value);
        }
    }

    let request = SessionRequest {
        obs_id: args.odfid,
        data_dir: args.data_dir.or(defaults.data_dir),
        level: args.level,
        repository: args.repo,
        calibration: CalibrationOptions {
            cifbuild_opts: args.cifbuild_opts,
            odfingest_opts: args.odfingest_opts,
            path_check: if args.strict_path_check {
                PathCheckPolicy::Strict
            } else {
                PathCheckPolicy::Advisory
            },
        },
        encryption_key: args.encryption_key,
        overwrite: args.overwrite,
        sas_ccf: args.sas_ccf,
        sas_odf: args.sas_odf,
    };

    if request.sas_ccf.is_none() && request.level.includes_raw() {
        for tool in [CalibrationConfig::CIFBUILD, CalibrationConfig::ODFINGEST] {
            if !command_exists(tool) {
                warn!("{} not found in PATH; calibration will fail", tool);
            }
        }
    }

    let outcome = ObservationSession::new(env, start_dir).run(&request)?;
    for (name, value) in outcome.exports.iter() {
        exports.set(name, value);
    }
    if let Some(link) = &outcome.pps_summary_link {
        info!("Observation summary: {}", link);
    }

    let shell = exports.to_shell();
    if let Some(path) = &args.exports_file {
        std::fs::write(path, &shell)
            .with_context(|| format!("Failed to write exports to {}", path.display()))?;
        info!("Exports written to {}", path.display());
    }
    print!("{shell}");
    Ok(())
}

fn cmd_config(action: ConfigAction, store: &SettingsStore) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let defaults = store.load()?;
            println!("{}", defaults.to_json_pretty()?);
        }
        ConfigAction::Set { option, value } => {
            let defaults = store.set(&option, &value)?;
            info!("{} updated in {}", option, store.path().display());
            println!("{}", defaults.to_json_pretty()?);
        }
        ConfigAction::Clear => {
            store.clear()?;
            info!("Removed {}", store.path().display());
        }
    }
    Ok(())
}
