//! Task logging for SAS tools.
//!
//! Each task logs to the console and to `<task>.log`. The file always
//! receives everything down to DEBUG; the console level follows
//! `SAS_VERBOSITY`:
//!
//! | verbosity | console level |
//! |-----------|---------------|
//! | 8-10      | DEBUG         |
//! | 6-7       | INFO          |
//! | 4-5       | WARN          |
//! | 1-3       | ERROR         |

use crate::config::{EnvVars, InitConfig};
use crate::environment::EnvSnapshot;
use crate::error::{Result, SessionError};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// Map a SAS verbosity (1-10) to a console log level. Out-of-range values clamp.
pub fn console_level(verbosity: u8) -> LevelFilter {
    match verbosity.clamp(1, 10) {
        8..=10 => LevelFilter::DEBUG,
        6..=7 => LevelFilter::INFO,
        4..=5 => LevelFilter::WARN,
        _ => LevelFilter::ERROR,
    }
}

/// Log file open mode, from `SAS_TASKLOGFMODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFileMode {
    Append,
    Truncate,
}

/// Resolved logging setup for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLogSettings {
    pub task_name: String,
    pub log_file: PathBuf,
    pub mode: LogFileMode,
    pub verbosity: u8,
}

impl TaskLogSettings {
    /// Resolve settings from the environment.
    ///
    /// The log directory is `SAS_TASKLOGDIR` when it names an existing
    /// directory, otherwise `start_dir`. Unknown file modes fall back to append.
    pub fn resolve(task_name: &str, env: &EnvSnapshot, start_dir: &Path) -> Self {
        let log_dir = env
            .get(EnvVars::SAS_TASKLOGDIR)
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir())
            .unwrap_or_else(|| start_dir.to_path_buf());

        let mode = match env.get(EnvVars::SAS_TASKLOGFMODE) {
            Some("w") => LogFileMode::Truncate,
            _ => LogFileMode::Append,
        };

        let verbosity = env
            .get(EnvVars::SAS_VERBOSITY)
            .and_then(|v| v.trim().parse::<u8>().ok())
            .unwrap_or(InitConfig::DEFAULT_VERBOSITY);

        Self {
            task_name: task_name.to_string(),
            log_file: log_dir.join(format!("{task_name}.log")),
            mode,
            verbosity,
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }
}

/// Install the global subscriber for a task. Call once per process.
pub fn init_task_logger(settings: &TaskLogSettings) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true);
    match settings.mode {
        LogFileMode::Append => options.append(true),
        LogFileMode::Truncate => options.write(true).truncate(true),
    };
    let file = options
        .open(&settings.log_file)
        .map_err(|e| SessionError::io("opening task log", &settings.log_file, e))?;

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(console_level(settings.verbosity));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| SessionError::config(format!("Logger already initialized: {e}")))?;

    Ok(())
}
