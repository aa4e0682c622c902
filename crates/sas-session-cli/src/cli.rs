//! Command line definition for `startsas`.

use clap::{Args, Parser, Subcommand};
use sas_session::{DataLevel, Repository};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "startsas")]
#[command(about = "Stage XMM-Newton observations and prepare a SAS session")]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/sas/sas.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Console verbosity 1-10 (overrides SAS_VERBOSITY)
    #[arg(short, long, global = true)]
    pub verbosity: Option<u8>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Acquire and calibrate an observation, or select pre-staged files
    Run(RunArgs),
    /// Print the SAS environment as shell exports
    Init(InitArgs),
    /// Manage persisted defaults
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Observation (ODF) id
    #[arg(long)]
    pub odfid: Option<String>,

    /// Base data directory (defaults to the configured data_dir, then the current directory)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Data level: ODF, PPS or ALL
    #[arg(long, default_value = "ODF", value_parser = parse_level)]
    pub level: DataLevel,

    /// Repository: esa, heasarc or sciserver
    #[arg(long, default_value = "esa", value_parser = parse_repository)]
    pub repo: Repository,

    /// Extra options for cifbuild
    #[arg(long, allow_hyphen_values = true)]
    pub cifbuild_opts: Option<String>,

    /// Extra options for odfingest
    #[arg(long, allow_hyphen_values = true)]
    pub odfingest_opts: Option<String>,

    /// Decryption key, or a file holding it
    #[arg(long)]
    pub encryption_key: Option<String>,

    /// Replace an existing observation directory
    #[arg(long)]
    pub overwrite: bool,

    /// Pre-staged calibration index file (absolute path)
    #[arg(long)]
    pub sas_ccf: Option<PathBuf>,

    /// Pre-staged summary file (absolute path)
    #[arg(long)]
    pub sas_odf: Option<PathBuf>,

    /// Fail when the summary file PATH does not match the ODF directory
    #[arg(long)]
    pub strict_path_check: bool,

    /// Initialize SAS from the persisted defaults before running
    #[arg(long)]
    pub init: bool,

    /// Also write the exports to this file
    #[arg(long)]
    pub exports_file: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// SAS installation directory
    #[arg(long)]
    pub sas_dir: Option<PathBuf>,

    /// Calibration files directory
    #[arg(long)]
    pub sas_ccfpath: Option<PathBuf>,

    /// SAS_SUPPRESS_WARNING level
    #[arg(long)]
    pub suppress_warning: Option<u8>,

    /// Persist the given directories as defaults
    #[arg(long)]
    pub save: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the persisted defaults as JSON
    Show,
    /// Set one option
    Set { option: String, value: String },
    /// Remove the settings file
    Clear,
}

fn parse_level(s: &str) -> Result<DataLevel, String> {
    DataLevel::from_str(s).ok_or_else(|| format!("'{s}' is not one of ODF, PPS, ALL"))
}

fn parse_repository(s: &str) -> Result<Repository, String> {
    Repository::from_str(s).ok_or_else(|| format!("'{s}' is not one of esa, heasarc, sciserver"))
}
