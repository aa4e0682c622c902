//! Persisted user defaults for SAS initialization.
//!
//! Defaults are kept in `<config_dir>/sas/sas.json` and let `startsas init`
//! and `startsas run` work without repeating the SAS install location, the
//! calibration directory or the data directory on every call.
//!
//! Writes are atomic: serialize to a temp file in the same directory, fsync,
//! then rename over the target.

use crate::config::{InitConfig, SettingsConfig};
use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// User defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SasDefaults {
    pub sas_dir: Option<PathBuf>,
    pub sas_ccfpath: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub verbosity: u8,
    pub suppress_warning: u8,
}

impl Default for SasDefaults {
    fn default() -> Self {
        Self {
            sas_dir: None,
            sas_ccfpath: None,
            data_dir: None,
            verbosity: InitConfig::DEFAULT_VERBOSITY,
            suppress_warning: InitConfig::DEFAULT_SUPPRESS_WARNING,
        }
    }
}

impl SasDefaults {
    /// Option names accepted by [`SasDefaults::set`].
    pub const OPTIONS: &'static [&'static str] =
        &["sas_dir", "sas_ccfpath", "data_dir", "verbosity", "suppress_warning"];

    /// Set one option from its string form.
    pub fn set(&mut self, option: &str, value: &str) -> Result<()> {
        match option {
            "sas_dir" => self.sas_dir = Some(PathBuf::from(value)),
            "sas_ccfpath" => self.sas_ccfpath = Some(PathBuf::from(value)),
            "data_dir" => self.data_dir = Some(PathBuf::from(value)),
            "verbosity" => self.verbosity = parse_level(option, value)?,
            "suppress_warning" => self.suppress_warning = parse_level(option, value)?,
            other => {
                return Err(SessionError::config(format!(
                    "Unknown option '{other}'. Valid options: {}",
                    Self::OPTIONS.join(", ")
                )))
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Whether both SAS directories are configured and exist on disk.
    pub fn can_initialize(&self) -> bool {
        matches!(
            (&self.sas_dir, &self.sas_ccfpath),
            (Some(dir), Some(ccf)) if dir.exists() && ccf.exists()
        )
    }
}

fn parse_level(option: &str, value: &str) -> Result<u8> {
    value
        .trim()
        .parse::<u8>()
        .map_err(|_| SessionError::input(option, format!("'{value}' is not a number")))
}

/// JSON-backed store for [`SasDefaults`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config location (`$XDG_CONFIG_HOME/sas/sas.json` on Linux).
    pub fn default_location() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| SessionError::config("Could not determine platform config directory"))?;
        Ok(Self::new(
            config_dir
                .join(SettingsConfig::CONFIG_DIR_NAME)
                .join(SettingsConfig::CONFIG_FILE_NAME),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load stored defaults, or the built-in defaults when nothing is stored.
    pub fn load(&self) -> Result<SasDefaults> {
        if !self.path.exists() {
            debug!("No settings file at {}", self.path.display());
            return Ok(SasDefaults::default());
        }
        let contents = fs::read_to_string(&self.path)
            .map_err(|e| SessionError::io("reading settings", &self.path, e))?;
        serde_json::from_str(&contents).map_err(|e| SessionError::Json {
            message: format!("Failed to parse {}: {}", self.path.display(), e),
            source: Some(e),
        })
    }

    pub fn save(&self, defaults: &SasDefaults) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SessionError::config("Settings path has no parent directory"))?;
        fs::create_dir_all(parent)
            .map_err(|e| SessionError::io("creating settings directory", parent, e))?;

        let serialized = serde_json::to_string_pretty(defaults)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| SessionError::io("creating temp settings file", parent, e))?;
        temp.write_all(serialized.as_bytes())
            .map_err(|e| SessionError::io("writing temp settings file", temp.path(), e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| SessionError::io("syncing temp settings file", temp.path(), e))?;
        temp.persist(&self.path)
            .map_err(|e| SessionError::io("replacing settings file", &self.path, e.error))?;

        info!("Saved SAS defaults to {}", self.path.display());
        Ok(())
    }

    /// Set one option and persist the result.
    pub fn set(&self, option: &str, value: &str) -> Result<SasDefaults> {
        let mut defaults = self.load()?;
        defaults.set(option, value)?;
        self.save(&defaults)?;
        Ok(defaults)
    }

    /// Remove all stored defaults.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SessionError::io("removing settings", &self.path, e)),
        }
    }
}
