//! Centralized configuration for SAS session staging.
//!
//! This module provides configuration constants for environment variable
//! names, the on-disk observation layout, archive locations and the
//! calibration tools, plus the typed selectors used by a session request.

use std::path::PathBuf;

/// Names of the environment variables read and written by this crate.
pub struct EnvVars;

impl EnvVars {
    pub const LHEASOFT: &'static str = "LHEASOFT";
    pub const SAS_DIR: &'static str = "SAS_DIR";
    pub const SAS_CCFPATH: &'static str = "SAS_CCFPATH";
    pub const SAS_PATH: &'static str = "SAS_PATH";
    pub const SAS_ODF: &'static str = "SAS_ODF";
    pub const SAS_CCF: &'static str = "SAS_CCF";
    pub const SAS_VERBOSITY: &'static str = "SAS_VERBOSITY";
    pub const SAS_SUPPRESS_WARNING: &'static str = "SAS_SUPPRESS_WARNING";
    pub const SAS_TASKLOGDIR: &'static str = "SAS_TASKLOGDIR";
    pub const SAS_TASKLOGFMODE: &'static str = "SAS_TASKLOGFMODE";
    pub const PATH: &'static str = "PATH";
    pub const LIBRARY_PATH: &'static str = "LIBRARY_PATH";
    pub const LD_LIBRARY_PATH: &'static str = "LD_LIBRARY_PATH";
    pub const PERL5LIB: &'static str = "PERL5LIB";
    pub const PERLLIB: &'static str = "PERLLIB";
    pub const PYTHONPATH: &'static str = "PYTHONPATH";
}

/// Defaults for the environment initializer.
pub struct InitConfig;

impl InitConfig {
    pub const DEFAULT_VERBOSITY: u8 = 4;
    pub const DEFAULT_SUPPRESS_WARNING: u8 = 1;
    pub const BIN_DIRS: &'static [&'static str] = &["bin", "bin/devel"];
    pub const LIB_DIRS: &'static [&'static str] = &["lib", "libextra", "libsys"];
    pub const PERL_DIRS: &'static [&'static str] = &["lib/perl5"];
    pub const PYTHON_DIRS: &'static [&'static str] = &["lib/python"];
}

/// Directory and file names of the observation layout.
pub struct LayoutConfig;

impl LayoutConfig {
    pub const ODF_DIR_NAME: &'static str = "ODF";
    pub const PPS_DIR_NAME: &'static str = "PPS";
    pub const WORKING_DIR_NAME: &'static str = "working";
    pub const MANIFEST_PREFIX: &'static str = "MANIFEST";
    pub const ENCRYPTED_EXTENSION: &'static str = "gpg";
    pub const GZIP_EXTENSION: &'static str = "gz";
    pub const SECONDARY_ARCHIVE_EXTENSION: &'static str = "TAR";
}

/// Remote and shared archive locations.
pub struct ArchiveConfig;

impl ArchiveConfig {
    pub const ESA_AIO_URL: &'static str = "https://nxsa.esac.esa.int/nxsa-sl/servlet/data-action-aio";
    pub const HEASARC_BASE_URL: &'static str = "https://heasarc.gsfc.nasa.gov/FTP/xmm/data/rev0";
    pub const SCISERVER_ROOT: &'static str = "/home/idies/workspace/headata/FTP/xmm/data/rev0";
    pub const MIRROR_PROGRAM: &'static str = "wget";
    /// Leading path components of the mirror URL dropped by the mirroring tool.
    pub const MIRROR_CUT_DIRS: u32 = 4;
    pub const MIRROR_DEPTH: u32 = 2;
    pub const MIRROR_INDEX_MARKER: &'static str = "index.html";
    pub const CATALOG_DIR_MARKER: &'static str = "4XMM";
}

/// External calibration and decryption tools.
pub struct CalibrationConfig;

impl CalibrationConfig {
    pub const CIFBUILD: &'static str = "cifbuild";
    pub const ODFINGEST: &'static str = "odfingest";
    pub const GPG: &'static str = "gpg";
    pub const CCF_FILE_NAME: &'static str = "ccf.cif";
    pub const SUMMARY_SUFFIX: &'static str = "SUM.SAS";
    pub const SUMMARY_PATH_KEY: &'static str = "PATH";
}

/// Persisted user defaults.
pub struct SettingsConfig;

impl SettingsConfig {
    pub const CONFIG_DIR_NAME: &'static str = "sas";
    pub const CONFIG_FILE_NAME: &'static str = "sas.json";
}

/// Level of data to acquire for an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataLevel {
    /// Raw observation data files only.
    #[default]
    Odf,
    /// Pipeline products only.
    Pps,
    /// Both raw data and pipeline products.
    All,
}

impl DataLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataLevel::Odf => "ODF",
            DataLevel::Pps => "PPS",
            DataLevel::All => "ALL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ODF" => Some(DataLevel::Odf),
            "PPS" => Some(DataLevel::Pps),
            "ALL" => Some(DataLevel::All),
            _ => None,
        }
    }

    /// Individual levels requested, in acquisition order.
    pub fn components(&self) -> &'static [DataLevel] {
        match self {
            DataLevel::Odf => &[DataLevel::Odf],
            DataLevel::Pps => &[DataLevel::Pps],
            DataLevel::All => &[DataLevel::Odf, DataLevel::Pps],
        }
    }

    /// Whether raw data (and therefore calibration) is part of the request.
    pub fn includes_raw(&self) -> bool {
        matches!(self, DataLevel::Odf | DataLevel::All)
    }

    /// URL/path segment used by the mirror and shared stores (empty for ALL).
    pub fn path_segment(&self) -> &'static str {
        match self {
            DataLevel::All => "",
            other => other.as_str(),
        }
    }
}

impl std::fmt::Display for DataLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Repository to acquire observation data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Repository {
    /// XMM-Newton Science Archive (remote download).
    #[default]
    Esa,
    /// HEASARC web mirror.
    Heasarc,
    /// Shared filesystem on SciServer.
    SciServer,
}

impl Repository {
    pub fn as_str(&self) -> &'static str {
        match self {
            Repository::Esa => "esa",
            Repository::Heasarc => "heasarc",
            Repository::SciServer => "sciserver",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "esa" => Some(Repository::Esa),
            "heasarc" => Some(Repository::Heasarc),
            "sciserver" => Some(Repository::SciServer),
            _ => None,
        }
    }
}

impl std::fmt::Display for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a mismatch between the summary file PATH and the raw-data directory
/// is handled after calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathCheckPolicy {
    /// Log the mismatch as an error and continue.
    #[default]
    Advisory,
    /// Abort the run with `SummaryPathMismatch`.
    Strict,
}

/// Locations used by the acquisition sources, overridable for mirrors and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEndpoints {
    pub esa_aio_url: String,
    pub heasarc_base_url: String,
    pub sciserver_root: PathBuf,
}

impl Default for ArchiveEndpoints {
    fn default() -> Self {
        Self {
            esa_aio_url: ArchiveConfig::ESA_AIO_URL.to_string(),
            heasarc_base_url: ArchiveConfig::HEASARC_BASE_URL.to_string(),
            sciserver_root: PathBuf::from(ArchiveConfig::SCISERVER_ROOT),
        }
    }
}
