//! Observation session controller.
//!
//! Drives the staging pipeline for one observation:
//!
//! 1. validate the request and the SAS environment
//! 2. create `<base>/<obs_id>/{working,...}`
//! 3. acquire data from the selected repository
//! 4. decrypt, decompress and unpack
//! 5. run `cifbuild` and `odfingest` (raw data only)
//! 6. report `SAS_CCF`/`SAS_ODF` for downstream tasks
//!
//! Alternatively, an already calibrated observation can be selected by
//! giving its `ccf.cif` and `*SUM.SAS` files directly.

use crate::acquire::{source_for, ArchiveSource};
use crate::calibrate::{calibrate, CalibrationOptions, CalibrationOutputs};
use crate::config::{ArchiveEndpoints, DataLevel, EnvVars, Repository};
use crate::decrypt::{decrypt_all, DecryptReport, KeySource};
use crate::environment::{EnvSnapshot, SessionExports};
use crate::error::{Result, SessionError};
use crate::layout::{find_manifest, resolve_base_dir, ObservationLayout};
use crate::process::{arg_path, CommandRunner, SystemRunner};
use crate::summary::{is_summary_file_name, SummaryFile};
use crate::unpack::{decompress_all, extract_secondary_archives};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Parameters of one session run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Observation to acquire. Mutually exclusive with `sas_ccf`/`sas_odf`.
    pub obs_id: Option<String>,
    /// Base data directory; the start directory when `None`, resolved against
    /// it when relative.
    pub data_dir: Option<PathBuf>,
    pub level: DataLevel,
    pub repository: Repository,
    pub calibration: CalibrationOptions,
    /// Literal key or path to a key file. Discovered in `data_dir` when `None`.
    pub encryption_key: Option<String>,
    /// Replace an existing observation directory.
    pub overwrite: bool,
    /// Pre-staged calibration index file.
    pub sas_ccf: Option<PathBuf>,
    /// Pre-staged summary file.
    pub sas_odf: Option<PathBuf>,
}

/// What a request asks the controller to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSelection {
    Observation { obs_id: String },
    PreStaged { ccf: PathBuf, summary: PathBuf },
}

impl SessionRequest {
    pub fn for_observation(obs_id: impl Into<String>) -> Self {
        Self {
            obs_id: Some(obs_id.into()),
            ..Self::default()
        }
    }

    pub fn pre_staged(ccf: impl Into<PathBuf>, summary: impl Into<PathBuf>) -> Self {
        Self {
            sas_ccf: Some(ccf.into()),
            sas_odf: Some(summary.into()),
            ..Self::default()
        }
    }

    /// Check that exactly one of observation id or pre-staged files is given.
    pub fn selection(&self) -> Result<DataSelection> {
        let obs_id = self.obs_id.as_deref().filter(|id| !id.is_empty());
        match (obs_id, &self.sas_ccf, &self.sas_odf) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => Err(SessionError::config(
                "Either use an odfid or set sas_ccf and sas_odf. Not both.",
            )),
            (Some(id), None, None) => {
                if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
                    return Err(SessionError::input("odfid", format!("'{id}' is not a valid ODF id")));
                }
                Ok(DataSelection::Observation {
                    obs_id: id.to_string(),
                })
            }
            (None, Some(ccf), Some(summary)) => Ok(DataSelection::PreStaged {
                ccf: ccf.clone(),
                summary: summary.clone(),
            }),
            (None, Some(_), None) | (None, None, Some(_)) => Err(SessionError::config(
                "Parameters sas_ccf and sas_odf must both be set",
            )),
            (None, None, None) => Err(SessionError::config(
                "Either an odfid must be given -OR- sas_ccf and sas_odf must be set",
            )),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Observation layout; `None` for pre-staged files.
    pub layout: Option<ObservationLayout>,
    /// Repository the data was acquired from; `None` for pre-staged files.
    pub repository: Option<Repository>,
    /// `SAS_CCF` and `SAS_ODF` for downstream SAS tasks.
    pub exports: SessionExports,
    pub calibration: Option<CalibrationOutputs>,
    pub decryption: DecryptReport,
    /// `file://` link to the pipeline observation summary page.
    pub pps_summary_link: Option<String>,
}

/// Runs staging sessions against one environment.
pub struct ObservationSession {
    env: EnvSnapshot,
    start_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    source: Option<Box<dyn ArchiveSource>>,
    endpoints: ArchiveEndpoints,
}

impl ObservationSession {
    /// Session reading `env` and resolving relative paths against `start_dir`.
    pub fn new(env: EnvSnapshot, start_dir: impl Into<PathBuf>) -> Self {
        Self {
            env,
            start_dir: start_dir.into(),
            runner: Box::new(SystemRunner),
            source: None,
            endpoints: ArchiveEndpoints::default(),
        }
    }

    /// Use `runner` for every external tool.
    pub fn with_runner(mut self, runner: Box<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Acquire through `source` regardless of the requested repository.
    pub fn with_source(mut self, source: Box<dyn ArchiveSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_endpoints(mut self, endpoints: ArchiveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Run the pipeline for `request`. Any error aborts the run.
    pub fn run(&self, request: &SessionRequest) -> Result<SessionOutcome> {
        let result = self.run_inner(request);
        if let Err(e) = &result {
            error!("{}", e);
        }
        result
    }

    fn run_inner(&self, request: &SessionRequest) -> Result<SessionOutcome> {
        let selection = request.selection()?;
        self.check_environment()?;
        info!("Session started from {}", self.start_dir.display());

        match selection {
            DataSelection::Observation { obs_id } => self.stage_observation(&obs_id, request),
            DataSelection::PreStaged { ccf, summary } => self.use_pre_staged(&ccf, &summary),
        }
    }

    fn check_environment(&self) -> Result<()> {
        if let Some(lheasoft) = self.env.get(EnvVars::LHEASOFT) {
            info!("LHEASOFT = {}", lheasoft);
        }
        let sas_dir = self
            .env
            .require(EnvVars::SAS_DIR, "Please initialise SAS")?;
        info!("SAS_DIR = {}", sas_dir);
        let ccfpath = self
            .env
            .require(EnvVars::SAS_CCFPATH, "Please define it")?;
        info!("SAS_CCFPATH = {}", ccfpath);
        Ok(())
    }

    fn stage_observation(&self, obs_id: &str, request: &SessionRequest) -> Result<SessionOutcome> {
        let base_dir = resolve_base_dir(request.data_dir.as_deref(), &self.start_dir);
        info!("Data directory = {}", base_dir.display());

        let layout = ObservationLayout::new(base_dir, obs_id);
        layout.prepare(request.overwrite)?;

        let default_source;
        let source: &dyn ArchiveSource = match &self.source {
            Some(source) => source.as_ref(),
            None => {
                default_source = source_for(request.repository, &self.endpoints);
                default_source.as_ref()
            }
        };
        info!(
            "Requesting odfid = {} at level {} from {}",
            obs_id,
            request.level,
            source.repository()
        );
        source.fetch(&layout, request.level, self.runner.as_ref())?;

        let decryption = decrypt_all(
            self.runner.as_ref(),
            &layout.obs_dir,
            &KeySource::from_option(request.encryption_key.clone()),
            obs_id,
            &layout.base_dir,
        )?;
        decompress_all(&layout.obs_dir)?;
        extract_secondary_archives(&layout.obs_dir, &layout.odf_dir)?;

        let mut exports = SessionExports::new();
        let mut calibration = None;
        let mut pps_summary_link = None;

        if request.level.includes_raw() {
            calibration = Some(calibrate(
                self.runner.as_ref(),
                &layout,
                &request.calibration,
                &mut exports,
            )?);
        } else {
            let link = format!("file://{}", layout.pps_summary_page().display());
            info!("PPS products can be found in {}", layout.pps_dir.display());
            info!("Link to Observation Summary html: {}", link);
            pps_summary_link = Some(link);
        }

        Ok(SessionOutcome {
            layout: Some(layout),
            repository: Some(source.repository()),
            exports,
            calibration,
            decryption,
            pps_summary_link,
        })
    }

    fn use_pre_staged(&self, ccf: &Path, summary: &Path) -> Result<SessionOutcome> {
        for (field, path) in [("sas_ccf", ccf), ("sas_odf", summary)] {
            if !path.is_absolute() {
                return Err(SessionError::input(
                    field,
                    format!("{} must be defined with absolute path", path.display()),
                ));
            }
            if !path.is_file() {
                return Err(SessionError::input(field, format!("File {} not found", path.display())));
            }
            info!("{} is present", path.display());
        }

        if !is_summary_file_name(summary) {
            return Err(SessionError::input(
                "sas_odf",
                format!("{} does not refer to a SAS SUM file", summary.display()),
            ));
        }

        let odf_dir = SummaryFile::read(summary)?.odf_path().ok_or_else(|| {
            SessionError::input("sas_odf", format!("{} has no PATH entry", summary.display()))
        })?;
        if !odf_dir.is_dir() {
            return Err(SessionError::input(
                "sas_odf",
                format!("Summary file PATH {} does not exist", odf_dir.display()),
            ));
        }
        if find_manifest(&odf_dir)?.is_none() {
            return Err(SessionError::input(
                "sas_odf",
                format!("Missing MANIFEST file in {}. Missing ODF components?", odf_dir.display()),
            ));
        }

        let mut exports = SessionExports::new();
        exports.set(EnvVars::SAS_CCF, arg_path(ccf));
        exports.set(EnvVars::SAS_ODF, arg_path(summary));
        for (name, value) in exports.iter() {
            info!("{} = {}", name, value);
        }

        Ok(SessionOutcome {
            layout: None,
            repository: None,
            exports,
            calibration: None,
            decryption: DecryptReport::default(),
            pps_summary_link: None,
        })
    }
}
