//! SAS Session - Headless library for staging XMM-Newton observations.
//!
//! This crate prepares an environment in which the XMM-Newton Science
//! Analysis System (SAS) can run:
//!
//! - [`EnvironmentInitializer`] computes the SAS environment (search paths,
//!   `SAS_DIR`, `SAS_CCFPATH`, verbosity) from the current one.
//! - [`ObservationSession`] downloads an observation, unpacks it and runs
//!   `cifbuild`/`odfingest`, reporting `SAS_CCF` and `SAS_ODF`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sas_session::{EnvSnapshot, ObservationSession, SessionRequest};
//!
//! fn main() -> sas_session::Result<()> {
//!     let session = ObservationSession::new(EnvSnapshot::capture(), "/data/xmm");
//!
//!     let mut request = SessionRequest::for_observation("0104860501");
//!     request.data_dir = Some("/data/xmm".into());
//!     let outcome = session.run(&request)?;
//!
//!     // SAS_CCF and SAS_ODF for the calling shell
//!     print!("{}", outcome.exports.to_shell());
//!     Ok(())
//! }
//! ```

pub mod acquire;
pub mod calibrate;
pub mod config;
pub mod controller;
pub mod decrypt;
pub mod environment;
pub mod error;
pub mod layout;
pub mod logging;
pub mod process;
pub mod settings;
pub mod summary;
pub mod unpack;

// Re-export commonly used types
pub use acquire::{source_for, ArchiveSource, EsaArchive, HeasarcMirror, SharedStore};
pub use calibrate::{calibrate, CalibrationOptions, CalibrationOutputs};
pub use config::{ArchiveEndpoints, DataLevel, EnvVars, PathCheckPolicy, Repository};
pub use controller::{DataSelection, ObservationSession, SessionOutcome, SessionRequest};
pub use decrypt::{DecryptReport, KeySource};
pub use environment::{
    add_to_path_list, EnvAssignments, EnvPlan, EnvSnapshot, EnvironmentInitializer, ListPosition,
    SessionExports,
};
pub use error::{ErrorKind, Result, SessionError};
pub use layout::ObservationLayout;
pub use logging::{init_task_logger, LogFileMode, TaskLogSettings};
pub use process::{command_exists, CommandRunner, SystemRunner, ToolCommand, ToolStatus};
pub use settings::{SasDefaults, SettingsStore};
pub use summary::SummaryFile;
