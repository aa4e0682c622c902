//! Calibration of a staged ODF with `cifbuild` and `odfingest`.

use crate::config::{CalibrationConfig, EnvVars, PathCheckPolicy};
use crate::environment::SessionExports;
use crate::error::{Result, SessionError};
use crate::layout::{find_manifest, ObservationLayout};
use crate::process::{arg_path, split_options, CommandRunner, ToolCommand};
use crate::summary::{find_summary_file, same_dir, SummaryFile};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Options for the calibration step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationOptions {
    /// Extra arguments for `cifbuild`, whitespace separated.
    pub cifbuild_opts: Option<String>,
    /// Extra arguments for `odfingest`, whitespace separated.
    pub odfingest_opts: Option<String>,
    pub path_check: PathCheckPolicy,
}

/// Files produced by calibration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationOutputs {
    /// Calibration index file (`ccf.cif`).
    pub ccf: PathBuf,
    /// Summary file (`*SUM.SAS`).
    pub summary: PathBuf,
}

/// Fail with `OutputMissing` unless `path` is a non-empty regular file.
pub fn require_nonempty_file(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(SessionError::OutputMissing {
            path: path.to_path_buf(),
        }),
    }
}

fn tool_command(program: &str, options: Option<&str>, workdir: &Path, exports: &SessionExports) -> ToolCommand {
    let mut command = ToolCommand::new(program)
        .args(split_options(options))
        .current_dir(workdir);
    for (name, value) in exports.iter() {
        command = command.env(name, value);
    }
    command
}

fn run_tool(runner: &dyn CommandRunner, command: &ToolCommand) -> Result<()> {
    info!("Running {} ...", command.display());
    let status = runner.run(command)?;
    if !status.success() {
        error!("{} failed to complete", command.program);
        return Err(SessionError::ToolFailed {
            program: command.program.clone(),
            code: status.code,
        });
    }
    info!("{} successfully completed", command.program);
    Ok(())
}

/// Run `cifbuild` then `odfingest` for the ODF in `layout`.
///
/// `SAS_ODF` and `SAS_CCF` are recorded in `exports` as each becomes known
/// and passed to the tools that follow.
pub fn calibrate(
    runner: &dyn CommandRunner,
    layout: &ObservationLayout,
    options: &CalibrationOptions,
    exports: &mut SessionExports,
) -> Result<CalibrationOutputs> {
    let manifest = find_manifest(&layout.odf_dir)?.ok_or_else(|| {
        error!("MANIFEST file not present in {}. Please check ODF!", layout.odf_dir.display());
        SessionError::input(
            "odf",
            format!("no MANIFEST file in {}", layout.odf_dir.display()),
        )
    })?;
    info!("File {} exists", manifest.display());

    let odf_dir = arg_path(&layout.odf_dir);
    info!("Setting SAS_ODF = {}", odf_dir);
    exports.set(EnvVars::SAS_ODF, odf_dir);

    let cifbuild = tool_command(
        CalibrationConfig::CIFBUILD,
        options.cifbuild_opts.as_deref(),
        &layout.working_dir,
        exports,
    );
    run_tool(runner, &cifbuild)?;

    let ccf = layout.working_dir.join(CalibrationConfig::CCF_FILE_NAME);
    require_nonempty_file(&ccf)?;
    info!("CIF file {} created", ccf.display());
    info!("Setting SAS_CCF = {}", ccf.display());
    exports.set(EnvVars::SAS_CCF, arg_path(&ccf));

    let odfingest = tool_command(
        CalibrationConfig::ODFINGEST,
        options.odfingest_opts.as_deref(),
        &layout.working_dir,
        exports,
    );
    run_tool(runner, &odfingest)?;

    let summary = find_summary_file(&layout.working_dir)?.ok_or_else(|| SessionError::OutputMissing {
        path: layout
            .working_dir
            .join(format!("*{}", CalibrationConfig::SUMMARY_SUFFIX)),
    })?;
    require_nonempty_file(&summary)?;
    info!("SAS summary file {} created", summary.display());
    info!("Setting SAS_ODF = {}", summary.display());
    exports.set(EnvVars::SAS_ODF, arg_path(&summary));

    check_summary_path(&summary, &layout.odf_dir, options.path_check)?;

    Ok(CalibrationOutputs { ccf, summary })
}

/// Compare the summary file's `PATH` with the ODF directory it should describe.
pub fn check_summary_path(summary: &Path, odf_dir: &Path, policy: PathCheckPolicy) -> Result<()> {
    let parsed = SummaryFile::read(summary)?;
    let found = match parsed.odf_path() {
        Some(path) => path,
        None => {
            error!("SAS summary file {} has no PATH entry", summary.display());
            return match policy {
                PathCheckPolicy::Strict => Err(SessionError::input(
                    "summary",
                    format!("{} has no PATH entry", summary.display()),
                )),
                PathCheckPolicy::Advisory => Ok(()),
            };
        }
    };

    if same_dir(&found, odf_dir) {
        info!("Summary file PATH keyword matches {}", odf_dir.display());
        return Ok(());
    }

    error!(
        "SAS summary file PATH {} mismatches {}",
        found.display(),
        odf_dir.display()
    );
    match policy {
        PathCheckPolicy::Strict => Err(SessionError::SummaryPathMismatch {
            expected: odf_dir.to_path_buf(),
            found,
        }),
        PathCheckPolicy::Advisory => Ok(()),
    }
}
