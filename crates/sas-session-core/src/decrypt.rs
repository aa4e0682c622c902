//! Decryption of proprietary observation data.
//!
//! Proprietary ODFs arrive as `*.gpg` files encrypted with a per-observation
//! passphrase. The passphrase is given directly, given as a path to a file
//! containing it, or found as a uniquely-named file in the data directory.

use crate::config::{CalibrationConfig, LayoutConfig};
use crate::error::{Result, SessionError};
use crate::process::{arg_path, CommandRunner, ToolCommand};
use crate::unpack::{find_files_with_extension, strip_extension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Where a session takes its decryption key from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KeySource {
    /// Search the data directory for a key file.
    #[default]
    Discover,
    /// A literal key, or a path to a file whose first line is the key.
    Given(String),
}

impl KeySource {
    pub fn from_option(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => KeySource::Given(v),
            _ => KeySource::Discover,
        }
    }
}

/// Resolve the decryption key for `obs_id`.
///
/// Discovery looks for regular files in `search_dir` whose name contains the
/// observation id, then for files whose name contains `key`. Exactly one
/// candidate must exist.
pub fn resolve_key(source: &KeySource, obs_id: &str, search_dir: &Path) -> Result<String> {
    let key_file = match source {
        KeySource::Given(value) => {
            let candidate = Path::new(value);
            if candidate.is_file() {
                info!("Encryption key is in file: {}", candidate.display());
                candidate.to_path_buf()
            } else {
                return Ok(value.trim().to_string());
            }
        }
        KeySource::Discover => discover_key_file(obs_id, search_dir)?,
    };

    info!("Reading encryption key from: {}", key_file.display());
    let contents =
        fs::read_to_string(&key_file).map_err(|e| SessionError::io("reading key file", &key_file, e))?;
    let key = contents.lines().next().unwrap_or_default().trim().to_string();
    if key.is_empty() {
        error!("No encryption key found in {}", key_file.display());
        return Err(SessionError::KeyNotFound {
            search_dir: search_dir.to_path_buf(),
        });
    }
    Ok(key)
}

fn discover_key_file(obs_id: &str, search_dir: &Path) -> Result<PathBuf> {
    let mut candidates = files_with_name_containing(search_dir, obs_id)?;
    if candidates.is_empty() {
        candidates = files_with_name_containing(search_dir, "key")?;
    }

    match candidates.len() {
        0 => {
            error!("File decryption failed. No encryption key found.");
            Err(SessionError::KeyNotFound {
                search_dir: search_dir.to_path_buf(),
            })
        }
        1 => {
            let file = candidates.remove(0);
            info!("File with encryption key found: {}", file.display());
            Ok(file)
        }
        _ => {
            error!("Multiple possible encryption key files. Specify encryption key file.");
            Err(SessionError::AmbiguousKey { candidates })
        }
    }
}

fn files_with_name_containing(dir: &Path, needle: &str) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| SessionError::io("reading directory", dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().contains(needle))
                    .unwrap_or(false)
        })
        .collect();
    found.sort();
    Ok(found)
}

/// Build the gpg invocation that decrypts `input` into `output`.
/// The key is passed on stdin.
pub fn gpg_command(input: &Path, output: &Path, key: &str) -> ToolCommand {
    ToolCommand::new(CalibrationConfig::GPG)
        .args([
            "--batch",
            "--yes",
            "--pinentry-mode",
            "loopback",
            "--passphrase-fd",
            "0",
            "-o",
        ])
        .arg(arg_path(output))
        .arg("-d")
        .arg(arg_path(input))
        .stdin(key)
}

/// Summary of a decryption pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptReport {
    pub decrypted: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Decrypt every `*.gpg` file under `root`.
///
/// The key is only resolved when encrypted files exist. Files whose decrypted
/// output already exists are skipped; every other source is removed after a
/// successful decrypt.
pub fn decrypt_all(
    runner: &dyn CommandRunner,
    root: &Path,
    key_source: &KeySource,
    obs_id: &str,
    key_search_dir: &Path,
) -> Result<DecryptReport> {
    let encrypted = find_files_with_extension(root, LayoutConfig::ENCRYPTED_EXTENSION)?;
    let mut report = DecryptReport::default();
    if encrypted.is_empty() {
        info!("No encrypted files found.");
        return Ok(report);
    }

    info!("Encrypted files found! Decrypting {} files", encrypted.len());
    let key = resolve_key(key_source, obs_id, key_search_dir)?;

    for file in encrypted {
        let out_file = strip_extension(&file);
        if out_file.exists() {
            info!("Already decrypted file found: {}", out_file.display());
            report.skipped.push(out_file);
            continue;
        }

        info!("Decrypting {}", file.display());
        let status = runner.run(&gpg_command(&file, &out_file, &key))?;
        if !status.success() {
            error!("Problem decrypting {}", file.display());
            return Err(SessionError::Decryption {
                path: file,
                message: format!("gpg exited with {:?}", status.code),
            });
        }

        fs::remove_file(&file).map_err(|e| SessionError::io("removing encrypted file", &file, e))?;
        info!("{} removed", file.display());
        report.decrypted.push(out_file);
    }

    Ok(report)
}
