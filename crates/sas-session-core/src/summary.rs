//! SAS summary file (`*SUM.SAS`) handling.
//!
//! The summary file is a line-oriented list of `KEY VALUE` entries written by
//! `odfingest`. Only the `PATH` entry matters here: it names the ODF
//! directory the summary describes.

use crate::config::CalibrationConfig;
use crate::error::{Result, SessionError};
use std::fs;
use std::path::{Path, PathBuf};

/// Parsed `KEY VALUE` entries of a summary file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryFile {
    entries: Vec<(String, String)>,
}

impl SummaryFile {
    /// Parse summary text. Lines without exactly a key and a value are ignored.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let key = parts.next()?;
                let value = parts.next()?;
                if parts.next().is_some() {
                    return None;
                }
                Some((key.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| SessionError::io("reading summary file", path, e))?;
        Ok(Self::parse(&text))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The ODF directory referenced by the `PATH` entry.
    pub fn odf_path(&self) -> Option<PathBuf> {
        self.get(CalibrationConfig::SUMMARY_PATH_KEY).map(PathBuf::from)
    }
}

/// Whether `path` names a SAS summary file.
pub fn is_summary_file_name(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(CalibrationConfig::SUMMARY_SUFFIX))
        .unwrap_or(false)
}

/// The summary file produced in `dir`, if any.
pub fn find_summary_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut found: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| SessionError::io("reading directory", dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_summary_file_name(path))
        .collect();
    found.sort();
    Ok(found.into_iter().next())
}

/// Compare two directory paths ignoring trailing separators.
pub fn same_dir(a: &Path, b: &Path) -> bool {
    let trim = |p: &Path| {
        let s = p.to_string_lossy();
        let trimmed = s.trim_end_matches(std::path::MAIN_SEPARATOR).to_string();
        if trimmed.is_empty() {
            s.into_owned()
        } else {
            trimmed
        }
    };
    trim(a) == trim(b)
}
