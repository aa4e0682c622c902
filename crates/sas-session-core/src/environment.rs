//! Environment state for SAS sessions.
//!
//! The SAS tools are configured entirely through environment variables. This
//! module keeps that state explicit: an [`EnvSnapshot`] is what a run reads,
//! an [`EnvAssignments`] set is what a run wants to write. Computing the
//! assignments is pure; only [`EnvAssignments::apply`] touches the process.

use crate::config::{EnvVars, InitConfig};
use crate::error::{Result, SessionError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// Immutable view of environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment. Non-UTF-8 entries are skipped.
    pub fn capture() -> Self {
        let vars = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self { vars }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Value of `name`, treating an empty value as unset.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    /// New snapshot with `assignments` layered on top.
    pub fn overlay(&self, assignments: &EnvAssignments) -> Self {
        let mut next = self.clone();
        for (name, value) in assignments.iter() {
            next.set(name, value);
        }
        next
    }

    /// Require `name` to be set, or fail with an initialization error.
    pub fn require(&self, name: &str, hint: &str) -> Result<&str> {
        self.get(name).ok_or_else(|| SessionError::MissingEnvironment {
            variable: name.to_string(),
            hint: hint.to_string(),
        })
    }
}

/// Ordered set of environment variable assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvAssignments {
    vars: Vec<(String, String)>,
}

/// Assignments produced by the environment initializer.
pub type EnvPlan = EnvAssignments;

/// Assignments exported by a session run for downstream SAS tasks.
pub type SessionExports = EnvAssignments;

impl EnvAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `name`, replacing an earlier assignment in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.vars.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Write every assignment into the current process environment.
    pub fn apply(&self) {
        for (name, value) in self.iter() {
            debug!("Setting {} = {}", name, value);
            std::env::set_var(name, value);
        }
    }

    /// Render as POSIX shell `export` statements, one per line.
    pub fn to_shell(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("export {}={}\n", name, shell_quote(value)))
            .collect()
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Where a new entry goes when it is missing from a path list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPosition {
    Prepend,
    Append,
}

/// Add each of `values` to the path list `current` unless already present.
///
/// An unset or empty list becomes the first value. Entries are handled one at
/// a time, so prepending `[a, b]` yields `b:a:...`.
pub fn add_to_path_list(current: Option<&str>, values: &[String], position: ListPosition) -> String {
    let mut entries: Vec<String> = match current {
        Some(list) if !list.is_empty() => list.split(PATH_LIST_SEPARATOR).map(String::from).collect(),
        _ => Vec::new(),
    };

    for value in values {
        if entries.iter().any(|e| e == value) {
            continue;
        }
        match position {
            ListPosition::Prepend => entries.insert(0, value.clone()),
            ListPosition::Append => entries.push(value.clone()),
        }
    }

    let mut joined = String::new();
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            joined.push(PATH_LIST_SEPARATOR);
        }
        joined.push_str(entry);
    }
    joined
}

/// One-time SAS environment setup.
///
/// HEASoft must already be initialized (`LHEASOFT` set) before SAS can be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentInitializer {
    pub sas_dir: Option<PathBuf>,
    pub sas_ccfpath: Option<PathBuf>,
    pub verbosity: u8,
    pub suppress_warning: u8,
}

impl Default for EnvironmentInitializer {
    fn default() -> Self {
        Self {
            sas_dir: None,
            sas_ccfpath: None,
            verbosity: InitConfig::DEFAULT_VERBOSITY,
            suppress_warning: InitConfig::DEFAULT_SUPPRESS_WARNING,
        }
    }
}

impl EnvironmentInitializer {
    pub fn new(sas_dir: impl Into<PathBuf>, sas_ccfpath: impl Into<PathBuf>) -> Self {
        Self {
            sas_dir: Some(sas_dir.into()),
            sas_ccfpath: Some(sas_ccfpath.into()),
            ..Self::default()
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_suppress_warning(mut self, suppress_warning: u8) -> Self {
        self.suppress_warning = suppress_warning;
        self
    }

    /// Compute the variables to assign, given the current environment.
    ///
    /// Pure: the same initializer and snapshot always give the same plan, and
    /// planning against a snapshot that already has the plan applied gives an
    /// identical plan.
    pub fn plan(&self, current: &EnvSnapshot) -> Result<EnvPlan> {
        current.require(EnvVars::LHEASOFT, "Please initialise HEASOFT")?;
        let sas_dir = self
            .sas_dir
            .as_deref()
            .ok_or_else(|| SessionError::config("sas_dir must be provided to initialize SAS"))?;
        let sas_ccfpath = self
            .sas_ccfpath
            .as_deref()
            .ok_or_else(|| SessionError::config("sas_ccfpath must be provided to initialize SAS"))?;

        let bin = sas_subdirs(sas_dir, InitConfig::BIN_DIRS);
        let lib = sas_subdirs(sas_dir, InitConfig::LIB_DIRS);
        let perl = sas_subdirs(sas_dir, InitConfig::PERL_DIRS);
        let python = sas_subdirs(sas_dir, InitConfig::PYTHON_DIRS);

        let mut working = current.clone();
        let mut plan = EnvPlan::new();
        let mut assign = |name: &str, value: String, working: &mut EnvSnapshot| {
            working.set(name, value.clone());
            plan.set(name, value);
        };

        assign(EnvVars::SAS_DIR, path_string(sas_dir), &mut working);
        assign(EnvVars::SAS_CCFPATH, path_string(sas_ccfpath), &mut working);

        let sas_path = add_to_path_list(
            working.get(EnvVars::SAS_PATH),
            &[path_string(sas_dir)],
            ListPosition::Prepend,
        );
        let all_dirs: Vec<String> = [&bin, &lib, &perl, &python].into_iter().flatten().cloned().collect();
        let sas_path = add_to_path_list(Some(&sas_path), &all_dirs, ListPosition::Append);
        assign(EnvVars::SAS_PATH, sas_path, &mut working);

        for (name, values, position) in [
            (EnvVars::PATH, &bin, ListPosition::Prepend),
            (EnvVars::LIBRARY_PATH, &lib, ListPosition::Append),
            (EnvVars::LD_LIBRARY_PATH, &lib, ListPosition::Append),
            (EnvVars::PERL5LIB, &perl, ListPosition::Prepend),
            (EnvVars::PYTHONPATH, &python, ListPosition::Prepend),
        ] {
            let merged = add_to_path_list(working.get(name), values, position);
            assign(name, merged, &mut working);
        }

        if let Some(perllib) = working.get(EnvVars::PERLLIB).map(str::to_string) {
            let legacy: Vec<String> = perllib
                .split(PATH_LIST_SEPARATOR)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            let merged = add_to_path_list(working.get(EnvVars::PERL5LIB), &legacy, ListPosition::Append);
            assign(EnvVars::PERL5LIB, merged, &mut working);
        }

        assign(EnvVars::SAS_VERBOSITY, self.verbosity.to_string(), &mut working);
        assign(
            EnvVars::SAS_SUPPRESS_WARNING,
            self.suppress_warning.to_string(),
            &mut working,
        );

        Ok(plan)
    }

    /// Plan against the live environment and apply the result.
    pub fn initialize(&self) -> Result<EnvPlan> {
        let plan = self.plan(&EnvSnapshot::capture())?;
        plan.apply();
        for (name, value) in plan.iter() {
            info!("{} set to {}", name, value);
        }
        Ok(plan)
    }
}

fn sas_subdirs(sas_dir: &Path, subdirs: &[&str]) -> Vec<String> {
    subdirs
        .iter()
        .map(|sub| {
            sub.split('/')
                .fold(sas_dir.to_path_buf(), |acc, part| acc.join(part))
        })
        .map(|p| path_string(&p))
        .collect()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
