//! On-disk layout of a staged observation.
//!
//! ```text
//! <base>/<obs_id>/ODF       raw observation data files
//! <base>/<obs_id>/PPS       pipeline products
//! <base>/<obs_id>/working   calibration outputs (ccf.cif, *SUM.SAS)
//! ```

use crate::config::{DataLevel, LayoutConfig};
use crate::error::{Result, SessionError};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Resolve `dir` against `start_dir` when relative, normalizing `.` and `..`.
pub fn resolve_base_dir(dir: Option<&Path>, start_dir: &Path) -> PathBuf {
    let joined = match dir {
        None => start_dir.to_path_buf(),
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => start_dir.join(d),
    };
    normalize_lexically(&joined)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Paths of one observation under a base data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationLayout {
    pub obs_id: String,
    pub base_dir: PathBuf,
    pub obs_dir: PathBuf,
    pub odf_dir: PathBuf,
    pub pps_dir: PathBuf,
    pub working_dir: PathBuf,
}

impl ObservationLayout {
    /// Layout for `obs_id` under an absolute `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>, obs_id: &str) -> Self {
        let base_dir = base_dir.into();
        let obs_dir = base_dir.join(obs_id);
        Self {
            obs_id: obs_id.to_string(),
            odf_dir: obs_dir.join(LayoutConfig::ODF_DIR_NAME),
            pps_dir: obs_dir.join(LayoutConfig::PPS_DIR_NAME),
            working_dir: obs_dir.join(LayoutConfig::WORKING_DIR_NAME),
            obs_dir,
            base_dir,
        }
    }

    /// Subdirectory holding data of a single `level`.
    pub fn level_dir(&self, level: DataLevel) -> &Path {
        match level {
            DataLevel::Pps => &self.pps_dir,
            DataLevel::Odf | DataLevel::All => &self.odf_dir,
        }
    }

    /// Create the base directory if needed, then a fresh observation tree.
    ///
    /// An existing observation directory is removed only when `overwrite` is
    /// set; otherwise nothing on disk is touched and `ObservationExists` is
    /// returned.
    pub fn prepare(&self, overwrite: bool) -> Result<()> {
        if !self.base_dir.is_dir() {
            warn!("{} does not exist. Creating it!", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .map_err(|e| SessionError::io("creating data directory", &self.base_dir, e))?;
        }

        if self.obs_dir.exists() {
            if !overwrite {
                return Err(SessionError::ObservationExists {
                    obs_id: self.obs_id.clone(),
                    path: self.obs_dir.clone(),
                });
            }
            info!("Removing existing directory {}", self.obs_dir.display());
            fs::remove_dir_all(&self.obs_dir)
                .map_err(|e| SessionError::io("removing observation directory", &self.obs_dir, e))?;
        }

        info!("Creating observation directory {}", self.obs_dir.display());
        fs::create_dir(&self.obs_dir)
            .map_err(|e| SessionError::io("creating observation directory", &self.obs_dir, e))?;
        fs::create_dir(&self.working_dir)
            .map_err(|e| SessionError::io("creating working directory", &self.working_dir, e))?;
        Ok(())
    }

    /// Ensure the data directory for `level` exists.
    pub fn ensure_level_dir(&self, level: DataLevel) -> Result<&Path> {
        let dir = self.level_dir(level);
        fs::create_dir_all(dir).map_err(|e| SessionError::io("creating level directory", dir, e))?;
        Ok(dir)
    }

    /// Observation summary page produced by the processing pipeline.
    pub fn pps_summary_page(&self) -> PathBuf {
        self.pps_dir
            .join(format!("P{}OBX000SUMMAR0000.HTM", self.obs_id))
    }
}

/// First file in `dir` whose name starts with the manifest prefix.
pub fn find_manifest(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut manifests: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| SessionError::io("reading directory", dir, e))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with(LayoutConfig::MANIFEST_PREFIX))
                    .unwrap_or(false)
        })
        .collect();
    manifests.sort();
    Ok(manifests.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_base_dir() {
        let start = Path::new("/home/user/work");
        assert_eq!(resolve_base_dir(None, start), PathBuf::from("/home/user/work"));
        assert_eq!(
            resolve_base_dir(Some(Path::new("data")), start),
            PathBuf::from("/home/user/work/data")
        );
        assert_eq!(
            resolve_base_dir(Some(Path::new("./data/../xmm")), start),
            PathBuf::from("/home/user/work/xmm")
        );
        assert_eq!(
            resolve_base_dir(Some(Path::new("/abs/data")), start),
            PathBuf::from("/abs/data")
        );
    }

    #[test]
    fn test_layout_paths() {
        let layout = ObservationLayout::new("/data", "0802710101");
        assert_eq!(layout.odf_dir, PathBuf::from("/data/0802710101/ODF"));
        assert_eq!(layout.pps_dir, PathBuf::from("/data/0802710101/PPS"));
        assert_eq!(layout.working_dir, PathBuf::from("/data/0802710101/working"));
        assert_eq!(layout.level_dir(DataLevel::Pps), Path::new("/data/0802710101/PPS"));
        assert!(layout
            .pps_summary_page()
            .ends_with("PPS/P0802710101OBX000SUMMAR0000.HTM"));
    }

    #[test]
    fn test_prepare_creates_tree_and_base() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("new-base");
        let layout = ObservationLayout::new(&base, "0001");
        layout.prepare(false).unwrap();
        assert!(layout.obs_dir.is_dir());
        assert!(layout.working_dir.is_dir());
    }

    #[test]
    fn test_prepare_conflict_is_not_destructive() {
        let temp = TempDir::new().unwrap();
        let layout = ObservationLayout::new(temp.path(), "0001");
        fs::create_dir_all(&layout.odf_dir).unwrap();
        fs::write(layout.odf_dir.join("keep.txt"), "x").unwrap();

        let err = layout.prepare(false).unwrap_err();
        assert!(matches!(err, SessionError::ObservationExists { .. }));
        assert!(layout.odf_dir.join("keep.txt").exists());
    }

    #[test]
    fn test_prepare_overwrite_removes_old_tree() {
        let temp = TempDir::new().unwrap();
        let layout = ObservationLayout::new(temp.path(), "0001");
        fs::create_dir_all(&layout.odf_dir).unwrap();
        fs::write(layout.odf_dir.join("old.txt"), "x").unwrap();

        layout.prepare(true).unwrap();
        assert!(!layout.odf_dir.exists());
        assert!(layout.working_dir.is_dir());
    }

    #[test]
    fn test_find_manifest() {
        let temp = TempDir::new().unwrap();
        assert_eq!(find_manifest(temp.path()).unwrap(), None);
        fs::write(temp.path().join("0001_EPN.FIT"), "x").unwrap();
        fs::write(temp.path().join("MANIFEST.12345"), "x").unwrap();
        assert_eq!(
            find_manifest(temp.path()).unwrap(),
            Some(temp.path().join("MANIFEST.12345"))
        );
        assert_eq!(find_manifest(&temp.path().join("missing")).unwrap(), None);
    }
}
