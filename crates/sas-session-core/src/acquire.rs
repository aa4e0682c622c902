//! Acquisition of observation data from the supported repositories.
//!
//! Three sources are supported:
//! - [`EsaArchive`]: downloads a per-level tarball from the XMM-Newton Science
//!   Archive and unpacks it.
//! - [`HeasarcMirror`]: mirrors the HEASARC FTP tree with `wget` and prunes
//!   what was not asked for.
//! - [`SharedStore`]: copies from the HEASARC data mounted on SciServer.

use crate::config::{ArchiveConfig, ArchiveEndpoints, DataLevel, Repository};
use crate::error::{Result, SessionError};
use crate::layout::ObservationLayout;
use crate::process::{CommandRunner, ToolCommand};
use crate::unpack::extract_tar;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use walkdir::WalkDir;

/// A place observation data can be acquired from.
pub trait ArchiveSource {
    fn repository(&self) -> Repository;

    /// Place the data for `level` under `layout.obs_dir`.
    ///
    /// On success the requested level directories hold the (possibly still
    /// encrypted or compressed) observation files.
    fn fetch(
        &self,
        layout: &ObservationLayout,
        level: DataLevel,
        runner: &dyn CommandRunner,
    ) -> Result<()>;
}

/// Build the source for `repository`.
pub fn source_for(repository: Repository, endpoints: &ArchiveEndpoints) -> Box<dyn ArchiveSource> {
    match repository {
        Repository::Esa => Box::new(EsaArchive::new(endpoints.esa_aio_url.clone())),
        Repository::Heasarc => Box::new(HeasarcMirror::new(endpoints.heasarc_base_url.clone())),
        Repository::SciServer => Box::new(SharedStore::new(endpoints.sciserver_root.clone())),
    }
}

fn acquisition_error(repository: Repository, message: impl Into<String>) -> SessionError {
    SessionError::Acquisition {
        repository: repository.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// ESA archive
// ---------------------------------------------------------------------------

/// XMM-Newton Science Archive "all in one" download endpoint.
pub struct EsaArchive {
    aio_url: String,
}

impl EsaArchive {
    pub fn new(aio_url: impl Into<String>) -> Self {
        Self {
            aio_url: aio_url.into(),
        }
    }

    /// Download URL for one observation level.
    pub fn download_url(&self, obs_id: &str, level: DataLevel) -> Result<Url> {
        Url::parse_with_params(&self.aio_url, &[("obsno", obs_id), ("level", level.as_str())])
            .map_err(|e| SessionError::config(format!("Invalid archive URL {}: {e}", self.aio_url)))
    }

    fn download(&self, url: &Url, dest: &Path) -> Result<()> {
        // Observation tarballs can take a long time; no overall timeout.
        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()?;

        let mut response = client.get(url.clone()).send()?;
        if !response.status().is_success() {
            return Err(acquisition_error(
                Repository::Esa,
                format!("{url} returned HTTP {}", response.status()),
            ));
        }

        let mut file = File::create(dest).map_err(|e| SessionError::io("creating download file", dest, e))?;
        let bytes = response.copy_to(&mut file)?;
        debug!("Downloaded {} bytes into {}", bytes, dest.display());
        Ok(())
    }
}

impl ArchiveSource for EsaArchive {
    fn repository(&self) -> Repository {
        Repository::Esa
    }

    fn fetch(
        &self,
        layout: &ObservationLayout,
        level: DataLevel,
        _runner: &dyn CommandRunner,
    ) -> Result<()> {
        let artifact = layout.obs_dir.join(format!("{}.tar.gz", layout.obs_id));

        for &component in level.components() {
            if artifact.exists() {
                fs::remove_file(&artifact)
                    .map_err(|e| SessionError::io("removing stale download", &artifact, e))?;
            }

            let url = self.download_url(&layout.obs_id, component)?;
            info!(
                "Downloading {}, level {} into {}",
                layout.obs_id,
                component,
                layout.obs_dir.display()
            );
            self.download(&url, &artifact)?;

            let size = fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                return Err(acquisition_error(
                    Repository::Esa,
                    format!("File {} is not present. Not downloaded?", artifact.display()),
                ));
            }
            info!("{} found.", artifact.display());

            let dest = layout.ensure_level_dir(component)?;
            info!("Unpacking {} ...", artifact.display());
            extract_tar(&artifact, dest)?;
            fs::remove_file(&artifact)
                .map_err(|e| SessionError::io("removing downloaded archive", &artifact, e))?;
            info!("{} extracted successfully and removed", artifact.display());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HEASARC mirror
// ---------------------------------------------------------------------------

/// HEASARC FTP tree mirrored over HTTPS with `wget`.
pub struct HeasarcMirror {
    base_url: String,
}

impl HeasarcMirror {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn mirror_url(&self, obs_id: &str, level: DataLevel) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            obs_id,
            level.path_segment()
        )
    }

    pub fn mirror_command(&self, layout: &ObservationLayout, level: DataLevel) -> ToolCommand {
        ToolCommand::new(ArchiveConfig::MIRROR_PROGRAM)
            .args(["-m", "-nH", "-e", "robots=off"])
            .arg(format!("--cut-dirs={}", ArchiveConfig::MIRROR_CUT_DIRS))
            .args(["-l".to_string(), ArchiveConfig::MIRROR_DEPTH.to_string(), "-np".to_string()])
            .arg(self.mirror_url(&layout.obs_id, level))
            .current_dir(&layout.base_dir)
    }
}

impl ArchiveSource for HeasarcMirror {
    fn repository(&self) -> Repository {
        Repository::Heasarc
    }

    fn fetch(
        &self,
        layout: &ObservationLayout,
        level: DataLevel,
        runner: &dyn CommandRunner,
    ) -> Result<()> {
        info!("Downloading {}, level {}", layout.obs_id, level);
        let status = runner.run(&self.mirror_command(layout, level))?;

        prune_mirror_tree(&layout.obs_dir, level)?;

        let has_data = level
            .components()
            .iter()
            .any(|&component| dir_has_files(layout.level_dir(component)));

        if !status.success() {
            if !has_data {
                return Err(acquisition_error(
                    Repository::Heasarc,
                    format!("{} exited with {:?} and fetched no data", ArchiveConfig::MIRROR_PROGRAM, status.code),
                ));
            }
            // wget reports failures for individual index pages; partial
            // mirrors with data present are kept.
            warn!(
                "{} exited with {:?}; continuing with mirrored data",
                ArchiveConfig::MIRROR_PROGRAM,
                status.code
            );
        } else if !has_data {
            return Err(acquisition_error(
                Repository::Heasarc,
                format!("No data mirrored for {} at level {}", layout.obs_id, level),
            ));
        }
        Ok(())
    }
}

/// Remove mirror artifacts under `obs_dir`: generated index pages, catalog
/// directories and the level that was not requested.
pub fn prune_mirror_tree(obs_dir: &Path, level: DataLevel) -> Result<()> {
    if !obs_dir.is_dir() {
        return Ok(());
    }

    let unwanted_level = match level {
        DataLevel::Odf => Some(crate::config::LayoutConfig::PPS_DIR_NAME),
        DataLevel::Pps => Some(crate::config::LayoutConfig::ODF_DIR_NAME),
        DataLevel::All => None,
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in WalkDir::new(obs_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| SessionError::Io {
            message: format!("Failed to walk {}: {}", obs_dir.display(), e),
            path: e.path().map(Path::to_path_buf),
            source: e.into_io_error(),
        })?;
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            if name.contains(ArchiveConfig::CATALOG_DIR_MARKER) || Some(&*name) == unwanted_level {
                dirs.push(entry.path().to_path_buf());
            }
        } else if name.contains(ArchiveConfig::MIRROR_INDEX_MARKER) {
            files.push(entry.path().to_path_buf());
        }
    }

    for dir in dirs {
        if dir.exists() {
            debug!("Removing {}", dir.display());
            fs::remove_dir_all(&dir).map_err(|e| SessionError::io("removing directory", &dir, e))?;
        }
    }
    for file in files {
        if file.exists() {
            debug!("Removing {}", file.display());
            fs::remove_file(&file).map_err(|e| SessionError::io("removing file", &file, e))?;
        }
    }
    Ok(())
}

fn dir_has_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file())
}

// ---------------------------------------------------------------------------
// Shared filesystem
// ---------------------------------------------------------------------------

/// HEASARC data mounted on a shared filesystem.
pub struct SharedStore {
    root: PathBuf,
}

impl SharedStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn source_dir(&self, obs_id: &str, level: DataLevel) -> PathBuf {
        let obs = self.root.join(obs_id);
        match level {
            DataLevel::All => obs,
            other => obs.join(other.as_str()),
        }
    }
}

impl ArchiveSource for SharedStore {
    fn repository(&self) -> Repository {
        Repository::SciServer
    }

    fn fetch(
        &self,
        layout: &ObservationLayout,
        level: DataLevel,
        _runner: &dyn CommandRunner,
    ) -> Result<()> {
        let source = self.source_dir(&layout.obs_id, level);
        if !source.is_dir() {
            return Err(acquisition_error(
                Repository::SciServer,
                format!("{} does not exist", source.display()),
            ));
        }

        let dest = match level {
            DataLevel::All => layout.obs_dir.clone(),
            other => layout.ensure_level_dir(other)?.to_path_buf(),
        };

        info!("Copying data from {} ...", source.display());
        copy_dir_recursive(&source, &dest)
    }
}

/// Copy the tree under `src` into `dst`, overwriting existing files.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| SessionError::Io {
            message: format!("Failed to walk {}: {}", src.display(), e),
            path: e.path().map(Path::to_path_buf),
            source: e.into_io_error(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SessionError::config(format!("Unexpected path outside {}: {e}", src.display())))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| SessionError::io("creating directory", &target, e))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| SessionError::io("copying file", entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ToolStatus;
    use tempfile::TempDir;

    struct NoTools;

    impl CommandRunner for NoTools {
        fn run(&self, command: &ToolCommand) -> Result<ToolStatus> {
            panic!("unexpected tool invocation: {}", command.display());
        }
    }

    /// Writes a fixed mirror tree the way wget would, then exits with `code`.
    struct FakeWget {
        code: i32,
        write_files: bool,
    }

    impl CommandRunner for FakeWget {
        fn run(&self, command: &ToolCommand) -> Result<ToolStatus> {
            assert_eq!(command.program, "wget");
            if self.write_files {
                let base = command.current_dir.clone().unwrap();
                let obs = base.join("0001");
                for dir in ["ODF", "PPS", "4XMM_DR13"] {
                    fs::create_dir_all(obs.join(dir)).unwrap();
                }
                fs::write(obs.join("ODF/MANIFEST.1"), "m").unwrap();
                fs::write(obs.join("ODF/index.html"), "<html>").unwrap();
                fs::write(obs.join("PPS/P0001.HTM"), "p").unwrap();
                fs::write(obs.join("index.html?C=M;O=A"), "<html>").unwrap();
            }
            Ok(ToolStatus { code: Some(self.code) })
        }
    }

    fn layout(temp: &TempDir) -> ObservationLayout {
        let layout = ObservationLayout::new(temp.path(), "0001");
        layout.prepare(false).unwrap();
        layout
    }

    #[test]
    fn test_esa_download_url() {
        let esa = EsaArchive::new(ArchiveConfig::ESA_AIO_URL);
        let url = esa.download_url("0802710101", DataLevel::Pps).unwrap();
        assert_eq!(
            url.as_str(),
            "https://nxsa.esac.esa.int/nxsa-sl/servlet/data-action-aio?obsno=0802710101&level=PPS"
        );
    }

    #[test]
    fn test_esa_unreachable_is_acquisition_error() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        // Port 9 (discard) on loopback is not an HTTP server.
        let esa = EsaArchive::new("http://127.0.0.1:9/aio");
        let err = esa.fetch(&layout, DataLevel::Odf, &NoTools).unwrap_err();
        assert!(matches!(err, SessionError::Acquisition { .. }));
    }

    /// Minimal HTTP/1.1 server on loopback answering one connection per
    /// response, in order. The join handle yields the request lines seen.
    fn serve(responses: Vec<(u16, Vec<u8>)>) -> (String, std::thread::JoinHandle<Vec<String>>) {
        use std::io::{Read, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/aio", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&head).into_owned();
                requests.push(head.lines().next().unwrap_or_default().to_string());

                let mut reply = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                )
                .into_bytes();
                reply.extend_from_slice(&body);
                // The client may hang up after reading an error status.
                let _ = stream.write_all(&reply);
            }
            requests
        });
        (url, handle)
    }

    fn tarball(name: &str, data: &[u8]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, data).unwrap();
            builder.finish().unwrap();
        }
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&tar_bytes).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_esa_fetch_all_extracts_each_level() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let artifact = layout.obs_dir.join("0001.tar.gz");
        fs::write(&artifact, b"stale").unwrap();

        let (url, server) = serve(vec![
            (200, tarball("MANIFEST.0001", b"odf")),
            (200, tarball("P0001OBX000SUMMAR0000.HTM", b"pps")),
        ]);
        EsaArchive::new(url)
            .fetch(&layout, DataLevel::All, &NoTools)
            .unwrap();

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("obsno=0001&level=ODF"));
        assert!(requests[1].contains("obsno=0001&level=PPS"));
        assert_eq!(fs::read(layout.odf_dir.join("MANIFEST.0001")).unwrap(), b"odf");
        assert_eq!(
            fs::read(layout.pps_dir.join("P0001OBX000SUMMAR0000.HTM")).unwrap(),
            b"pps"
        );
        assert!(!artifact.exists());
    }

    #[test]
    fn test_esa_not_found_is_acquisition_error() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let artifact = layout.obs_dir.join("0001.tar.gz");
        fs::write(&artifact, b"stale").unwrap();

        let (url, server) = serve(vec![(404, b"no such observation".to_vec())]);
        let err = EsaArchive::new(url)
            .fetch(&layout, DataLevel::Odf, &NoTools)
            .unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, SessionError::Acquisition { .. }));
        assert!(!artifact.exists());
        assert!(!layout.odf_dir.exists());
    }

    #[test]
    fn test_esa_empty_body_is_acquisition_error() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);

        let (url, server) = serve(vec![(200, Vec::new())]);
        let err = EsaArchive::new(url)
            .fetch(&layout, DataLevel::Odf, &NoTools)
            .unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, SessionError::Acquisition { .. }));
        assert!(!layout.odf_dir.exists());
    }

    #[test]
    fn test_mirror_command() {
        let mirror = HeasarcMirror::new(ArchiveConfig::HEASARC_BASE_URL);
        let layout = ObservationLayout::new("/data", "0001");
        let cmd = mirror.mirror_command(&layout, DataLevel::All);
        assert_eq!(
            cmd.display(),
            "wget -m -nH -e robots=off --cut-dirs=4 -l 2 -np https://heasarc.gsfc.nasa.gov/FTP/xmm/data/rev0/0001/"
        );
        assert_eq!(cmd.current_dir, Some(PathBuf::from("/data")));
    }

    #[test]
    fn test_mirror_prunes_odf_request() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let mirror = HeasarcMirror::new("https://example.invalid/rev0");
        mirror
            .fetch(&layout, DataLevel::Odf, &FakeWget { code: 0, write_files: true })
            .unwrap();

        assert!(layout.odf_dir.join("MANIFEST.1").exists());
        assert!(!layout.odf_dir.join("index.html").exists());
        assert!(!layout.obs_dir.join("index.html?C=M;O=A").exists());
        assert!(!layout.pps_dir.exists());
        assert!(!layout.obs_dir.join("4XMM_DR13").exists());
        assert!(layout.working_dir.exists());
    }

    #[test]
    fn test_mirror_all_keeps_both_levels() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        HeasarcMirror::new("https://example.invalid/rev0")
            .fetch(&layout, DataLevel::All, &FakeWget { code: 8, write_files: true })
            .unwrap();
        assert!(layout.odf_dir.exists());
        assert!(layout.pps_dir.join("P0001.HTM").exists());
    }

    #[test]
    fn test_mirror_without_data_fails() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let err = HeasarcMirror::new("https://example.invalid/rev0")
            .fetch(&layout, DataLevel::Odf, &FakeWget { code: 4, write_files: false })
            .unwrap_err();
        assert!(matches!(err, SessionError::Acquisition { .. }));
    }

    #[test]
    fn test_shared_store_copies_level() {
        let temp = TempDir::new().unwrap();
        let store_root = temp.path().join("store");
        fs::create_dir_all(store_root.join("0001/ODF/sub")).unwrap();
        fs::write(store_root.join("0001/ODF/MANIFEST.1"), "m").unwrap();
        fs::write(store_root.join("0001/ODF/sub/a.FIT.gz"), "a").unwrap();

        let data = temp.path().join("data");
        let layout = ObservationLayout::new(&data, "0001");
        layout.prepare(false).unwrap();
        fs::create_dir_all(&layout.odf_dir).unwrap();
        fs::write(layout.odf_dir.join("MANIFEST.1"), "stale").unwrap();

        SharedStore::new(&store_root)
            .fetch(&layout, DataLevel::Odf, &NoTools)
            .unwrap();
        assert_eq!(fs::read_to_string(layout.odf_dir.join("MANIFEST.1")).unwrap(), "m");
        assert!(layout.odf_dir.join("sub/a.FIT.gz").exists());
    }

    #[test]
    fn test_shared_store_missing_source() {
        let temp = TempDir::new().unwrap();
        let layout = layout(&temp);
        let err = SharedStore::new(temp.path().join("nowhere"))
            .fetch(&layout, DataLevel::Odf, &NoTools)
            .unwrap_err();
        assert!(matches!(err, SessionError::Acquisition { .. }));
    }
}
