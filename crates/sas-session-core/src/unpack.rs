//! Archive and compression handling for downloaded observation data.

use crate::config::LayoutConfig;
use crate::error::{Result, SessionError};
use flate2::read::MultiGzDecoder;
use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// All regular files under `root` whose extension is exactly `extension`,
/// sorted by path.
pub fn find_files_with_extension(root: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| SessionError::Io {
            message: format!("Failed to walk {}: {}", root.display(), e),
            path: e.path().map(Path::to_path_buf),
            source: e.into_io_error(),
        })?;
        if entry.file_type().is_file()
            && entry.path().extension().map(|ext| ext == extension).unwrap_or(false)
        {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// `path` with its last extension removed (`a/b.FIT.gz` -> `a/b.FIT`).
pub fn strip_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// Unpack a tar archive, gzip-compressed or not, into `dest_dir`.
pub fn extract_tar(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let mut file = File::open(archive_path)
        .map_err(|e| SessionError::io("opening archive", archive_path, e))?;

    let mut magic = [0u8; 2];
    let is_gzip = match file.read_exact(&mut magic) {
        Ok(()) => magic == GZIP_MAGIC,
        Err(_) => false,
    };
    file.seek(SeekFrom::Start(0))
        .map_err(|e| SessionError::io("rewinding archive", archive_path, e))?;

    fs::create_dir_all(dest_dir)
        .map_err(|e| SessionError::io("creating extract directory", dest_dir, e))?;

    let reader = BufReader::new(file);
    let result = if is_gzip {
        tar::Archive::new(MultiGzDecoder::new(reader)).unpack(dest_dir)
    } else {
        tar::Archive::new(reader).unpack(dest_dir)
    };

    result.map_err(|e| SessionError::Extraction {
        path: archive_path.to_path_buf(),
        message: e.to_string(),
    })?;

    debug!("Extracted {} into {}", archive_path.display(), dest_dir.display());
    Ok(())
}

/// Decompress a `.gz` file next to itself and remove the compressed source.
pub fn gunzip_in_place(path: &Path) -> Result<PathBuf> {
    let out_path = strip_extension(path);
    let input = File::open(path).map_err(|e| SessionError::io("opening gzip file", path, e))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(input));
    let mut output =
        File::create(&out_path).map_err(|e| SessionError::io("creating output file", &out_path, e))?;

    if let Err(e) = std::io::copy(&mut decoder, &mut output) {
        drop(output);
        if let Err(remove_err) = fs::remove_file(&out_path) {
            warn!("Failed to remove partial output {}: {}", out_path.display(), remove_err);
        }
        return Err(SessionError::Extraction {
            path: path.to_path_buf(),
            message: format!("gzip decompression failed: {e}"),
        });
    }

    fs::remove_file(path).map_err(|e| SessionError::io("removing gzip file", path, e))?;
    info!("{} removed", path.display());
    Ok(out_path)
}

/// Decompress every `.gz` file under `root`.
pub fn decompress_all(root: &Path) -> Result<usize> {
    let files = find_files_with_extension(root, LayoutConfig::GZIP_EXTENSION)?;
    for file in &files {
        info!("Unpacking {} ...", file.display());
        gunzip_in_place(file)?;
    }
    Ok(files.len())
}

/// Extract every secondary `.TAR` archive under `root` into `dest_dir`,
/// removing each archive afterwards.
pub fn extract_secondary_archives(root: &Path, dest_dir: &Path) -> Result<usize> {
    let archives = find_files_with_extension(root, LayoutConfig::SECONDARY_ARCHIVE_EXTENSION)?;
    for archive in &archives {
        info!("Unpacking {} ...", archive.display());
        extract_tar(archive, dest_dir)?;
        fs::remove_file(archive).map_err(|e| SessionError::io("removing archive", archive, e))?;
        info!("{} removed", archive.display());
    }
    Ok(archives.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_tar(path: &Path, entries: &[(&str, &[u8])], gzip: bool) {
        let file = File::create(path).unwrap();
        let mut buf = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut buf);
            for (name, data) in entries {
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, *data).unwrap();
            }
            builder.finish().unwrap();
        }
        if gzip {
            let mut enc = GzEncoder::new(file, Compression::default());
            enc.write_all(&buf).unwrap();
            enc.finish().unwrap();
        } else {
            let mut file = file;
            file.write_all(&buf).unwrap();
        }
    }

    #[test]
    fn test_extract_plain_and_gzip_tar() {
        let temp = TempDir::new().unwrap();
        let plain = temp.path().join("a.TAR");
        let gz = temp.path().join("b.tar.gz");
        write_tar(&plain, &[("MANIFEST.1", b"m")], false);
        write_tar(&gz, &[("sub/file.FIT", b"data")], true);

        let dest = temp.path().join("out");
        extract_tar(&plain, &dest).unwrap();
        extract_tar(&gz, &dest).unwrap();
        assert_eq!(fs::read(dest.join("MANIFEST.1")).unwrap(), b"m");
        assert_eq!(fs::read(dest.join("sub/file.FIT")).unwrap(), b"data");
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let temp = TempDir::new().unwrap();
        let bad = temp.path().join("bad.tar.gz");
        fs::write(&bad, [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();
        let err = extract_tar(&bad, &temp.path().join("out")).unwrap_err();
        assert!(matches!(err, SessionError::Extraction { .. }));
    }

    #[test]
    fn test_gunzip_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("0001_EPN.FIT.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(b"fits payload").unwrap();
        enc.finish().unwrap();

        let out = gunzip_in_place(&path).unwrap();
        assert_eq!(out, temp.path().join("0001_EPN.FIT"));
        assert_eq!(fs::read(&out).unwrap(), b"fits payload");
        assert!(!path.exists());
    }

    fn gzip_member(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gunzip_keeps_every_member() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("0001_EPN.FIT.gz");
        let mut bytes = gzip_member(b"first-");
        bytes.extend(gzip_member(b"second"));
        fs::write(&path, bytes).unwrap();

        let out = gunzip_in_place(&path).unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"first-second");
    }

    #[test]
    fn test_truncated_gzip_leaves_source_only() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("0001_EPN.FIT.gz");
        let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i * 7919 % 251) as u8).collect();
        let bytes = gzip_member(&payload);
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let err = gunzip_in_place(&path).unwrap_err();
        assert!(matches!(err, SessionError::Extraction { .. }));
        assert!(path.exists());
        assert!(!temp.path().join("0001_EPN.FIT").exists());
    }

    #[test]
    fn test_extract_multi_member_tar_gz() {
        let temp = TempDir::new().unwrap();
        let mut tar_bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut tar_bytes);
            let data = b"manifest";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, "MANIFEST.001", &data[..]).unwrap();
            builder.finish().unwrap();
        }
        let split = tar_bytes.len() / 2;
        let mut bytes = gzip_member(&tar_bytes[..split]);
        bytes.extend(gzip_member(&tar_bytes[split..]));
        let archive = temp.path().join("0001.tar.gz");
        fs::write(&archive, bytes).unwrap();

        let dest = temp.path().join("ODF");
        extract_tar(&archive, &dest).unwrap();
        assert_eq!(fs::read(dest.join("MANIFEST.001")).unwrap(), b"manifest");
    }

    #[test]
    fn test_find_files_is_recursive_and_exact() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("x/y")).unwrap();
        fs::write(temp.path().join("x/y/b.gz"), "").unwrap();
        fs::write(temp.path().join("a.gz"), "").unwrap();
        fs::write(temp.path().join("c.gzip"), "").unwrap();
        let found = find_files_with_extension(temp.path(), "gz").unwrap();
        assert_eq!(found, vec![temp.path().join("a.gz"), temp.path().join("x/y/b.gz")]);
    }

    #[test]
    fn test_secondary_archives_land_in_dest() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("obs");
        fs::create_dir_all(root.join("PPS")).unwrap();
        write_tar(&root.join("PPS/0001.TAR"), &[("MANIFEST.9", b"m")], false);

        let odf = root.join("ODF");
        assert_eq!(extract_secondary_archives(&root, &odf).unwrap(), 1);
        assert!(odf.join("MANIFEST.9").exists());
        assert!(!root.join("PPS/0001.TAR").exists());
    }
}
