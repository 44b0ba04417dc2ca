use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use sha2::{Digest, Sha256};
use zip::read::ZipArchive;

use crate::error::ExtractionError;

/// Compare the SHA-256 of `bytes` with a hex digest (case-insensitive).
pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<(), ExtractionError> {
    let actual = format!("{:x}", Sha256::digest(bytes));
    let expected = expected.trim().to_lowercase();
    if actual != expected {
        return Err(ExtractionError::ChecksumMismatch { expected, actual });
    }
    debug!("archive: checksum {actual} verified");
    Ok(())
}

/// Unpack a zip archive held in memory into `destination`, which must exist.
///
/// Every entry name is checked before anything is written; an entry that
/// would land outside `destination` rejects the whole archive. Each file is
/// written to a hidden sibling and renamed into place, so a failure never
/// leaves a half-written file under its final name. Returns the number of
/// files written.
pub fn extract(archive_bytes: &[u8], destination: &Path) -> Result<usize, ExtractionError> {
    if !destination.is_dir() {
        return Err(ExtractionError::MissingDestination(destination.to_path_buf()));
    }
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
    let targets = plan_entries(&mut archive)?;

    let mut written = 0;
    for (index, relative) in targets.into_iter().enumerate() {
        let mut entry = archive.by_index(index)?;
        let out_path = destination.join(&relative);
        if entry.is_dir() {
            create_dir(&out_path)?;
            continue;
        }
        // Archives may omit directory entries; create the parents regardless.
        if let Some(parent) = out_path.parent() {
            create_dir(parent)?;
        }
        let mode = entry.unix_mode();
        write_atomically(&mut entry, &out_path, mode)?;
        written += 1;
    }
    info!(
        "archive: extracted {written} files into {}",
        destination.display()
    );
    Ok(written)
}

fn plan_entries<R>(archive: &mut ZipArchive<R>) -> Result<Vec<PathBuf>, ExtractionError>
where
    R: io::Read + io::Seek,
{
    let mut targets = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let relative = entry
            .enclosed_name()
            .map(PathBuf::from)
            .ok_or_else(|| ExtractionError::PathTraversal {
                entry: entry.name().to_owned(),
            })?;
        targets.push(relative);
    }
    Ok(targets)
}

fn create_dir(path: &Path) -> Result<(), ExtractionError> {
    fs::create_dir_all(path).map_err(|source| ExtractionError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write_atomically(
    reader: &mut impl io::Read,
    out_path: &Path,
    mode: Option<u32>,
) -> Result<(), ExtractionError> {
    let partial = partial_path(out_path);
    copy_then_rename(reader, &partial, out_path, mode).map_err(|source| {
        let _ = fs::remove_file(&partial);
        ExtractionError::Io {
            path: out_path.to_path_buf(),
            source,
        }
    })
}

fn copy_then_rename(
    reader: &mut impl io::Read,
    partial: &Path,
    out_path: &Path,
    mode: Option<u32>,
) -> io::Result<()> {
    let mut file = fs::File::create(partial)?;
    io::copy(reader, &mut file)?;
    file.flush()?;
    #[cfg(unix)]
    {
        if let Some(mode) = mode {
            use std::os::unix::fs::PermissionsExt;
            // setuid, setgid and sticky bits are never restored.
            file.set_permissions(fs::Permissions::from_mode(mode & 0o777))?;
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    drop(file);
    fs::rename(partial, out_path)
}

/// Hidden sibling used while a file is being written.
pub(crate) fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.partial"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;
    use zip::write::{SimpleFileOptions, ZipWriter};

    /// Build an in-memory zip. Names ending in `/` become directory entries.
    pub(crate) fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o755);
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn recreates_nested_tree() {
        let dest = TempDir::new().unwrap();
        let zip = build_zip(&[
            ("bin/", ""),
            ("bin/app", "binary"),
            ("README.md", "hello"),
            ("empty/", ""),
        ]);

        let written = extract(&zip, dest.path()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(fs::read(dest.path().join("bin/app")).unwrap(), b"binary");
        assert_eq!(fs::read(dest.path().join("README.md")).unwrap(), b"hello");
        assert!(dest.path().join("empty").is_dir());
    }

    #[test]
    fn creates_implied_directories() {
        let dest = TempDir::new().unwrap();
        let zip = build_zip(&[("a/b/c/deep.txt", "deep")]);

        extract(&zip, dest.path()).unwrap();
        assert!(dest.path().join("a/b").is_dir());
        assert_eq!(fs::read(dest.path().join("a/b/c/deep.txt")).unwrap(), b"deep");
    }

    #[test]
    fn rejects_traversal_before_writing_anything() {
        let dest = TempDir::new().unwrap();
        let inner = dest.path().join("inner");
        fs::create_dir(&inner).unwrap();
        let zip = build_zip(&[("ok.txt", "fine"), ("../evil.txt", "pwned")]);

        let err = extract(&zip, &inner).unwrap_err();
        assert!(matches!(err, ExtractionError::PathTraversal { ref entry } if entry == "../evil.txt"));
        assert!(!dest.path().join("evil.txt").exists());
        assert!(!inner.join("ok.txt").exists());
    }

    #[test]
    fn malformed_archive_is_rejected() {
        let dest = TempDir::new().unwrap();
        let err = extract(b"definitely not a zip file", dest.path()).unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }

    #[test]
    fn destination_must_exist() {
        let dest = TempDir::new().unwrap();
        let zip = build_zip(&[("a.txt", "a")]);
        let err = extract(&zip, &dest.path().join("missing")).unwrap_err();
        assert!(matches!(err, ExtractionError::MissingDestination(_)));
    }

    #[test]
    fn leaves_no_partial_files_behind() {
        let dest = TempDir::new().unwrap();
        let zip = build_zip(&[("x/one.txt", "1"), ("two.txt", "2")]);
        extract(&zip, dest.path()).unwrap();

        let partials = walkdir::WalkDir::new(dest.path())
            .into_iter()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(partials, 0);
    }

    #[cfg(unix)]
    #[test]
    fn drops_special_permission_bits() {
        use std::os::unix::fs::PermissionsExt;

        let dest = TempDir::new().unwrap();
        let mut zip = build_zip(&[("bin/tool", "#!/bin/sh")]);
        // The writer masks modes to 0o777, so patch the central directory
        // external attributes of the only entry to a setuid regular file.
        let header = zip.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        zip[header + 38..header + 42].copy_from_slice(&(0o104755u32 << 16).to_le_bytes());
        extract(&zip, dest.path()).unwrap();

        let mode = fs::metadata(dest.path().join("bin/tool"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o7777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn copy_then_rename_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dest = TempDir::new().unwrap();
        let out_path = dest.path().join("run.sh");
        let partial = partial_path(&out_path);
        copy_then_rename(&mut &b"echo"[..], &partial, &out_path, Some(0o100750)).unwrap();

        let mode = fs::metadata(&out_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o750);
        assert!(!partial.exists());
    }

    #[test]
    fn checksum_matches_known_digest() {
        // sha256("abc")
        let digest = "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD";
        verify_sha256(b"abc", digest).unwrap();
        let err = verify_sha256(b"abd", digest).unwrap_err();
        assert!(matches!(err, ExtractionError::ChecksumMismatch { .. }));
    }

    #[test]
    fn partial_path_is_hidden_sibling() {
        assert_eq!(
            partial_path(Path::new("/tmp/x/app.bin")),
            PathBuf::from("/tmp/x/.app.bin.partial")
        );
    }
}
