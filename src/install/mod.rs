use std::fs;
use std::io;
use std::path::Path;

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::partial_path;
use crate::error::InstallError;

/// Move the staged tree under `staged` into `destination`, replacing files
/// that already exist there. Relative paths are preserved.
///
/// Stops at the first file that cannot be moved. Files moved before the
/// failure stay in place; the caller must not record the new version.
/// Returns the number of files moved.
pub fn move_tree(staged: &Path, destination: &Path) -> Result<usize, InstallError> {
    fs::create_dir_all(destination).map_err(|err| InstallError::CreateDir {
        path: destination.to_path_buf(),
        source: err,
    })?;

    let mut moved = 0;
    for entry in WalkDir::new(staged).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(staged) else {
            warn!("install: skipping {} outside staging root", entry.path().display());
            continue;
        };
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| InstallError::CreateDir {
                path: target.clone(),
                source: err,
            })?;
            continue;
        }

        move_file(entry.path(), &target).map_err(|err| InstallError::Move {
            from: entry.path().to_path_buf(),
            to: target.clone(),
            source: err,
        })?;
        debug!("install: {} -> {}", relative.display(), target.display());
        moved += 1;
    }

    info!("install: moved {moved} files into {}", destination.display());
    Ok(moved)
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        if to.is_file() {
            fs::remove_file(to)?;
        }
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            // Staging and install dirs may sit on different devices.
            debug!("install: rename failed ({err}); copying {}", from.display());
            let partial = partial_path(to);
            if let Err(err) = fs::copy(from, &partial).and_then(|_| fs::rename(&partial, to)) {
                let _ = fs::remove_file(&partial);
                return Err(err);
            }
            if let Err(err) = fs::remove_file(from) {
                warn!("install: could not remove staged {}: {err}", from.display());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn moves_nested_files_and_overwrites() {
        let staging = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        write(&staging.path().join("bin/app"), "new app");
        write(&staging.path().join("lib/deep/x.so"), "lib");
        write(&install.path().join("bin/app"), "old app");
        write(&install.path().join("keep.txt"), "untouched");

        let moved = move_tree(staging.path(), install.path()).unwrap();

        assert_eq!(moved, 2);
        assert_eq!(fs::read_to_string(install.path().join("bin/app")).unwrap(), "new app");
        assert_eq!(fs::read_to_string(install.path().join("lib/deep/x.so")).unwrap(), "lib");
        assert_eq!(fs::read_to_string(install.path().join("keep.txt")).unwrap(), "untouched");
        assert!(!staging.path().join("bin/app").exists());
    }

    #[test]
    fn creates_missing_install_dir_and_empty_dirs() {
        let staging = TempDir::new().unwrap();
        let root = TempDir::new().unwrap();
        fs::create_dir_all(staging.path().join("logs")).unwrap();
        write(&staging.path().join("a.txt"), "a");
        let install = root.path().join("not/yet/there");

        move_tree(staging.path(), &install).unwrap();

        assert!(install.join("logs").is_dir());
        assert_eq!(fs::read_to_string(install.join("a.txt")).unwrap(), "a");
    }

    #[test]
    fn stops_at_first_failing_file() {
        let staging = TempDir::new().unwrap();
        let install = TempDir::new().unwrap();
        write(&staging.path().join("a.txt"), "a");
        write(&staging.path().join("b.txt"), "b");
        write(&staging.path().join("c.txt"), "c");
        // A non-empty directory in the way cannot be replaced by a file.
        write(&install.path().join("b.txt/occupied"), "dir");

        let err = move_tree(staging.path(), install.path()).unwrap_err();

        assert!(matches!(err, InstallError::Move { ref from, .. } if from.ends_with("b.txt")));
        assert_eq!(fs::read_to_string(install.path().join("a.txt")).unwrap(), "a");
        assert!(!install.path().join("c.txt").exists());
    }
}
