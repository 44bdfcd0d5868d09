//! Filesystem helpers shared by the repositories

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use super::error::RepositoryError;

/// Create a directory tree and restrict it to the owner (0700 on Unix)
pub(crate) fn ensure_private_dir(path: &Path) -> Result<(), RepositoryError> {
    fs::create_dir_all(path).map_err(|e| RepositoryError::persistence(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|e| RepositoryError::persistence(path, e))?;
    }

    Ok(())
}

/// Write a file readable only by the owner (0600 on Unix)
///
/// Content goes to a sibling temp file first and is renamed into place, so
/// readers see either the previous or the new content.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<(), RepositoryError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RepositoryError::persistence(path, "path has no file name"))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    write_synced(&tmp_path, contents).map_err(|e| RepositoryError::persistence(&tmp_path, e))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        RepositoryError::persistence(path, e)
    })
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

/// Read a file, mapping "missing" to `None`
pub(crate) fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_private_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("private.key");

        write_private(&path, b"first").unwrap();
        write_private(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert!(!dir.path().join(".private.key.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_private_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("accounts");
        ensure_private_dir(&sub).unwrap();
        let file = sub.join("account.json");
        write_private(&file, b"{}").unwrap();

        let dir_mode = fs::metadata(&sub).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn test_read_optional_missing() {
        let dir = TempDir::new().unwrap();
        assert!(read_optional(&dir.path().join("nope")).unwrap().is_none());
    }
}
