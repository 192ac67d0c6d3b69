//! Filesystem helpers for generated configuration files.
//!
//! Every file ms-util owns is replaced atomically, and a previous version
//! that differs from the new content is copied aside with a timestamp
//! suffix first. There is no rollback; the backups are for the operator.

use crate::error::Result;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Suffix format for backups: `<file>.bak.20260101-120000`.
const BACKUP_TIMESTAMP: &str = "%Y%m%d-%H%M%S";

/// Path a backup of `path` taken now would get.
pub fn backup_path(path: &Path) -> PathBuf {
    let stamp = chrono::Local::now().format(BACKUP_TIMESTAMP);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".bak.{}", stamp));
    path.with_file_name(name)
}

/// Copy `path` aside unless it is missing or already holds `new_content`.
///
/// Returns the backup location when a copy was made.
pub fn backup_if_changed(path: &Path, new_content: &str) -> Result<Option<PathBuf>> {
    match fs::read(path) {
        Ok(existing) if existing == new_content.as_bytes() => Ok(None),
        Ok(_) => {
            let backup = backup_path(path);
            fs::copy(path, &backup)?;
            Ok(Some(backup))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut staging = path.as_os_str().to_os_string();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    {
        let mut file = fs::File::create(&staging)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::set_permissions(&staging, fs::Permissions::from_mode(mode))?;
    fs::rename(&staging, path)?;
    Ok(())
}

/// Remove `path` after copying it aside. Missing files are not an error.
///
/// Returns the backup location when the file existed.
pub fn remove_with_backup(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let backup = backup_path(path);
    fs::copy(path, &backup)?;
    fs::remove_file(path)?;
    Ok(Some(backup))
}

/// True when `path` is a regular file with any execute bit set.
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Quote `value` for safe interpolation into a POSIX shell script.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | '@' | '%' | '+' | ','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.conf");
        write_atomic(&path, b"hello\n", 0o600).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_backup_only_when_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        assert!(backup_if_changed(&path, "x").unwrap().is_none());

        fs::write(&path, "same").unwrap();
        assert!(backup_if_changed(&path, "same").unwrap().is_none());

        let backup = backup_if_changed(&path, "different").unwrap().unwrap();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "same");
        assert!(backup.file_name().unwrap().to_string_lossy().starts_with("file.bak."));
    }

    #[test]
    fn test_remove_with_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("override.conf");
        assert!(remove_with_backup(&path).unwrap().is_none());

        fs::write(&path, "[Service]\n").unwrap();
        let backup = remove_with_backup(&path).unwrap().unwrap();
        assert!(!path.exists());
        assert!(backup.exists());
    }

    #[test]
    fn test_is_executable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.sh");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        assert!(!is_executable(&path));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(is_executable(&path));
        assert!(!is_executable(dir.path()));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/usr/bin/chromium"), "/usr/bin/chromium");
        assert_eq!(shell_quote("https://example.com/a?b=1"), "'https://example.com/a?b=1'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote(""), "''");
    }
}
