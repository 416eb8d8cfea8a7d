//! Filesystem-facing primitives: append-only writes, crash-safe full
//! rewrites, and datafile-integrity recovery on load.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};

fn tilde_path(path: &Path) -> std::path::PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push("~");
    std::path::PathBuf::from(s)
}

fn fsync_dir(path: &Path) {
    if let Some(dir) = path.parent() {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        if let Ok(d) = File::open(dir) {
            // Best-effort: some platforms don't support fsync on a directory
            // handle, so a failure here is silently ignored.
            let _ = d.sync_all();
        }
    }
}

/// Appends `data` to `path`, creating it if necessary. No per-append fsync:
/// durability granularity is per-compaction, not per-write.
pub fn append_file(path: &Path, data: &str) -> Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::IoError { op: "append_file.open", source })?;
    f.write_all(data.as_bytes())
        .map_err(|source| Error::IoError { op: "append_file.write", source })?;
    Ok(())
}

/// Writes `data` to `path` with crash-safe visibility barriers: fsync the
/// directory and any existing file, write to `path~`, fsync it, rename over
/// `path`, fsync the directory again.
pub fn crash_safe_write_file(path: &Path, data: &str) -> Result<()> {
    fsync_dir(path);
    if path.exists() {
        if let Ok(f) = File::open(path) {
            let _ = f.sync_all();
        }
    }
    let tmp = tilde_path(path);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|source| Error::IoError { op: "crash_safe_write_file.open_tmp", source })?;
        f.write_all(data.as_bytes())
            .map_err(|source| Error::IoError { op: "crash_safe_write_file.write_tmp", source })?;
        f.sync_all()
            .map_err(|source| Error::IoError { op: "crash_safe_write_file.fsync_tmp", source })?;
    }
    fs::rename(&tmp, path).map_err(|source| Error::IoError {
        op: "crash_safe_write_file.rename",
        source,
    })?;
    fsync_dir(path);
    Ok(())
}

/// Ensures `path` is readable before load: promotes a crash-interrupted
/// `path~` if `path` is absent, or creates an empty datafile.
pub fn ensure_datafile_integrity(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    let tmp = tilde_path(path);
    if tmp.exists() {
        fs::rename(&tmp, path).map_err(|source| Error::IoError {
            op: "ensure_datafile_integrity.rename",
            source,
        })?;
        return Ok(());
    }
    File::create(path).map_err(|source| Error::IoError {
        op: "ensure_datafile_integrity.create",
        source,
    })?;
    Ok(())
}

/// Reads the entire datafile as UTF-8 text. Returns an empty string if the
/// file does not yet exist.
pub fn read_to_string(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(Error::IoError { op: "read_to_string", source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        append_file(&path, "line one\n").unwrap();
        append_file(&path, "line two\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn crash_safe_write_replaces_contents_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        append_file(&path, "stale\n").unwrap();
        crash_safe_write_file(&path, "fresh\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "fresh\n");
        assert!(!tilde_path(&path).exists());
    }

    #[test]
    fn ensure_integrity_promotes_orphaned_tilde_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        let tmp = tilde_path(&path);
        fs::write(&tmp, "recovered\n").unwrap();
        ensure_datafile_integrity(&path).unwrap();
        assert!(path.exists());
        assert!(!tmp.exists());
        assert_eq!(read_to_string(&path).unwrap(), "recovered\n");
    }

    #[test]
    fn ensure_integrity_creates_empty_file_when_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db");
        ensure_datafile_integrity(&path).unwrap();
        assert!(path.exists());
        assert_eq!(read_to_string(&path).unwrap(), "");
    }
}
