//! Store directory management.
//!
//! A file-backed store is a directory:
//!
//! ```text
//! <store_path>/
//! ├─ MANIFEST.json     # Format version, schema version, schema
//! ├─ LOCK              # Advisory lock
//! └─ commit.log        # Commit log
//! ```
//!
//! Writers hold an exclusive lock on `LOCK`; read-only handles hold a
//! shared one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;

const MANIFEST_FILE: &str = "MANIFEST.json";
const MANIFEST_TEMP: &str = "MANIFEST.json.tmp";
const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "commit.log";
const LOG_TEMP: &str = "commit.log.tmp";

/// An opened, locked store directory.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens (and optionally creates) a store directory and locks it.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the directory is missing and `create_if_missing`
    ///   is false
    /// - `StoreLocked` when another handle holds a conflicting lock
    pub fn open(path: &Path, create_if_missing: bool, read_only: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing && !read_only {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        let locked = if read_only {
            FileExt::try_lock_shared(&lock_file)
        } else {
            FileExt::try_lock_exclusive(&lock_file)
        };
        if locked.is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the commit log.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Path of the manifest.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    /// Whether the directory holds no store yet.
    #[must_use]
    pub fn is_new_store(&self) -> bool {
        !self.manifest_path().exists() && !self.log_path().exists()
    }

    /// Loads the manifest, `None` for a new store.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or a malformed manifest.
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        read_manifest(&self.path)
    }

    /// Saves the manifest with write-then-rename.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        let temp_path = self.path.join(MANIFEST_TEMP);
        let data = manifest.encode()?;
        let mut file = File::create(&temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, self.manifest_path())?;
        self.sync_directory()
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// Reads the manifest of the store at `path` without locking it.
///
/// # Errors
///
/// Fails on I/O errors or a malformed manifest.
pub fn read_manifest(path: &Path) -> CoreResult<Option<Manifest>> {
    let manifest_path = path.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        return Ok(None);
    }
    let data = fs::read(manifest_path)?;
    if data.is_empty() {
        return Ok(None);
    }
    Manifest::decode(&data).map(Some)
}

/// Whether a store exists at `path`.
#[must_use]
pub fn store_exists(path: &Path) -> bool {
    path.join(MANIFEST_FILE).exists() || path.join(LOG_FILE).exists()
}

/// Removes the files of the store at `path`, then the directory if it is
/// left empty.
///
/// # Errors
///
/// Fails on I/O errors other than a missing file.
pub fn delete_store_files(path: &Path) -> CoreResult<()> {
    for name in [MANIFEST_FILE, MANIFEST_TEMP, LOG_FILE, LOG_TEMP, LOCK_FILE] {
        match fs::remove_file(path.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    if path.is_dir() && fs::read_dir(path)?.next().is_none() {
        fs::remove_dir(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchemaDef, Schema};
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("new_store");
        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(path.is_dir());
        assert!(dir.is_new_store());
        assert_eq!(dir.log_path(), path.join("commit.log"));
    }

    #[test]
    fn missing_directory_without_create_fails() {
        let temp = tempdir().unwrap();
        let err = StoreDir::open(&temp.path().join("nope"), false, false).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn exclusive_lock_blocks_second_writer() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("locked");
        let _first = StoreDir::open(&path, true, false).unwrap();
        assert!(matches!(
            StoreDir::open(&path, true, false),
            Err(CoreError::StoreLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("reopen");
        drop(StoreDir::open(&path, true, false).unwrap());
        StoreDir::open(&path, true, false).unwrap();
    }

    #[test]
    fn manifest_and_delete() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("m");
        let dir = StoreDir::open(&path, true, false).unwrap();
        assert!(dir.load_manifest().unwrap().is_none());
        let schema = Schema::new(vec![ObjectSchemaDef::new("T").property("a", "int")]).unwrap();
        dir.save_manifest(&Manifest::new(&schema, 4)).unwrap();
        assert_eq!(read_manifest(&path).unwrap().unwrap().schema_version, 4);
        assert!(store_exists(&path));
        drop(dir);
        delete_store_files(&path).unwrap();
        assert!(!path.exists());
    }
}
