//! Storage directory management.
//!
//! ```text
//! <root>/
//! ├─ LOCK                # Advisory lock for single-writer
//! ├─ message_0           # Block files
//! ├─ message_1
//! ├─ peer_index.v3       # Checkpoint files
//! ├─ group_index.v3
//! ├─ peer_received.v1
//! ├─ group_received.v1
//! └─ index_checkpoint    # Checkpoint meta, written last
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const BLOCK_PREFIX: &str = "message_";

/// Path of block `block` under `root`.
#[must_use]
pub fn block_file_path(root: &Path, block: u32) -> PathBuf {
    root.join(format!("{BLOCK_PREFIX}{block}"))
}

/// Lists the block numbers present under `root`, ascending.
pub fn list_blocks(root: &Path) -> CoreResult<Vec<u32>> {
    let mut blocks = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(number) = name.strip_prefix(BLOCK_PREFIX) else {
            continue;
        };
        let block = number.parse::<u32>().map_err(|_| {
            CoreError::invalid_format(format!("invalid block file name: {name}"))
        })?;
        blocks.push(block);
    }
    blocks.sort_unstable();
    Ok(blocks)
}

/// The storage root, held under an exclusive lock.
#[derive(Debug)]
pub struct StorageDir {
    path: PathBuf,
    _lock_file: File,
}

impl StorageDir {
    /// Opens or creates a storage directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - Another process holds the lock (returns `StorageLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_format(format!(
                    "storage directory does not exist: {}",
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

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StorageLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the storage root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of a block file.
    #[must_use]
    pub fn block_path(&self, block: u32) -> PathBuf {
        block_file_path(&self.path, block)
    }

    /// Lists existing block numbers, ascending.
    pub fn blocks(&self) -> CoreResult<Vec<u32>> {
        list_blocks(&self.path)
    }

    /// Reads a file under the root, `None` if it does not exist.
    pub fn read_file(&self, name: &str) -> CoreResult<Option<Vec<u8>>> {
        match fs::read(self.path.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Replaces a file under the root.
    ///
    /// The data goes to `<name>.tmp`, is synced, then renamed over `name`.
    /// The directory is not synced; call [`sync_directory`](Self::sync_directory)
    /// after the last file of a group.
    pub fn write_file_atomic(&self, name: &str, data: &[u8]) -> CoreResult<()> {
        let target = self.path.join(name);
        let temp = self.path.join(format!("{name}.tmp"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        Ok(())
    }

    /// Removes a file under the root if present.
    pub fn remove_file(&self, name: &str) -> CoreResult<()> {
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Syncs the directory so renames and new files are durable.
    #[cfg(unix)]
    pub fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    /// Syncs the directory so renames and new files are durable.
    #[cfg(not(unix))]
    pub fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("store");

        let dir = StorageDir::open(&root, true).unwrap();
        assert!(root.is_dir());
        assert_eq!(dir.path(), root.as_path());
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        assert!(StorageDir::open(&temp.path().join("missing"), false).is_err());
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let _dir = StorageDir::open(temp.path(), true).unwrap();
        assert!(matches!(
            StorageDir::open(temp.path(), true),
            Err(CoreError::StorageLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(StorageDir::open(temp.path(), true).unwrap());
        assert!(StorageDir::open(temp.path(), true).is_ok());
    }

    #[test]
    fn lists_blocks_in_numeric_order() {
        let temp = tempdir().unwrap();
        let dir = StorageDir::open(temp.path(), true).unwrap();
        for n in [10u32, 2, 0] {
            File::create(dir.block_path(n)).unwrap();
        }
        File::create(temp.path().join("peer_index.v3")).unwrap();
        assert_eq!(dir.blocks().unwrap(), vec![0, 2, 10]);
    }

    #[test]
    fn bad_block_name_is_invalid_format() {
        let temp = tempdir().unwrap();
        File::create(temp.path().join("message_x")).unwrap();
        assert!(matches!(
            list_blocks(temp.path()),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn atomic_write_replaces_file() {
        let temp = tempdir().unwrap();
        let dir = StorageDir::open(temp.path(), true).unwrap();

        assert!(dir.read_file("index_checkpoint").unwrap().is_none());
        dir.write_file_atomic("index_checkpoint", b"one").unwrap();
        dir.write_file_atomic("index_checkpoint", b"two").unwrap();
        dir.sync_directory().unwrap();

        assert_eq!(dir.read_file("index_checkpoint").unwrap().unwrap(), b"two");
        assert!(!temp.path().join("index_checkpoint.tmp").exists());

        dir.remove_file("index_checkpoint").unwrap();
        dir.remove_file("index_checkpoint").unwrap();
        assert!(dir.read_file("index_checkpoint").unwrap().is_none());
    }
}
