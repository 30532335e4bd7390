// Stored Content
// Access to the bytes a syncpoint entry points at, for either store backend

use std::fs;
use std::path::PathBuf;

use super::address::ArchiveAddress;
use super::manager::SyncPointStore;
use super::model::SyncPointEntry;
use crate::error::{Result, SyncError};
use crate::operations::archive;
use crate::operations::FileStamp;
use crate::utilities::{key_to_path, sha256_file, Digest256};

/// Where the bytes of an entry live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredLocation {
    /// Plain file in a directory store
    File(PathBuf),
    /// Entry inside a syncpoint archive
    Archive {
        /// Archive file
        archive: PathBuf,
        /// Parsed address of the entry
        address: ArchiveAddress,
    },
}

/// Resolve where an entry's bytes are stored
pub fn locate(store: &SyncPointStore, entry: &SyncPointEntry) -> Result<StoredLocation> {
    if store.is_compressed() {
        let address = ArchiveAddress::parse(&entry.relative_remote_path)?;
        Ok(StoredLocation::Archive {
            archive: address.archive_path(store.remote_path()),
            address,
        })
    } else {
        Ok(StoredLocation::File(key_to_path(
            store.remote_path(),
            &entry.relative_remote_path,
        )))
    }
}

/// Stamp of the stored copy, `None` when it is missing
pub fn entry_stamp(store: &SyncPointStore, entry: &SyncPointEntry) -> Result<Option<FileStamp>> {
    match locate(store, entry)? {
        StoredLocation::File(path) => FileStamp::of_file(&path),
        StoredLocation::Archive { archive, address } => {
            archive::entry_stamp(&archive, &address.relative_path)
        }
    }
}

/// Digest of the stored copy, `None` when it cannot be read
pub fn entry_digest(store: &SyncPointStore, entry: &SyncPointEntry) -> Result<Option<Digest256>> {
    match locate(store, entry)? {
        StoredLocation::File(path) => Ok(sha256_file(&path).ok()),
        StoredLocation::Archive { archive, address } => {
            archive::entry_digest(&archive, &address.relative_path)
        }
    }
}

/// Full content of the stored copy
pub fn read_entry(store: &SyncPointStore, entry: &SyncPointEntry) -> Result<Vec<u8>> {
    match locate(store, entry)? {
        StoredLocation::File(path) => fs::read(&path).map_err(|e| SyncError::io(&path, e)),
        StoredLocation::Archive { archive, address } => {
            archive::read_entry(&archive, &address.relative_path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntryType, StoreMode};
    use tempfile::TempDir;

    #[test]
    fn test_directory_store_location() {
        let dir = TempDir::new().unwrap();
        let store = SyncPointStore::open(dir.path(), Some(StoreMode::Directory)).unwrap();
        let mut sp = store.add_syncpoint(dir.path(), Some("S1"), None, false).unwrap();
        sp.add_entry("docs/a.txt", "S1/docs/a.txt", EntryType::AddOrChanged);

        let stored = dir.path().join("S1").join("docs").join("a.txt");
        fs::create_dir_all(stored.parent().unwrap()).unwrap();
        fs::write(&stored, "hello").unwrap();

        let entry = &sp.entries[0];
        assert_eq!(locate(&store, entry).unwrap(), StoredLocation::File(stored));
        assert_eq!(read_entry(&store, entry).unwrap(), b"hello");
        assert_eq!(entry_stamp(&store, entry).unwrap().unwrap().size, 5);
        assert!(entry_digest(&store, entry).unwrap().is_some());
    }

    #[test]
    fn test_compressed_store_rejects_plain_paths() {
        let dir = TempDir::new().unwrap();
        let store = SyncPointStore::open(dir.path(), Some(StoreMode::Compressed)).unwrap();
        let entry = SyncPointEntry {
            source_path: "a.txt".into(),
            relative_remote_path: "S1/a.txt".into(),
            entry_type: EntryType::AddOrChanged,
            owning_syncpoint_id: "S1".into(),
        };
        assert!(matches!(locate(&store, &entry), Err(SyncError::InvalidAddress(_))));
    }
}
