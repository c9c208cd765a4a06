use std::{
    fs::{create_dir_all, OpenOptions},
    io::{BufReader, Read, Seek, Write},
    path::PathBuf,
};

use uuid::Uuid;

use crate::storage::{FileBasedStorage, FileHandle};
use crate::DatabaseError;

impl FileHandle {
    pub fn new(file_uuid: Uuid) -> Self {
        FileHandle { file_uuid }
    }

    pub fn random() -> Self {
        FileHandle {
            file_uuid: Uuid::new_v4(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.file_uuid.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        FileHandle {
            file_uuid: Uuid::from_bytes(bytes),
        }
    }

    /// Relative storage path. The first two hex digits become a directory so
    /// one flat directory never holds every file of a large table.
    pub fn to_rel_path(&self) -> String {
        let mut file = self.file_uuid.simple().to_string();
        file.insert(2, '/');
        file.push_str(".bin");

        file
    }
}

impl FileBasedStorage {
    pub fn new(base_path: PathBuf) -> Self {
        FileBasedStorage { base_path }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn full_path(&self, file: &FileHandle) -> PathBuf {
        let mut path = PathBuf::from(&self.base_path);
        path.push(file.to_rel_path());
        path
    }

    pub fn read_file(&self, file: &FileHandle) -> Result<impl Read + Seek, DatabaseError> {
        let file = OpenOptions::new().read(true).open(self.full_path(file))?;
        Ok(BufReader::new(file))
    }

    /// Read the complete raw bytes of a stored file, e.g. to verify its
    /// checksum against the reference recorded in the log.
    pub fn read_bytes(&self, file: &FileHandle) -> Result<Vec<u8>, DatabaseError> {
        let mut reader = self.read_file(file)?;
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Write a new immutable file under a fresh handle. `create_new` makes
    /// sure an existing file can never be overwritten through this path.
    pub fn write_file(&self, data: &[u8]) -> Result<FileHandle, DatabaseError> {
        let file_handle = FileHandle::random();

        let path = self.full_path(&file_handle);
        create_dir_all(path.parent().ok_or(DatabaseError::CorruptDataFile)?)?;

        let mut file = OpenOptions::new().create_new(true).write(true).open(path)?;
        file.write_all(data)?;
        file.flush()?;

        Ok(file_handle)
    }
}

impl Default for FileBasedStorage {
    fn default() -> Self {
        FileBasedStorage {
            base_path: PathBuf::from("./target/dvtable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::FileBasedStorage;
    use crate::DatabaseError;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn test_storage() -> FileBasedStorage {
        let path = PathBuf::from("./target/dvtable-tests")
            .join("file_storage")
            .join(Uuid::new_v4().simple().to_string());
        FileBasedStorage::new(path)
    }

    #[test]
    fn test_write_then_read() -> Result<(), DatabaseError> {
        let storage = test_storage();

        let handle = storage.write_file(b"some immutable bytes")?;
        let bytes = storage.read_bytes(&handle)?;

        assert_eq!(bytes, b"some immutable bytes");
        Ok(())
    }

    #[test]
    fn test_distinct_handles() -> Result<(), DatabaseError> {
        let storage = test_storage();

        let first = storage.write_file(b"a")?;
        let second = storage.write_file(b"a")?;

        assert_ne!(first, second);
        assert_eq!(storage.read_bytes(&first)?, storage.read_bytes(&second)?);
        Ok(())
    }

    #[test]
    fn test_read_missing_file() {
        let storage = test_storage();
        let handle = crate::storage::FileHandle::random();

        assert!(matches!(
            storage.read_bytes(&handle),
            Err(DatabaseError::IOError(_))
        ));
    }
}
