use crate::{Record, TableChunk, TypeID};
use std::path::PathBuf;
use uuid::Uuid;

pub mod data;
pub mod dv;
pub mod file_storage;

/// An immutable batch of rows. Once serialized and written it is referenced
/// by the log, never edited; a row's position is its 0-based index within
/// the file.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub header: DataFileHeader,
    pub data: TableChunk,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFileHeader {
    rows: u64,
    columns: u64,
    column_types: Vec<TypeID>,
}

impl DataFile {
    /// Number of physical rows, deleted or not.
    pub fn rows(&self) -> u64 {
        self.header.rows
    }

    /// Materialize the row at a file-local position.
    pub fn row(&self, position: u32) -> Record {
        let values = self
            .data
            .iter()
            .map(|column| column[position as usize].clone())
            .collect();
        Record::new(values)
    }
}

/// Identifier of one immutable stored artifact (data file or deletion
/// vector), addressable independently of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle {
    file_uuid: Uuid,
}

#[derive(Debug, Clone)]
pub struct FileBasedStorage {
    base_path: PathBuf,
}
