use roaring::RoaringBitmap;

use crate::storage::{FileBasedStorage, FileHandle};
use crate::DatabaseError;

/// Deletion marker for one data file: a bitmap of file-local row positions
/// that are logically removed. The bitmap is immutable once stored; widening
/// the deleted set always produces a new vector that supersedes the old one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeletionVector {
    positions: RoaringBitmap,
}

impl DeletionVector {
    pub fn new() -> Self {
        DeletionVector::default()
    }

    pub fn from_positions<I: IntoIterator<Item = u32>>(positions: I) -> Self {
        DeletionVector {
            positions: positions.into_iter().collect(),
        }
    }

    pub fn contains(&self, position: u32) -> bool {
        self.positions.contains(position)
    }

    pub fn insert(&mut self, position: u32) {
        self.positions.insert(position);
    }

    pub fn cardinality(&self) -> u64 {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// A new vector holding the union of both position sets. Neither input
    /// is touched.
    pub fn union(&self, other: &DeletionVector) -> DeletionVector {
        DeletionVector {
            positions: &self.positions | &other.positions,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.positions.iter()
    }

    /// Highest marked position, if any.
    pub fn max_position(&self) -> Option<u32> {
        self.positions.max()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.positions.serialized_size());
        self.positions
            .serialize_into(&mut bytes)
            .expect("serializing into a Vec cannot fail");
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, DatabaseError> {
        let positions = RoaringBitmap::deserialize_from(bytes)
            .map_err(|_| DatabaseError::CorruptDataFile)?;
        Ok(DeletionVector { positions })
    }
}

/// Store of serialized deletion vectors, side artifacts next to the data
/// files they annotate.
#[derive(Debug, Clone)]
pub struct DeletionVectorStore {
    storage: FileBasedStorage,
}

impl DeletionVectorStore {
    pub fn new(storage: FileBasedStorage) -> Self {
        DeletionVectorStore { storage }
    }

    pub fn write_vector(&self, vector: &DeletionVector) -> Result<FileHandle, DatabaseError> {
        self.storage.write_file(&vector.to_bytes())
    }

    pub fn read_vector(&self, handle: &FileHandle) -> Result<DeletionVector, DatabaseError> {
        DeletionVector::parse(&self.storage.read_bytes(handle)?)
    }

    /// Produce the successor of an existing vector: the union of its
    /// positions and `newly_deleted`, written as a fresh artifact. With no
    /// existing vector this just writes `newly_deleted`.
    pub fn merge_vector(
        &self,
        existing: Option<&FileHandle>,
        newly_deleted: &DeletionVector,
    ) -> Result<(FileHandle, DeletionVector), DatabaseError> {
        let merged = match existing {
            Some(handle) => self.read_vector(handle)?.union(newly_deleted),
            None => newly_deleted.clone(),
        };
        let handle = self.write_vector(&merged)?;
        Ok((handle, merged))
    }
}
