use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use super::log::TransactionLog;
use super::snapshot::Snapshot;
use super::version::Version;
use super::{DvRef, FileRef, Metrics, OperationKind, TableConfig};
use crate::storage::data::checksum;
use crate::storage::dv::{DeletionVector, DeletionVectorStore};
use crate::storage::{DataFile, FileBasedStorage};
use crate::{DatabaseError, Record, TableSchema};

/// Handle to one versioned table rooted at a directory. Carries no shared
/// process state: any number of handles, in this process or another, may
/// point at the same root and coordinate purely through the log.
pub struct Table {
    schema: TableSchema,
    pub config: TableConfig,
    log: TransactionLog,
    storage: FileBasedStorage,
    dv_store: DeletionVectorStore,
    cached: Option<Snapshot>,
}

impl Table {
    /// Create a new table: write the initial row batches as data files (one
    /// file per batch) and commit the CREATE entry as version 0. Merge keys
    /// must be unique across all batches; a duplicate is rejected with
    /// `AmbiguousMatch` before anything is committed. Fails with `Conflict`
    /// if the root already holds a table.
    pub fn create(
        root: &Path,
        schema: TableSchema,
        config: TableConfig,
        initial: Vec<Vec<Record>>,
    ) -> Result<Table, DatabaseError> {
        let mut table = Table::open(root, schema, config)?;

        let mut added = Vec::with_capacity(initial.len());
        let mut keys = BTreeSet::new();
        let mut inserted = 0;
        for batch in &initial {
            for record in batch {
                table.schema.check_record(record)?;
                let key = table.schema.key_of(record);
                if !keys.insert(key.clone()) {
                    return Err(DatabaseError::AmbiguousMatch(key.clone()));
                }
            }
            added.push(table.write_data_file(batch)?);
            inserted += batch.len() as u64;
        }

        table.log.commit(
            None,
            OperationKind::Create,
            added,
            vec![],
            vec![],
            Metrics {
                inserted,
                updated: 0,
                deleted: 0,
            },
        )?;
        Ok(table)
    }

    /// Open a handle to an existing table root.
    pub fn open(
        root: &Path,
        schema: TableSchema,
        config: TableConfig,
    ) -> Result<Table, DatabaseError> {
        let log = TransactionLog::new(root)?;
        let storage = FileBasedStorage::new(root.join("data"));
        let dv_store = DeletionVectorStore::new(FileBasedStorage::new(root.join("dv")));
        Ok(Table {
            schema,
            config,
            log,
            storage,
            dv_store,
            cached: None,
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn dv_store(&self) -> &DeletionVectorStore {
        &self.dv_store
    }

    pub fn current_version(&self) -> Result<Option<Version>, DatabaseError> {
        self.log.current_version()
    }

    /// Write a batch of rows as one new immutable data file and return its
    /// log reference. Provisional until some commit references it.
    pub fn write_data_file(&self, records: &[Record]) -> Result<FileRef, DatabaseError> {
        let bytes = DataFile::from_records(&self.schema, records).to_bytes();
        let handle = self.storage.write_file(&bytes)?;
        Ok(FileRef {
            handle,
            rows: records.len() as u64,
            checksum: checksum(&bytes),
        })
    }

    /// Resolve the snapshot at `version`, or at the newest version for
    /// `None`. The tip snapshot is cached and only the delta of newer log
    /// entries is replayed on refresh.
    pub fn snapshot(&mut self, version: Option<Version>) -> Result<Snapshot, DatabaseError> {
        let current = self
            .log
            .current_version()?
            .ok_or(DatabaseError::CorruptLogEntry(0))?;

        let Some(version) = version else {
            return self.tip_snapshot(current);
        };
        let version = version.min(current);

        if let Some(cached) = &self.cached {
            if cached.version() == version {
                return Ok(cached.clone());
            }
        }
        Snapshot::resolve(&self.log, version)
    }

    fn tip_snapshot(&mut self, current: Version) -> Result<Snapshot, DatabaseError> {
        let snapshot = match self.cached.take() {
            Some(cached) if cached.version() == current => cached,
            Some(mut cached) if cached.version() < current => {
                let delta = self.log.history(cached.version().successor(), current)?;
                for record in &delta {
                    cached.apply(record);
                }
                cached
            }
            _ => Snapshot::resolve(&self.log, current)?,
        };
        self.cached = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Read and verify a data file referenced by the log. A missing file or
    /// checksum mismatch means the log references data that no longer
    /// matches it.
    pub fn read_data_file(&self, file: &FileRef, at: Version) -> Result<DataFile, DatabaseError> {
        let bytes = match self.storage.read_bytes(&file.handle) {
            Ok(bytes) => bytes,
            Err(DatabaseError::IOError(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(DatabaseError::CorruptLogEntry(at.number()))
            }
            Err(e) => return Err(e),
        };
        if checksum(&bytes) != file.checksum {
            return Err(DatabaseError::CorruptLogEntry(at.number()));
        }
        DataFile::parse_bytes(&bytes).map_err(|e| match e {
            DatabaseError::CorruptDataFile | DatabaseError::InvalidUTF8 => {
                DatabaseError::CorruptLogEntry(at.number())
            }
            other => other,
        })
    }

    /// Read and verify a deletion vector referenced by the log. `rows` is
    /// the physical row count of the file the vector annotates; a marked
    /// position at or past it means the vector cannot belong to that file.
    pub fn read_vector(
        &self,
        dv: &DvRef,
        rows: u64,
        at: Version,
    ) -> Result<DeletionVector, DatabaseError> {
        let vector = match self.dv_store.read_vector(&dv.vector) {
            Ok(vector) => vector,
            Err(DatabaseError::IOError(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(DatabaseError::CorruptLogEntry(at.number()))
            }
            Err(DatabaseError::CorruptDataFile) => {
                return Err(DatabaseError::CorruptLogEntry(at.number()))
            }
            Err(e) => return Err(e),
        };
        if vector.cardinality() != dv.cardinality {
            return Err(DatabaseError::CorruptLogEntry(at.number()));
        }
        if vector.max_position().map_or(false, |p| p as u64 >= rows) {
            return Err(DatabaseError::CorruptLogEntry(at.number()));
        }
        Ok(vector)
    }

    /// Materialize every live row at the given version, in file order and
    /// file-local position order.
    pub fn scan(&mut self, version: Option<Version>) -> Result<Vec<Record>, DatabaseError> {
        let snapshot = self.snapshot(version)?;
        let at = snapshot.version();

        let mut rows = Vec::new();
        for (file_ref, dv_ref) in snapshot.files() {
            let file = self.read_data_file(file_ref, at)?;
            let vector = match dv_ref {
                Some(dv) => self.read_vector(dv, file_ref.rows, at)?,
                None => DeletionVector::new(),
            };
            for position in 0..file.rows() as u32 {
                if !vector.contains(position) {
                    rows.push(file.row(position));
                }
            }
        }
        Ok(rows)
    }

    pub fn row_count(&mut self, version: Option<Version>) -> Result<u64, DatabaseError> {
        Ok(self.snapshot(version)?.row_count())
    }
}
