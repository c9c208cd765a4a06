use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use super::version::Version;
use super::{DvRef, FileRef, Metrics, OperationKind, VersionRecord};
use crate::storage::data::{checksum, ByteReader};
use crate::storage::FileHandle;
use crate::DatabaseError;

/// Append-only, strictly ordered log of version records. Each version lives
/// in its own numbered file under `_log/`; claiming the next number is the
/// single serialization point between writers.
#[derive(Debug, Clone)]
pub struct TransactionLog {
    log_dir: PathBuf,
}

const ENTRY_MAGIC: [u8; 4] = [0x44, 0x56, 0x4c, 0x47];

impl TransactionLog {
    pub fn new(table_root: &Path) -> Result<Self, DatabaseError> {
        let log_dir = table_root.join("_log");
        fs::create_dir_all(&log_dir)?;
        Ok(TransactionLog { log_dir })
    }

    fn entry_path(&self, version: Version) -> PathBuf {
        self.log_dir.join(format!("{:020}.log", version.number()))
    }

    /// Highest committed version, or `None` for a log with no entries yet.
    pub fn current_version(&self) -> Result<Option<Version>, DatabaseError> {
        let mut newest: Option<u64> = None;
        for entry in fs::read_dir(&self.log_dir)? {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".log")) else {
                continue;
            };
            if let Ok(number) = stem.parse::<u64>() {
                newest = Some(newest.map_or(number, |n| n.max(number)));
            }
        }
        Ok(newest.map(Version::new))
    }

    /// Commit a new version on top of `base`. Accepted only if `base` still
    /// is the newest version; a racing writer that claimed the slot first
    /// turns this commit into a `Conflict`.
    ///
    /// The entry is staged to a temp file and then hard-linked into its
    /// numbered slot: readers either see the complete entry or none, and two
    /// writers can never both claim the same version.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &self,
        base: Option<Version>,
        operation: OperationKind,
        added_files: Vec<FileRef>,
        removed_files: Vec<FileRef>,
        added_vectors: Vec<DvRef>,
        metrics: Metrics,
    ) -> Result<Version, DatabaseError> {
        if base != self.current_version()? {
            return Err(DatabaseError::Conflict);
        }
        let version = base.map_or(Version::new(0), |v| v.successor());

        let record = VersionRecord {
            version,
            timestamp_ms: timestamp_ms(),
            operation,
            added_files,
            removed_files,
            added_vectors,
            metrics,
        };

        let staged = self
            .log_dir
            .join(format!("{}.tmp", Uuid::new_v4().simple()));
        fs::write(&staged, record.to_bytes())?;

        let result = match fs::hard_link(&staged, self.entry_path(version)) {
            Ok(()) => Ok(version),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(DatabaseError::Conflict),
            Err(e) => Err(e.into()),
        };
        let _ = fs::remove_file(&staged);

        result
    }

    pub fn read_entry(&self, version: Version) -> Result<VersionRecord, DatabaseError> {
        let bytes = fs::read(self.entry_path(version)).map_err(|e| match e.kind() {
            ErrorKind::NotFound => DatabaseError::CorruptLogEntry(version.number()),
            _ => DatabaseError::IOError(e),
        })?;
        VersionRecord::parse(&bytes, version)
    }

    /// The ordered slice of version records `from..=to`, with `to` clamped
    /// to the newest committed version.
    pub fn history(
        &self,
        from: Version,
        to: Version,
    ) -> Result<Vec<VersionRecord>, DatabaseError> {
        let Some(current) = self.current_version()? else {
            return Ok(Vec::new());
        };
        let to = to.min(current);

        let mut records = Vec::new();
        let mut version = from;
        while version <= to {
            records.push(self.read_entry(version)?);
            version = version.successor();
        }
        Ok(records)
    }
}

fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl VersionRecord {
    /// Serialize as magic, crc over the payload, then the payload fields in
    /// little endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload: Vec<u8> = vec![];

        payload.extend(self.version.number().to_le_bytes());
        payload.extend(self.timestamp_ms.to_le_bytes());
        payload.extend(operation_code(self.operation).to_le_bytes());
        payload.extend(self.metrics.inserted.to_le_bytes());
        payload.extend(self.metrics.updated.to_le_bytes());
        payload.extend(self.metrics.deleted.to_le_bytes());

        payload.extend((self.added_files.len() as u64).to_le_bytes());
        payload.extend((self.removed_files.len() as u64).to_le_bytes());
        payload.extend((self.added_vectors.len() as u64).to_le_bytes());

        for file in self.added_files.iter().chain(self.removed_files.iter()) {
            payload.extend(file.handle.as_bytes());
            payload.extend(file.rows.to_le_bytes());
            payload.extend(file.checksum.to_le_bytes());
        }
        for dv in &self.added_vectors {
            payload.extend(dv.data_file.as_bytes());
            payload.extend(dv.vector.as_bytes());
            payload.extend(dv.cardinality.to_le_bytes());
        }

        let mut result = Vec::with_capacity(payload.len() + 8);
        result.extend(ENTRY_MAGIC);
        result.extend(checksum(&payload).to_le_bytes());
        result.extend(payload);
        result
    }

    pub fn parse(bytes: &[u8], expected: Version) -> Result<Self, DatabaseError> {
        let corrupt = || DatabaseError::CorruptLogEntry(expected.number());

        let mut reader = ByteReader::new(bytes);
        if reader.take(4).map_err(|_| corrupt())? != ENTRY_MAGIC {
            return Err(corrupt());
        }
        let crc = reader.read_u32().map_err(|_| corrupt())?;
        if crc != checksum(&bytes[8..]) {
            return Err(corrupt());
        }

        let read_u64 = |reader: &mut ByteReader| reader.read_u64().map_err(|_| corrupt());

        let version = Version::new(read_u64(&mut reader)?);
        if version != expected {
            return Err(corrupt());
        }
        let timestamp_ms = read_u64(&mut reader)?;
        let operation = parse_operation(read_u64(&mut reader)?).ok_or_else(corrupt)?;
        let metrics = Metrics {
            inserted: read_u64(&mut reader)?,
            updated: read_u64(&mut reader)?,
            deleted: read_u64(&mut reader)?,
        };

        let added_count = read_u64(&mut reader)?;
        let removed_count = read_u64(&mut reader)?;
        let vector_count = read_u64(&mut reader)?;

        let read_file_ref = |reader: &mut ByteReader| -> Result<FileRef, DatabaseError> {
            let uuid: [u8; 16] = reader
                .take(16)
                .map_err(|_| corrupt())?
                .try_into()
                .map_err(|_| corrupt())?;
            Ok(FileRef {
                handle: FileHandle::from_bytes(uuid),
                rows: reader.read_u64().map_err(|_| corrupt())?,
                checksum: reader.read_u32().map_err(|_| corrupt())?,
            })
        };

        let mut added_files = Vec::with_capacity(added_count as usize);
        for _ in 0..added_count {
            added_files.push(read_file_ref(&mut reader)?);
        }
        let mut removed_files = Vec::with_capacity(removed_count as usize);
        for _ in 0..removed_count {
            removed_files.push(read_file_ref(&mut reader)?);
        }

        let mut added_vectors = Vec::with_capacity(vector_count as usize);
        for _ in 0..vector_count {
            let data_file: [u8; 16] = reader
                .take(16)
                .map_err(|_| corrupt())?
                .try_into()
                .map_err(|_| corrupt())?;
            let vector: [u8; 16] = reader
                .take(16)
                .map_err(|_| corrupt())?
                .try_into()
                .map_err(|_| corrupt())?;
            added_vectors.push(DvRef {
                data_file: FileHandle::from_bytes(data_file),
                vector: FileHandle::from_bytes(vector),
                cardinality: reader.read_u64().map_err(|_| corrupt())?,
            });
        }

        Ok(VersionRecord {
            version,
            timestamp_ms,
            operation,
            added_files,
            removed_files,
            added_vectors,
            metrics,
        })
    }
}

fn operation_code(operation: OperationKind) -> u64 {
    match operation {
        OperationKind::Create => 0,
        OperationKind::Merge => 1,
        OperationKind::Compact => 2,
    }
}

fn parse_operation(code: u64) -> Option<OperationKind> {
    match code {
        0 => Some(OperationKind::Create),
        1 => Some(OperationKind::Merge),
        2 => Some(OperationKind::Compact),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crate::delta::log::TransactionLog;
    use crate::delta::version::Version;
    use crate::delta::{DvRef, FileRef, Metrics, OperationKind, VersionRecord};
    use crate::storage::FileHandle;
    use crate::DatabaseError;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn test_root() -> PathBuf {
        PathBuf::from("./target/dvtable-tests")
            .join("log")
            .join(Uuid::new_v4().simple().to_string())
    }

    fn file_ref() -> FileRef {
        FileRef {
            handle: FileHandle::random(),
            rows: 100,
            checksum: 0xabcd,
        }
    }

    #[test]
    fn test_commit_sequence() -> Result<(), DatabaseError> {
        let log = TransactionLog::new(&test_root())?;
        assert_eq!(log.current_version()?, None);

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![file_ref()],
            vec![],
            vec![],
            Metrics {
                inserted: 100,
                updated: 0,
                deleted: 0,
            },
        )?;
        assert_eq!(v0, Version::new(0));

        let v1 = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![file_ref()],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        assert_eq!(v1, Version::new(1));
        assert_eq!(log.current_version()?, Some(v1));

        Ok(())
    }

    #[test]
    fn test_stale_base_conflicts() -> Result<(), DatabaseError> {
        let log = TransactionLog::new(&test_root())?;
        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;

        // base v0 is stale now
        let result = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        );
        assert!(matches!(result, Err(DatabaseError::Conflict)));
        Ok(())
    }

    #[test]
    fn test_two_writers_one_wins() -> Result<(), DatabaseError> {
        // Two log handles over the same directory race for version 1.
        let root = test_root();
        let first = TransactionLog::new(&root)?;
        let second = TransactionLog::new(&root)?;

        let v0 = first.commit(
            None,
            OperationKind::Create,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;

        let won = first.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        assert_eq!(won, Version::new(1));

        let lost = second.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        );
        assert!(matches!(lost, Err(DatabaseError::Conflict)));

        // the loser re-resolves and lands on version 2
        let retried = second.commit(
            Some(Version::new(1)),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        assert_eq!(retried, Version::new(2));
        Ok(())
    }

    #[test]
    fn test_history_roundtrip() -> Result<(), DatabaseError> {
        let log = TransactionLog::new(&test_root())?;
        let added = file_ref();
        let removed = file_ref();
        let dv = DvRef {
            data_file: FileHandle::random(),
            vector: FileHandle::random(),
            cardinality: 17,
        };

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![added],
            vec![],
            vec![],
            Metrics {
                inserted: 100,
                updated: 0,
                deleted: 0,
            },
        )?;
        log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![added],
            vec![removed],
            vec![dv],
            Metrics {
                inserted: 1,
                updated: 2,
                deleted: 3,
            },
        )?;

        let history = log.history(Version::new(0), Version::new(10))?;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].operation, OperationKind::Create);
        assert_eq!(history[1].added_files, vec![added]);
        assert_eq!(history[1].removed_files, vec![removed]);
        assert_eq!(history[1].added_vectors, vec![dv]);
        assert_eq!(history[1].metrics.deleted, 3);

        let partial = log.history(Version::new(1), Version::new(1))?;
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].version, Version::new(1));
        Ok(())
    }

    #[test]
    fn test_missing_entry_is_corrupt() -> Result<(), DatabaseError> {
        let root = test_root();
        let log = TransactionLog::new(&root)?;
        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![],
            Metrics::default(),
        )?;

        std::fs::remove_file(root.join("_log").join(format!("{:020}.log", 0)))?;

        assert!(matches!(
            log.history(Version::new(0), Version::new(1)),
            Err(DatabaseError::CorruptLogEntry(0))
        ));
        Ok(())
    }

    #[test]
    fn test_damaged_entry_is_corrupt() -> Result<(), DatabaseError> {
        let record = VersionRecord {
            version: Version::new(3),
            timestamp_ms: 12345,
            operation: OperationKind::Merge,
            added_files: vec![file_ref()],
            removed_files: vec![],
            added_vectors: vec![],
            metrics: Metrics::default(),
        };

        let mut bytes = record.to_bytes();
        let parsed = VersionRecord::parse(&bytes, Version::new(3))?;
        assert_eq!(parsed, record);

        // flip a payload byte, the crc catches it
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            VersionRecord::parse(&bytes, Version::new(3)),
            Err(DatabaseError::CorruptLogEntry(3))
        ));
        Ok(())
    }
}
