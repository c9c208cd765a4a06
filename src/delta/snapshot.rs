use super::log::TransactionLog;
use super::version::Version;
use super::{DvRef, FileRef, VersionRecord};
use crate::DatabaseError;

/// The resolved state of a table at one version: every active data file
/// paired with its active deletion vector, if any. Derived from the log,
/// never stored; replaying the same range always reproduces the same set.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    version: Version,
    active: Vec<(FileRef, Option<DvRef>)>,
}

impl Snapshot {
    /// The state before any version exists: nothing active. Only meaningful
    /// as a base for [`Snapshot::apply`].
    pub(crate) fn empty() -> Self {
        Snapshot {
            version: Version::new(0),
            active: Vec::new(),
        }
    }

    /// Replay the log from version 0 up to and including `version`.
    pub fn resolve(log: &TransactionLog, version: Version) -> Result<Self, DatabaseError> {
        let records = log.history(Version::new(0), version)?;

        let mut snapshot = Snapshot::empty();
        for record in &records {
            snapshot.apply(record);
        }
        Ok(snapshot)
    }

    /// Apply one more version record on top of this snapshot. Removes evict
    /// files, adds insert fresh files, and an added vector supersedes the
    /// file's previous vector.
    pub fn apply(&mut self, record: &VersionRecord) {
        self.version = record.version;

        self.active
            .retain(|(file, _)| !record.removed_files.iter().any(|r| r.handle == file.handle));

        for added in &record.added_files {
            self.active.push((*added, None));
        }

        for dv in &record.added_vectors {
            if let Some(entry) = self
                .active
                .iter_mut()
                .find(|(file, _)| file.handle == dv.data_file)
            {
                entry.1 = Some(*dv);
            }
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn files(&self) -> &[(FileRef, Option<DvRef>)] {
        self.active.as_slice()
    }

    /// Logical rows: physical rows of every active file minus the positions
    /// its active vector marks deleted.
    pub fn row_count(&self) -> u64 {
        self.active
            .iter()
            .map(|(file, dv)| file.rows - dv.map_or(0, |d| d.cardinality))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use crate::delta::log::TransactionLog;
    use crate::delta::snapshot::Snapshot;
    use crate::delta::version::Version;
    use crate::delta::{DvRef, FileRef, Metrics, OperationKind};
    use crate::storage::FileHandle;
    use crate::DatabaseError;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn test_log() -> Result<TransactionLog, DatabaseError> {
        let root = PathBuf::from("./target/dvtable-tests")
            .join("snapshot")
            .join(Uuid::new_v4().simple().to_string());
        TransactionLog::new(&root)
    }

    fn file_ref(rows: u64) -> FileRef {
        FileRef {
            handle: FileHandle::random(),
            rows,
            checksum: 0,
        }
    }

    #[test]
    fn test_resolve_replay() -> Result<(), DatabaseError> {
        let log = test_log()?;
        let f1 = file_ref(100);
        let f2 = file_ref(50);
        let f3 = file_ref(10);

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![f1, f2],
            vec![],
            vec![],
            Metrics::default(),
        )?;

        // attach a vector to f1, add f3
        let dv = DvRef {
            data_file: f1.handle,
            vector: FileHandle::random(),
            cardinality: 30,
        };
        let v1 = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![f3],
            vec![],
            vec![dv],
            Metrics::default(),
        )?;

        // remove f2
        let v2 = log.commit(
            Some(v1),
            OperationKind::Merge,
            vec![],
            vec![f2],
            vec![],
            Metrics::default(),
        )?;

        let s0 = Snapshot::resolve(&log, v0)?;
        assert_eq!(s0.files(), &[(f1, None), (f2, None)]);
        assert_eq!(s0.row_count(), 150);

        let s1 = Snapshot::resolve(&log, v1)?;
        assert_eq!(s1.files(), &[(f1, Some(dv)), (f2, None), (f3, None)]);
        assert_eq!(s1.row_count(), 100 - 30 + 50 + 10);

        let s2 = Snapshot::resolve(&log, v2)?;
        assert_eq!(s2.files(), &[(f1, Some(dv)), (f3, None)]);
        assert_eq!(s2.row_count(), 100 - 30 + 10);

        Ok(())
    }

    #[test]
    fn test_replay_is_idempotent() -> Result<(), DatabaseError> {
        let log = test_log()?;
        let f1 = file_ref(20);
        let f2 = file_ref(20);

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![f1],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        let v1 = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![f2],
            vec![f1],
            vec![],
            Metrics::default(),
        )?;

        assert_eq!(Snapshot::resolve(&log, v1)?, Snapshot::resolve(&log, v1)?);
        Ok(())
    }

    #[test]
    fn test_newer_vector_supersedes() -> Result<(), DatabaseError> {
        let log = test_log()?;
        let f1 = file_ref(100);

        let dv_old = DvRef {
            data_file: f1.handle,
            vector: FileHandle::random(),
            cardinality: 5,
        };
        let dv_new = DvRef {
            data_file: f1.handle,
            vector: FileHandle::random(),
            cardinality: 12,
        };

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![f1],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        let v1 = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![dv_old],
            Metrics::default(),
        )?;
        let v2 = log.commit(
            Some(v1),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![dv_new],
            Metrics::default(),
        )?;

        // exactly one vector is active per file
        let snapshot = Snapshot::resolve(&log, v2)?;
        assert_eq!(snapshot.files(), &[(f1, Some(dv_new))]);
        assert_eq!(snapshot.row_count(), 88);
        Ok(())
    }

    #[test]
    fn test_snapshot_equivalence_against_history() -> Result<(), DatabaseError> {
        // row_count computed by the snapshot matches the same sum computed
        // independently from the raw version history
        let log = test_log()?;
        let f1 = file_ref(40);
        let f2 = file_ref(60);
        let dv = DvRef {
            data_file: f2.handle,
            vector: FileHandle::random(),
            cardinality: 25,
        };

        let v0 = log.commit(
            None,
            OperationKind::Create,
            vec![f1, f2],
            vec![],
            vec![],
            Metrics::default(),
        )?;
        let v1 = log.commit(
            Some(v0),
            OperationKind::Merge,
            vec![],
            vec![],
            vec![dv],
            Metrics::default(),
        )?;

        let snapshot = Snapshot::resolve(&log, v1)?;

        let mut independent: i64 = 0;
        for record in log.history(Version::new(0), v1)? {
            for file in &record.added_files {
                independent += file.rows as i64;
            }
            for file in &record.removed_files {
                independent -= file.rows as i64;
            }
            for vector in &record.added_vectors {
                independent -= vector.cardinality as i64;
            }
        }
        assert_eq!(snapshot.row_count() as i64, independent);
        Ok(())
    }
}
