use std::collections::{BTreeMap, VecDeque};

use crate::delta::snapshot::Snapshot;
use crate::delta::table::Table;
use crate::delta::version::Version;
use crate::storage::dv::DeletionVector;
use crate::storage::FileHandle;
use crate::{DatabaseError, Record, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    UpdatePreimage,
    UpdatePostimage,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub version: Version,
    pub kind: ChangeKind,
    pub row: Record,
}

/// Derive the change feed between two versions (inclusive). Purely a
/// function of the log, so invoking it again with the same arguments
/// reproduces the same sequence. Versions are emitted in order; within a
/// version, records come in key order with every `update_preimage` directly
/// before its `update_postimage`.
pub fn changes(
    table: &Table,
    from: Version,
    to: Version,
) -> Result<TableChanges<'_>, DatabaseError> {
    if !table.config.change_feed_enabled {
        return Err(DatabaseError::ChangeFeedDisabled);
    }
    let current = table
        .current_version()?
        .ok_or(DatabaseError::CorruptLogEntry(0))?;
    let end = to.min(current);

    // rolling pre-state, advanced version by version
    let state = match from.predecessor() {
        Some(prev) => Some(Snapshot::resolve(table.log(), prev)?),
        None => None,
    };

    Ok(TableChanges {
        table,
        state,
        next_version: from,
        end,
        buffer: VecDeque::new(),
        done: from > end,
    })
}

/// Lazy iterator over change records; each version's batch is derived when
/// the iteration first reaches it.
pub struct TableChanges<'a> {
    table: &'a Table,
    state: Option<Snapshot>,
    next_version: Version,
    end: Version,
    buffer: VecDeque<ChangeRecord>,
    done: bool,
}

impl TableChanges<'_> {
    fn prior_entry(&self, handle: FileHandle) -> Option<&(crate::delta::FileRef, Option<crate::delta::DvRef>)> {
        self.state
            .as_ref()
            .and_then(|s| s.files().iter().find(|(f, _)| f.handle == handle))
    }

    /// Diff one version against the state before it and queue the records.
    ///
    /// Rows that stop being live (newly marked positions of added vectors,
    /// plus the live rows of removed files) and rows that start being live
    /// (rows of added files) are paired by merge key: equal rows on both
    /// sides are a rewrite carry-over and emit nothing, differing rows are
    /// an update pair, one-sided rows are a delete or insert.
    fn fill_version(&mut self) -> Result<(), DatabaseError> {
        let version = self.next_version;
        let record = self.table.log().read_entry(version)?;
        let schema = self.table.schema();

        let mut removed: BTreeMap<Value, Record> = BTreeMap::new();
        let mut added: BTreeMap<Value, Record> = BTreeMap::new();

        for file_ref in &record.removed_files {
            let prior_dv = match self.prior_entry(file_ref.handle) {
                Some((_, dv)) => *dv,
                None => return Err(DatabaseError::CorruptLogEntry(version.number())),
            };
            let file = self.table.read_data_file(file_ref, version)?;
            let vector = match prior_dv {
                Some(dv) => self.table.read_vector(&dv, file_ref.rows, version)?,
                None => DeletionVector::new(),
            };
            for position in 0..file.rows() as u32 {
                if vector.contains(position) {
                    continue;
                }
                let row = file.row(position);
                removed.insert(schema.key_of(&row).clone(), row);
            }
        }

        for dv_ref in &record.added_vectors {
            let (file_ref, prior_dv) = match self.prior_entry(dv_ref.data_file) {
                Some(entry) => *entry,
                None => return Err(DatabaseError::CorruptLogEntry(version.number())),
            };
            let file = self.table.read_data_file(&file_ref, version)?;
            let vector = self.table.read_vector(dv_ref, file_ref.rows, version)?;
            let prior = match prior_dv {
                Some(dv) => self.table.read_vector(&dv, file_ref.rows, version)?,
                None => DeletionVector::new(),
            };
            for position in vector.iter() {
                if prior.contains(position) {
                    continue;
                }
                let row = file.row(position);
                removed.insert(schema.key_of(&row).clone(), row);
            }
        }

        for file_ref in &record.added_files {
            let file = self.table.read_data_file(file_ref, version)?;
            for position in 0..file.rows() as u32 {
                let row = file.row(position);
                added.insert(schema.key_of(&row).clone(), row);
            }
        }

        for (key, old_row) in &removed {
            match added.get(key) {
                Some(new_row) if new_row == old_row => {}
                Some(new_row) => {
                    self.buffer.push_back(ChangeRecord {
                        version,
                        kind: ChangeKind::UpdatePreimage,
                        row: old_row.clone(),
                    });
                    self.buffer.push_back(ChangeRecord {
                        version,
                        kind: ChangeKind::UpdatePostimage,
                        row: new_row.clone(),
                    });
                }
                None => self.buffer.push_back(ChangeRecord {
                    version,
                    kind: ChangeKind::Delete,
                    row: old_row.clone(),
                }),
            }
        }
        for (key, new_row) in &added {
            if !removed.contains_key(key) {
                self.buffer.push_back(ChangeRecord {
                    version,
                    kind: ChangeKind::Insert,
                    row: new_row.clone(),
                });
            }
        }

        match &mut self.state {
            Some(state) => state.apply(&record),
            None => {
                let mut state = Snapshot::empty();
                state.apply(&record);
                self.state = Some(state);
            }
        }
        self.next_version = version.successor();
        Ok(())
    }
}

impl Iterator for TableChanges<'_> {
    type Item = Result<ChangeRecord, DatabaseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.done || self.next_version > self.end {
                self.done = true;
                return None;
            }
            if let Err(e) = self.fill_version() {
                self.done = true;
                return Some(Err(e));
            }
        }
    }
}
