use std::collections::BTreeMap;
use std::thread::sleep;

use super::{MergeEngine, MergeSpec};
use crate::delta::snapshot::Snapshot;
use crate::delta::table::Table;
use crate::delta::version::Version;
use crate::delta::{DvRef, FileRef, Metrics, OperationKind};
use crate::storage::dv::DeletionVector;
use crate::{DatabaseError, Record, Value};

// Per-file outcome of planning: positions to delete outright and positions
// to replace, with the post-image keyed by position. Positions are relative
// to the file at the plan's base version.
struct FilePlan {
    file: FileRef,
    dv: Option<DvRef>,
    deleted: DeletionVector,
    updated: BTreeMap<u32, Record>,
}

struct MergePlan {
    file_plans: Vec<FilePlan>,
    inserts: Vec<Record>,
    metrics: Metrics,
}

impl MergePlan {
    fn is_empty(&self) -> bool {
        self.file_plans.is_empty() && self.inserts.is_empty()
    }
}

impl MergeEngine {
    /// Merge `source` into the table at its newest version.
    ///
    /// A commit that races another writer is retried from scratch against
    /// the new base, with doubling backoff, up to the configured number of
    /// retries; positions in a stale plan are meaningless against a moved
    /// base, so nothing of it is reused. A merge with nothing to do commits
    /// no version and leaves the version counter where it was.
    pub fn merge(
        &self,
        table: &mut Table,
        source: &[Record],
        spec: &MergeSpec,
    ) -> Result<Metrics, DatabaseError> {
        for record in source {
            table.schema().check_record(record)?;
        }

        let mut backoff = self.retry_backoff;
        let mut attempts = 0;
        loop {
            let snapshot = table.snapshot(None)?;
            let plan = plan_merge(table, &snapshot, source, spec)?;
            if plan.is_empty() {
                return Ok(Metrics::default());
            }

            match commit_plan(table, &snapshot, plan) {
                Ok(metrics) => return Ok(metrics),
                Err(DatabaseError::Conflict) if attempts < self.max_retries => {
                    sleep(backoff);
                    backoff *= 2;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rewrite every file whose live-row fraction fell below the table's
    /// compaction threshold, retiring the file and its deletion vector.
    /// Purely a space/read optimization: the logical row set is unchanged
    /// and no change feed records result. Returns the committed version, or
    /// `None` when no file qualified.
    pub fn compact(&self, table: &mut Table) -> Result<Option<Version>, DatabaseError> {
        let snapshot = table.snapshot(None)?;
        let at = snapshot.version();
        let threshold = table.config.compact_threshold;

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for (file_ref, dv_ref) in snapshot.files() {
            let Some(dv) = dv_ref else { continue };
            if file_ref.rows == 0 {
                continue;
            }
            let live = (file_ref.rows - dv.cardinality) as f64 / file_ref.rows as f64;
            if live >= threshold {
                continue;
            }

            let file = table.read_data_file(file_ref, at)?;
            let vector = table.read_vector(dv, file_ref.rows, at)?;
            let survivors: Vec<Record> = (0..file.rows() as u32)
                .filter(|position| !vector.contains(*position))
                .map(|position| file.row(position))
                .collect();

            removed.push(*file_ref);
            if !survivors.is_empty() {
                added.push(table.write_data_file(&survivors)?);
            }
        }

        if removed.is_empty() {
            return Ok(None);
        }
        let version = table.log().commit(
            Some(at),
            OperationKind::Compact,
            added,
            removed,
            vec![],
            Metrics::default(),
        )?;
        Ok(Some(version))
    }
}

/// Join the source rows against the live target rows by the schema's key
/// column and classify every match. Reads only; nothing is written yet.
fn plan_merge(
    table: &Table,
    snapshot: &Snapshot,
    source: &[Record],
    spec: &MergeSpec,
) -> Result<MergePlan, DatabaseError> {
    let schema = table.schema();
    let at = snapshot.version();

    // the source must be de-duplicated per key before merging
    let mut by_key: BTreeMap<&Value, usize> = BTreeMap::new();
    for (idx, record) in source.iter().enumerate() {
        let key = schema.key_of(record);
        if by_key.insert(key, idx).is_some() {
            return Err(DatabaseError::AmbiguousMatch(key.clone()));
        }
    }

    let mut matched = vec![false; source.len()];
    let mut file_plans = Vec::new();
    let mut metrics = Metrics::default();

    for (file_ref, dv_ref) in snapshot.files() {
        let file = table.read_data_file(file_ref, at)?;
        let vector = match dv_ref {
            Some(dv) => table.read_vector(dv, file_ref.rows, at)?,
            None => DeletionVector::new(),
        };

        let mut deleted = DeletionVector::new();
        let mut updated = BTreeMap::new();
        for position in 0..file.rows() as u32 {
            if vector.contains(position) {
                continue;
            }
            let target = file.row(position);
            let Some(&idx) = by_key.get(schema.key_of(&target)) else {
                continue;
            };
            let source_row = &source[idx];
            matched[idx] = true;

            if (spec.delete_when)(&target, source_row) {
                deleted.insert(position);
                metrics.deleted += 1;
            } else if (spec.update_when)(&target, source_row) {
                updated.insert(position, source_row.clone());
                metrics.updated += 1;
            }
            // a match satisfying neither predicate is a no-op, not an insert
        }

        if !deleted.is_empty() || !updated.is_empty() {
            file_plans.push(FilePlan {
                file: *file_ref,
                dv: *dv_ref,
                deleted,
                updated,
            });
        }
    }

    let mut inserts = Vec::new();
    for (idx, record) in source.iter().enumerate() {
        if !matched[idx] && (spec.insert_when)(record) {
            inserts.push(record.clone());
            metrics.inserted += 1;
        }
    }

    Ok(MergePlan {
        file_plans,
        inserts,
        metrics,
    })
}

/// Materialize a plan as provisional files/vectors and commit them. In
/// deletion-vector mode only new artifacts are written and affected files
/// get a superseding vector; in legacy mode every affected file is rewritten
/// in full and removed. Provisional writes become garbage if the commit
/// loses the race; they are never referenced by any log entry.
fn commit_plan(
    table: &mut Table,
    snapshot: &Snapshot,
    plan: MergePlan,
) -> Result<Metrics, DatabaseError> {
    let at = snapshot.version();

    let mut added_files = Vec::new();
    let mut removed_files = Vec::new();
    let mut added_vectors = Vec::new();

    if table.config.deletion_vectors_enabled {
        let mut post_images = Vec::new();
        for file_plan in &plan.file_plans {
            let mut newly = file_plan.deleted.clone();
            for position in file_plan.updated.keys() {
                newly.insert(*position);
            }
            let existing = file_plan.dv.as_ref().map(|dv| &dv.vector);
            let (vector_handle, merged) = table.dv_store().merge_vector(existing, &newly)?;
            added_vectors.push(DvRef {
                data_file: file_plan.file.handle,
                vector: vector_handle,
                cardinality: merged.cardinality(),
            });
            post_images.extend(file_plan.updated.values().cloned());
        }
        if !post_images.is_empty() {
            added_files.push(table.write_data_file(&post_images)?);
        }
    } else {
        for file_plan in &plan.file_plans {
            let file = table.read_data_file(&file_plan.file, at)?;
            let prior = match &file_plan.dv {
                Some(dv) => table.read_vector(dv, file_plan.file.rows, at)?,
                None => DeletionVector::new(),
            };

            let mut survivors = Vec::with_capacity(file.rows() as usize);
            for position in 0..file.rows() as u32 {
                if prior.contains(position) || file_plan.deleted.contains(position) {
                    continue;
                }
                match file_plan.updated.get(&position) {
                    Some(post_image) => survivors.push(post_image.clone()),
                    None => survivors.push(file.row(position)),
                }
            }

            removed_files.push(file_plan.file);
            if !survivors.is_empty() {
                added_files.push(table.write_data_file(&survivors)?);
            }
        }
    }

    if !plan.inserts.is_empty() {
        added_files.push(table.write_data_file(&plan.inserts)?);
    }

    table.log().commit(
        Some(at),
        OperationKind::Merge,
        added_files,
        removed_files,
        added_vectors,
        plan.metrics,
    )?;
    Ok(plan.metrics)
}
