use crate::storage::FileHandle;
use version::Version;

pub mod log;
pub mod snapshot;
pub mod table;
pub mod version;

/// What kind of change a committed version carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Merge,
    Compact,
}

/// Reference to an immutable data file as recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub handle: FileHandle,
    pub rows: u64,
    pub checksum: u32,
}

/// Reference to a deletion vector, bound to exactly one data file. At most
/// one vector per file is active in any snapshot; a newer one supersedes the
/// older.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvRef {
    pub data_file: FileHandle,
    pub vector: FileHandle,
    pub cardinality: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metrics {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// One log entry. Append-only; once committed it is never rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRecord {
    pub version: Version,
    pub timestamp_ms: u64,
    pub operation: OperationKind,
    pub added_files: Vec<FileRef>,
    pub removed_files: Vec<FileRef>,
    pub added_vectors: Vec<DvRef>,
    pub metrics: Metrics,
}

/// Per-table feature flags and policy knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableConfig {
    pub deletion_vectors_enabled: bool,
    pub change_feed_enabled: bool,
    /// Live-row fraction below which a compaction pass rewrites a file and
    /// retires its deletion vector.
    pub compact_threshold: f64,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            deletion_vectors_enabled: true,
            change_feed_enabled: true,
            compact_threshold: 0.5,
        }
    }
}

impl TableConfig {
    pub fn legacy() -> Self {
        TableConfig {
            deletion_vectors_enabled: false,
            ..TableConfig::default()
        }
    }
}
