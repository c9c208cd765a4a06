use crate::Record;
use std::time::Duration;

pub mod changes;
pub mod merge;

/// Predicate over a matched (target, source) row pair.
pub type MatchPredicate<'a> = Box<dyn Fn(&Record, &Record) -> bool + 'a>;
/// Predicate over an unmatched source row.
pub type SourcePredicate<'a> = Box<dyn Fn(&Record) -> bool + 'a>;

/// The three predicates of a merge, evaluated in order for every joined
/// pair: delete first, then update; a matched pair satisfying neither is
/// left untouched. Unmatched source rows are inserted if `insert_when`
/// holds.
pub struct MergeSpec<'a> {
    pub delete_when: MatchPredicate<'a>,
    pub update_when: MatchPredicate<'a>,
    pub insert_when: SourcePredicate<'a>,
}

impl<'a> MergeSpec<'a> {
    /// Plain upsert: never delete, update every match, insert every
    /// unmatched source row.
    pub fn upsert() -> Self {
        MergeSpec {
            delete_when: Box::new(|_, _| false),
            update_when: Box::new(|_, _| true),
            insert_when: Box::new(|_| true),
        }
    }

    pub fn with_delete_when(mut self, predicate: MatchPredicate<'a>) -> Self {
        self.delete_when = predicate;
        self
    }

    pub fn with_update_when(mut self, predicate: MatchPredicate<'a>) -> Self {
        self.update_when = predicate;
        self
    }

    pub fn with_insert_when(mut self, predicate: SourcePredicate<'a>) -> Self {
        self.insert_when = predicate;
        self
    }
}

/// Plans and commits merges against a table. Stateless apart from its retry
/// policy; the target table handle is passed to every operation.
pub struct MergeEngine {
    max_retries: u32,
    retry_backoff: Duration,
}

impl MergeEngine {
    pub fn new(max_retries: u32, retry_backoff: Duration) -> Self {
        MergeEngine {
            max_retries,
            retry_backoff,
        }
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        MergeEngine {
            max_retries: 5,
            retry_backoff: Duration::from_millis(10),
        }
    }
}
