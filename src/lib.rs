//! # Versioned table storage with deletion vectors
//!
//! A single-table storage engine over immutable data files. Row-level deletes
//! and updates are applied either by attaching deletion vectors to the
//! affected files or, in legacy mode, by rewriting them. An append-only
//! transaction log orders the versions, and a change feed can be derived
//! between any two of them.

use std::fmt::{Debug, Display};
use std::io;
use std::rc::Rc;
use thiserror::Error;

pub mod delta;
pub mod engine;
pub mod storage;
pub mod value_cmp;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("optimistic commit failed, the log advanced past the base version")]
    Conflict,
    #[error("key {0} is carried by more than one row")]
    AmbiguousMatch(Value),
    #[error("corrupt log entry at version {0}, referenced data is missing or damaged")]
    CorruptLogEntry(u64),
    #[error("corrupt data file")]
    CorruptDataFile,
    #[error("source rows do not match the target schema")]
    SchemaMismatch,
    #[error("IOError")]
    IOError(#[from] io::Error),
    #[error("invalid utf-8")]
    InvalidUTF8,
    #[error("change data feed is not enabled for this table")]
    ChangeFeedDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
pub struct RowID(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Copy)]
pub enum TypeID {
    Int = 0,
    UInt,
    RowID,
    Varchar,
}

impl TryFrom<u64> for TypeID {
    type Error = DatabaseError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TypeID::Int),
            1 => Ok(TypeID::UInt),
            2 => Ok(TypeID::RowID),
            3 => Ok(TypeID::Varchar),
            _ => Err(DatabaseError::CorruptDataFile),
        }
    }
}

impl From<TypeID> for u64 {
    fn from(value: TypeID) -> u64 {
        value as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i32),
    UInt(u32),
    RowID(RowID),
    Varchar(Rc<String>),
}

impl Value {
    pub fn get_id(&self) -> TypeID {
        match self {
            Value::Int(_) => TypeID::Int,
            Value::UInt(_) => TypeID::UInt,
            Value::RowID(_) => TypeID::RowID,
            Value::Varchar(_) => TypeID::Varchar,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(num) => write!(f, "{}", num),
            Value::UInt(num) => write!(f, "{}", num),
            Value::RowID(RowID(num)) => write!(f, "{}", num),
            Value::Varchar(st) => write!(f, "{}", st),
        }
    }
}

impl TryInto<i32> for Value {
    type Error = DatabaseError;

    fn try_into(self) -> Result<i32, Self::Error> {
        match self {
            Value::Int(i) => Ok(i),
            _ => Err(DatabaseError::SchemaMismatch),
        }
    }
}

impl TryInto<u32> for Value {
    type Error = DatabaseError;

    fn try_into(self) -> Result<u32, Self::Error> {
        match self {
            Value::UInt(i) => Ok(i),
            _ => Err(DatabaseError::SchemaMismatch),
        }
    }
}

impl TryInto<RowID> for Value {
    type Error = DatabaseError;

    fn try_into(self) -> Result<RowID, Self::Error> {
        match self {
            Value::RowID(i) => Ok(i),
            _ => Err(DatabaseError::SchemaMismatch),
        }
    }
}

impl TryInto<String> for Value {
    type Error = DatabaseError;

    fn try_into(self) -> Result<String, Self::Error> {
        match self {
            Value::Varchar(v) => Ok(String::from(v.as_ref())),
            _ => Err(DatabaseError::SchemaMismatch),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Varchar(Rc::new(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(Rc::new(value.to_string()))
    }
}

impl From<Rc<String>> for Value {
    fn from(value: Rc<String>) -> Self {
        Value::Varchar(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    record: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { record: values }
    }

    pub fn len(&self) -> usize {
        self.record.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.record.get(idx)
    }

    pub fn values(&self) -> &[Value] {
        self.record.as_slice()
    }
}

impl From<Vec<Value>> for Record {
    fn from(value: Vec<Value>) -> Self {
        Record { record: value }
    }
}

impl From<Record> for Vec<Value> {
    fn from(value: Record) -> Self {
        value.record
    }
}

/// A table schema: ordered column types plus the column that acts as the
/// merge (join) key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<TypeID>,
    key_column: usize,
}

impl TableSchema {
    pub fn new(columns: Vec<TypeID>, key_column: usize) -> Result<Self, DatabaseError> {
        if key_column >= columns.len() {
            return Err(DatabaseError::SchemaMismatch);
        }
        Ok(TableSchema {
            columns,
            key_column,
        })
    }

    pub fn columns(&self) -> &[TypeID] {
        self.columns.as_slice()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    /// Check arity and column types of a record against this schema.
    pub fn check_record(&self, record: &Record) -> Result<(), DatabaseError> {
        if record.len() != self.columns.len() {
            return Err(DatabaseError::SchemaMismatch);
        }
        for (value, type_id) in record.values().iter().zip(self.columns.iter()) {
            if value.get_id() != *type_id {
                return Err(DatabaseError::SchemaMismatch);
            }
        }
        Ok(())
    }

    /// The merge-key value of a record. The record must match the schema.
    pub fn key_of<'a>(&self, record: &'a Record) -> &'a Value {
        &record.values()[self.key_column]
    }
}

// A chunk of a table, in column layout.
pub type TableChunk = Vec<Vec<Value>>;
