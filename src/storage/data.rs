use super::{DataFile, DataFileHeader};
use crate::{DatabaseError, Record, RowID, TableChunk, TableSchema, TypeID, Value};
use std::io::{Read, Seek};
use std::rc::Rc;

/// Checksum recorded next to every file reference in the log; verified on
/// every read so a damaged or truncated file surfaces instead of silently
/// producing wrong rows.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

// Little cursor over a serialized byte stream. Short reads mean the file
// does not contain what its header promised. Also used by the log codec.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], DatabaseError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DatabaseError::CorruptDataFile)?;
        if end > self.bytes.len() {
            return Err(DatabaseError::CorruptDataFile);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, DatabaseError> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| DatabaseError::CorruptDataFile)?;
        Ok(u64::from_le_bytes(bytes))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, DatabaseError> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| DatabaseError::CorruptDataFile)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn read_i32(&mut self) -> Result<i32, DatabaseError> {
        let bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| DatabaseError::CorruptDataFile)?;
        Ok(i32::from_le_bytes(bytes))
    }
}

impl DataFile {
    pub fn new(header: DataFileHeader, data: TableChunk) -> Self {
        DataFile { header, data }
    }

    /// Build a data file from rows in schema order. Rows become positions
    /// 0..n in the order given.
    pub fn from_records(schema: &TableSchema, records: &[Record]) -> Self {
        let mut data: TableChunk = vec![Vec::with_capacity(records.len()); schema.len()];
        for record in records {
            for (column, value) in data.iter_mut().zip(record.values()) {
                column.push(value.clone());
            }
        }
        let header = DataFileHeader::new(
            records.len() as u64,
            schema.len() as u64,
            schema.columns().to_vec(),
        );
        DataFile::new(header, data)
    }

    /// Serialize as header followed by the columns in order. Fixed-width
    /// values are raw little-endian, varchars are length-prefixed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = self.header.to_bytes();

        for (column, type_id) in self.data.iter().zip(self.header.column_types.iter()) {
            for value in column {
                match (type_id, value) {
                    (TypeID::Int, Value::Int(int)) => result.extend(int.to_le_bytes()),
                    (TypeID::UInt, Value::UInt(uint)) => result.extend(uint.to_le_bytes()),
                    (TypeID::RowID, Value::RowID(RowID(id))) => result.extend(id.to_le_bytes()),
                    (TypeID::Varchar, Value::Varchar(s)) => {
                        result.extend((s.len() as u64).to_le_bytes());
                        result.extend(s.as_bytes());
                    }
                    _ => panic!("column value does not match the declared column type"),
                }
            }
        }

        result
    }

    /// Deserialize a complete data file.
    pub fn parse<F: Seek + Read>(file: &mut F) -> Result<Self, DatabaseError> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::parse_bytes(&bytes)
    }

    pub fn parse_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        let mut reader = ByteReader::new(bytes);
        let header = DataFileHeader::parse(&mut reader)?;

        let mut chunk: TableChunk = Vec::with_capacity(header.column_types.len());
        for type_id in &header.column_types {
            let mut column = Vec::with_capacity(header.rows as usize);
            for _ in 0..header.rows {
                let value = match type_id {
                    TypeID::Int => Value::Int(reader.read_i32()?),
                    TypeID::UInt => Value::UInt(reader.read_u32()?),
                    TypeID::RowID => Value::RowID(RowID(reader.read_u64()?)),
                    TypeID::Varchar => {
                        let len = reader.read_u64()? as usize;
                        let raw = reader.take(len)?;
                        let s = std::str::from_utf8(raw)
                            .map_err(|_| DatabaseError::InvalidUTF8)?
                            .to_string();
                        Value::Varchar(Rc::new(s))
                    }
                };
                column.push(value);
            }
            chunk.push(column);
        }

        Ok(DataFile::new(header, chunk))
    }
}

impl DataFileHeader {
    const MAGIC: [u8; 8] = [0x44, 0x56, 0x54, 0x42, 0x4c, 0x00, 0x01, 0x00];

    pub fn new(rows: u64, columns: u64, column_types: Vec<TypeID>) -> Self {
        DataFileHeader {
            rows,
            columns,
            column_types,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut result: Vec<u8> = vec![];

        result.extend(DataFileHeader::MAGIC);
        result.extend(self.rows.to_le_bytes());
        result.extend(self.columns.to_le_bytes());
        for type_id in &self.column_types {
            result.extend(u64::from(*type_id).to_le_bytes());
        }

        result
    }

    fn parse(reader: &mut ByteReader) -> Result<Self, DatabaseError> {
        if reader.take(8)? != DataFileHeader::MAGIC {
            return Err(DatabaseError::CorruptDataFile);
        }

        let rows = reader.read_u64()?;
        let columns = reader.read_u64()?;

        let mut column_types = Vec::with_capacity(columns as usize);
        for _ in 0..columns {
            column_types.push(TypeID::try_from(reader.read_u64()?)?);
        }

        Ok(DataFileHeader::new(rows, columns, column_types))
    }
}
