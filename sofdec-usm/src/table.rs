//! `@UTF` typed tables.
//!
//! Every piece of USM metadata (stream directory, per-stream headers, seek
//! points) is stored as an `@UTF` table: a small column-oriented record set
//! with a shared string pool and a blob pool.
//!
//! ```text
//! 0x00  "@UTF"
//! 0x04  u32 size of everything after this field
//! 0x08  u32 row data offset      ┐
//! 0x0C  u32 string pool offset   │ offsets count from 0x08
//! 0x10  u32 blob pool offset     ┘
//! 0x14  u32 table name (offset into the string pool)
//! 0x18  u16 column count
//! 0x1A  u16 row size
//! 0x1C  u32 row count
//! 0x20  column descriptors, constant values inline
//! ....  rows, string pool, blob pool
//! ```

use crate::{Error, Result, reader::Reader};
use encoding_rs::Encoding;
use std::fmt;

pub(crate) const SIGNATURE: &[u8; 4] = b"@UTF";
const NULL_STRING: &[u8] = b"<NULL>\0";
const HEADER_SIZE: usize = 0x20;
// Header fields after the size field.
const INFO_SIZE: usize = 0x18;

/// Element type of a column. The discriminant is the type code stored in the
/// low five bits of the column descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ElementType {
    I8 = 0x10,
    U8 = 0x11,
    I16 = 0x12,
    U16 = 0x13,
    I32 = 0x14,
    U32 = 0x15,
    I64 = 0x16,
    U64 = 0x17,
    F32 = 0x18,
    F64 = 0x19,
    String = 0x1A,
    Bytes = 0x1B,
}

impl ElementType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x10 => Self::I8,
            0x11 => Self::U8,
            0x12 => Self::I16,
            0x13 => Self::U16,
            0x14 => Self::I32,
            0x15 => Self::U32,
            0x16 => Self::I64,
            0x17 => Self::U64,
            0x18 => Self::F32,
            0x19 => Self::F64,
            0x1A => Self::String,
            0x1B => Self::Bytes,
            _ => return None,
        })
    }

    /// Bytes one value occupies in a row or descriptor.
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 | Self::String => 4,
            Self::I64 | Self::U64 | Self::F64 | Self::Bytes => 8,
        }
    }
}

/// Where a column keeps its values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum Storage {
    /// One value for all rows, stored inside the column descriptor.
    Constant = 1,
    /// One value per row, stored in the row data.
    PerRow = 2,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Column {
    pub name: String,
    pub element_type: ElementType,
    pub storage: Storage,
}

/// A single table cell.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn element_type(&self) -> ElementType {
        match self {
            Self::I8(_) => ElementType::I8,
            Self::U8(_) => ElementType::U8,
            Self::I16(_) => ElementType::I16,
            Self::U16(_) => ElementType::U16,
            Self::I32(_) => ElementType::I32,
            Self::U32(_) => ElementType::U32,
            Self::I64(_) => ElementType::I64,
            Self::U64(_) => ElementType::U64,
            Self::F32(_) => ElementType::F32,
            Self::F64(_) => ElementType::F64,
            Self::String(_) => ElementType::String,
            Self::Bytes(_) => ElementType::Bytes,
        }
    }

    /// Integer cells widened to `i64`. `u64` values above `i64::MAX` return `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(x) => Some(x.into()),
            Self::U8(x) => Some(x.into()),
            Self::I16(x) => Some(x.into()),
            Self::U16(x) => Some(x.into()),
            Self::I32(x) => Some(x.into()),
            Self::U32(x) => Some(x.into()),
            Self::I64(x) => Some(x),
            Self::U64(x) => i64::try_from(x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(x) => Some(x.into()),
            Self::F64(x) => Some(x),
            _ => self.as_i64().map(|x| x as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(x) => Some(x),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(x) => Some(x),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(x) => write!(f, "{}", x),
            Self::F64(x) => write!(f, "{}", x),
            Self::String(x) => write!(f, "{:?}", x),
            Self::Bytes(x) => write!(f, "<{} bytes>", x.len()),
            _ => match self.as_i64() {
                Some(x) => write!(f, "{}", x),
                None => write!(f, "{:?}", self),
            },
        }
    }
}

/// A decoded `@UTF` table.
///
/// Fields are private so that every `Table` satisfies the layout invariants:
/// each row has one value per column, of the column's type, and constant
/// columns hold the same value in every row.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let name = name.into();

        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::InvalidInput(format!(
                    "row {} of {} has {} values for {} columns",
                    i,
                    name,
                    row.len(),
                    columns.len()
                )));
            }

            for (column, value) in columns.iter().zip(row) {
                if value.element_type() != column.element_type {
                    return Err(Error::InvalidInput(format!(
                        "{}.{} is {:?} but row {} holds {:?}",
                        name,
                        column.name,
                        column.element_type,
                        i,
                        value.element_type()
                    )));
                }
            }
        }

        for (c, column) in columns.iter().enumerate() {
            if column.storage == Storage::Constant {
                if rows.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "constant column {}.{} needs at least one row",
                        name, column.name
                    )));
                }

                if rows.iter().any(|row| row[c] != rows[0][c]) {
                    return Err(Error::InvalidInput(format!(
                        "constant column {}.{} differs between rows",
                        name, column.name
                    )));
                }
            }
        }

        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    /// Build a table from named values, one `Vec` per row.
    ///
    /// Column order and types come from the first row. A column is stored as
    /// constant when the table has more than one row and every row agrees.
    pub fn infer<K: Into<String>>(name: impl Into<String>, rows: Vec<Vec<(K, Value)>>) -> Result<Self> {
        let name = name.into();
        let mut names: Vec<String> = vec![];
        let mut values = Vec::with_capacity(rows.len());

        for (i, row) in rows.into_iter().enumerate() {
            let mut row_values = Vec::with_capacity(row.len());

            for (c, (key, value)) in row.into_iter().enumerate() {
                let key = key.into();

                if i == 0 {
                    names.push(key);
                } else if names.get(c) != Some(&key) {
                    return Err(Error::InvalidInput(format!(
                        "row {} of {} has column {} where {:?} was expected",
                        i,
                        name,
                        key,
                        names.get(c)
                    )));
                }

                row_values.push(value);
            }

            values.push(row_values);
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(c, column_name)| {
                let element_type = values
                    .first()
                    .and_then(|row: &Vec<Value>| row.get(c))
                    .map(Value::element_type)
                    .unwrap_or(ElementType::I32);
                let constant = values.len() > 1 && values.iter().all(|row| row.get(c) == values[0].get(c));

                Column {
                    name: column_name,
                    element_type,
                    storage: if constant {
                        Storage::Constant
                    } else {
                        Storage::PerRow
                    },
                }
            })
            .collect();

        Self::new(name, columns, values)
    }

    /// A one-row table.
    pub fn single<K: Into<String>>(name: impl Into<String>, fields: Vec<(K, Value)>) -> Result<Self> {
        Self::infer(name, vec![fields])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|x| x.name == name)
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.rows.get(row)?.get(self.column_index(column)?)
    }

    /// Integer cell of `column` in `row`, widened to `i64`.
    pub fn get_i64(&self, row: usize, column: &str) -> Option<i64> {
        self.get(row, column)?.as_i64()
    }

    pub fn get_str(&self, row: usize, column: &str) -> Option<&str> {
        self.get(row, column)?.as_str()
    }

    /// Decode a table from the start of `data`. Bytes after the declared table
    /// size are ignored.
    pub fn decode(data: &[u8], encoding: &'static Encoding) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(malformed(format!(
                "buffer holds {} bytes but the header needs {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[..4] != SIGNATURE {
            return Err(malformed(format!("bad signature {}", hex::encode(&data[..4]))));
        }

        let mut reader = Reader::new(data);
        reader.skip(4).map_err(eof)?;
        let data_size = reader.read_u32().map_err(eof)? as usize;

        if 8 + data_size > data.len() {
            return Err(malformed(format!(
                "declares {} bytes but only {} follow the size field",
                data_size,
                data.len() - 8
            )));
        }

        let body = &data[8..8 + data_size];
        let mut header = Reader::new(body);
        let rows_offset = header.read_u32().map_err(eof)? as usize;
        let strings_offset = header.read_u32().map_err(eof)? as usize;
        let blobs_offset = header.read_u32().map_err(eof)? as usize;
        let name_offset = header.read_u32().map_err(eof)? as usize;
        let num_columns = header.read_u16().map_err(eof)? as usize;
        let row_size = header.read_u16().map_err(eof)? as usize;
        let num_rows = header.read_u32().map_err(eof)? as usize;

        if !(INFO_SIZE <= rows_offset
            && rows_offset <= strings_offset
            && strings_offset <= blobs_offset
            && blobs_offset <= data_size)
        {
            return Err(malformed(format!(
                "section offsets out of order (rows {:#x}, strings {:#x}, blobs {:#x}, end {:#x})",
                rows_offset, strings_offset, blobs_offset, data_size
            )));
        }

        let rows_size = row_size
            .checked_mul(num_rows)
            .filter(|x| rows_offset + x <= strings_offset)
            .ok_or_else(|| {
                malformed(format!(
                    "{} rows of {} bytes overrun the string pool",
                    num_rows, row_size
                ))
            })?;

        let pools = Pools {
            strings: &body[strings_offset..blobs_offset],
            blobs: &body[blobs_offset..],
            encoding,
        };
        let name = pools.string(name_offset)?;

        let mut descriptors = Reader::new(&body[INFO_SIZE..rows_offset]);
        let mut columns = Vec::with_capacity(num_columns);
        let mut constants = Vec::with_capacity(num_columns);

        for _ in 0..num_columns {
            let flags = descriptors.read_u8().map_err(eof)?;
            let element_type = ElementType::from_u8(flags & 0x1F)
                .ok_or_else(|| malformed(format!("unknown element type {:#04x}", flags & 0x1F)))?;
            let storage = match flags >> 5 {
                1 => Storage::Constant,
                2 => Storage::PerRow,
                x => return Err(malformed(format!("unknown column storage {}", x))),
            };
            let column_name = pools.string(descriptors.read_u32().map_err(eof)? as usize)?;

            constants.push(match storage {
                Storage::Constant => Some(pools.value(&mut descriptors, element_type)?),
                Storage::PerRow => None,
            });
            columns.push(Column {
                name: column_name,
                element_type,
                storage,
            });
        }

        if descriptors.has_more_data() {
            return Err(malformed(format!(
                "{} unused bytes after the column descriptors",
                descriptors.remaining()
            )));
        }

        let per_row: usize = columns
            .iter()
            .filter(|x| x.storage == Storage::PerRow)
            .map(|x| x.element_type.width())
            .sum();

        if per_row != row_size {
            return Err(malformed(format!(
                "declared row size {} but columns need {}",
                row_size, per_row
            )));
        }

        let mut row_reader = Reader::new(&body[rows_offset..rows_offset + rows_size]);
        let mut rows = Vec::with_capacity(num_rows.min(rows_size.max(1)));

        for _ in 0..num_rows {
            let row = columns
                .iter()
                .zip(&constants)
                .map(|(column, constant)| match constant {
                    Some(value) => Ok(value.clone()),
                    None => pools.value(&mut row_reader, column.element_type),
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }

        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    /// Serialize into the canonical layout: columns in declared order, rows in
    /// order, and pool entries in the order values are written.
    pub fn encode(&self, encoding: &'static Encoding) -> Result<Vec<u8>> {
        if self.columns.len() > u16::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "{} has {} columns, at most {} fit",
                self.name,
                self.columns.len(),
                u16::MAX
            )));
        }

        let mut pools = WritePools {
            strings: NULL_STRING.to_vec(),
            blobs: vec![],
            encoding,
        };
        let name_offset = pools.string(&self.name)?;
        let name_offsets = self
            .columns
            .iter()
            .map(|x| pools.string(&x.name))
            .collect::<Result<Vec<_>>>()?;

        let mut descriptors = vec![];
        let mut row_data = vec![];

        let descriptor = |descriptors: &mut Vec<u8>, c: usize| {
            let column = &self.columns[c];
            descriptors.push(column.element_type as u8 | (column.storage as u8) << 5);
            descriptors.extend_from_slice(&name_offsets[c].to_be_bytes());
        };

        if self.rows.is_empty() {
            for c in 0..self.columns.len() {
                descriptor(&mut descriptors, c);
            }
        }

        for (i, row) in self.rows.iter().enumerate() {
            for (c, (column, value)) in self.columns.iter().zip(row).enumerate() {
                match column.storage {
                    Storage::Constant if i == 0 => {
                        descriptor(&mut descriptors, c);
                        pools.value(&mut descriptors, value)?;
                    }
                    Storage::Constant => {}
                    Storage::PerRow => {
                        if i == 0 {
                            descriptor(&mut descriptors, c);
                        }

                        pools.value(&mut row_data, value)?;
                    }
                }
            }
        }

        let row_size = self
            .columns
            .iter()
            .filter(|x| x.storage == Storage::PerRow)
            .map(|x| x.element_type.width())
            .sum::<usize>();

        if row_size > u16::MAX as usize {
            return Err(Error::InvalidInput(format!(
                "{} rows are {} bytes wide, at most {} fit",
                self.name,
                row_size,
                u16::MAX
            )));
        }

        let rows_offset = INFO_SIZE + descriptors.len();
        let strings_offset = rows_offset + row_data.len();
        let blobs_offset = strings_offset + pools.strings.len();
        let data_size = blobs_offset + pools.blobs.len();

        let mut out = Vec::with_capacity(8 + data_size);
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&offset_u32(data_size)?.to_be_bytes());
        out.extend_from_slice(&offset_u32(rows_offset)?.to_be_bytes());
        out.extend_from_slice(&offset_u32(strings_offset)?.to_be_bytes());
        out.extend_from_slice(&offset_u32(blobs_offset)?.to_be_bytes());
        out.extend_from_slice(&name_offset.to_be_bytes());
        out.extend_from_slice(&(self.columns.len() as u16).to_be_bytes());
        out.extend_from_slice(&(row_size as u16).to_be_bytes());
        out.extend_from_slice(&offset_u32(self.rows.len())?.to_be_bytes());
        out.extend_from_slice(&descriptors);
        out.extend_from_slice(&row_data);
        out.extend_from_slice(&pools.strings);
        out.extend_from_slice(&pools.blobs);
        Ok(out)
    }
}

fn malformed(reason: String) -> Error {
    Error::MalformedTable(reason)
}

fn eof(_: std::io::Error) -> Error {
    malformed("value runs past the end of its section".to_owned())
}

fn offset_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::InvalidInput(format!("table section of {} bytes is too large", value)))
}

struct Pools<'a> {
    strings: &'a [u8],
    blobs: &'a [u8],
    encoding: &'static Encoding,
}

impl Pools<'_> {
    fn string(&self, offset: usize) -> Result<String> {
        let tail = self.strings.get(offset..).filter(|x| !x.is_empty()).ok_or_else(|| {
            malformed(format!(
                "string offset {:#x} outside a {} byte pool",
                offset,
                self.strings.len()
            ))
        })?;
        let end = tail
            .iter()
            .position(|&x| x == 0)
            .ok_or_else(|| malformed(format!("string at {:#x} is not terminated", offset)))?;

        self.encoding
            .decode_without_bom_handling_and_without_replacement(&tail[..end])
            .map(|x| x.into_owned())
            .ok_or_else(|| malformed(format!("string at {:#x} is not valid {}", offset, self.encoding.name())))
    }

    fn value(&self, reader: &mut Reader, element_type: ElementType) -> Result<Value> {
        Ok(match element_type {
            ElementType::I8 => Value::I8(reader.read_i8().map_err(eof)?),
            ElementType::U8 => Value::U8(reader.read_u8().map_err(eof)?),
            ElementType::I16 => Value::I16(reader.read_i16().map_err(eof)?),
            ElementType::U16 => Value::U16(reader.read_u16().map_err(eof)?),
            ElementType::I32 => Value::I32(reader.read_i32().map_err(eof)?),
            ElementType::U32 => Value::U32(reader.read_u32().map_err(eof)?),
            ElementType::I64 => Value::I64(reader.read_i64().map_err(eof)?),
            ElementType::U64 => Value::U64(reader.read_u64().map_err(eof)?),
            ElementType::F32 => Value::F32(reader.read_f32_le().map_err(eof)?),
            ElementType::F64 => Value::F64(reader.read_f64_le().map_err(eof)?),
            ElementType::String => Value::String(self.string(reader.read_u32().map_err(eof)? as usize)?),
            ElementType::Bytes => {
                let start = reader.read_u32().map_err(eof)? as usize;
                let end = reader.read_u32().map_err(eof)? as usize;

                if start > end || end > self.blobs.len() {
                    return Err(malformed(format!(
                        "blob {:#x}..{:#x} outside a {} byte pool",
                        start,
                        end,
                        self.blobs.len()
                    )));
                }

                Value::Bytes(self.blobs[start..end].to_vec())
            }
        })
    }
}

struct WritePools {
    strings: Vec<u8>,
    blobs: Vec<u8>,
    encoding: &'static Encoding,
}

impl WritePools {
    fn string(&mut self, value: &str) -> Result<u32> {
        let (bytes, _, unmappable) = self.encoding.encode(value);

        if unmappable || bytes.contains(&0) {
            return Err(Error::InvalidInput(format!(
                "{:?} cannot be stored as a {} string",
                value,
                self.encoding.name()
            )));
        }

        let offset = offset_u32(self.strings.len())?;
        self.strings.extend_from_slice(&bytes);
        self.strings.push(0);
        Ok(offset)
    }

    fn value(&mut self, out: &mut Vec<u8>, value: &Value) -> Result<()> {
        match value {
            Value::I8(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::U8(x) => out.push(*x),
            Value::I16(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::U16(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::I32(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::U32(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::I64(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::U64(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::F32(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::F64(x) => out.extend_from_slice(&x.to_le_bytes()),
            Value::String(x) => {
                let offset = self.string(x)?;
                out.extend_from_slice(&offset.to_be_bytes());
            }
            Value::Bytes(x) => {
                let start = offset_u32(self.blobs.len())?;
                let end = offset_u32(self.blobs.len() + x.len())?;
                self.blobs.extend_from_slice(x);
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&end.to_be_bytes());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, UTF_8};

    fn seek_table() -> Table {
        Table::infer(
            "VIDEO_SEEKINFO",
            vec![
                vec![
                    ("ofs_byte", Value::I64(0x1800)),
                    ("ofs_frmid", Value::U32(0)),
                    ("num_skip", Value::U16(0)),
                    ("resv", Value::U16(0)),
                ],
                vec![
                    ("ofs_byte", Value::I64(0x9A20)),
                    ("ofs_frmid", Value::U32(30)),
                    ("num_skip", Value::U16(0)),
                    ("resv", Value::U16(0)),
                ],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_infer_storage() {
        let table = seek_table();
        let storages: Vec<_> = table.columns().iter().map(|x| x.storage).collect();
        assert_eq!(
            storages,
            [Storage::PerRow, Storage::PerRow, Storage::Constant, Storage::Constant]
        );

        let single = Table::single("AUDIO_HDRINFO", vec![("audio_codec", Value::I8(4))]).unwrap();
        assert_eq!(single.columns()[0].storage, Storage::PerRow);
    }

    #[test]
    fn test_encode_layout() {
        let data = seek_table().encode(UTF_8).unwrap();
        assert_eq!(&data[..4], b"@UTF");
        assert_eq!(u32::from_be_bytes(data[4..8].try_into().unwrap()) as usize, data.len() - 8);
        // 4 columns, 12 bytes per row, 2 rows
        assert_eq!(&data[0x18..0x20], &[0, 4, 0, 12, 0, 0, 0, 2]);
        // First descriptor: per-row i64
        assert_eq!(data[0x20], 0x56);
    }

    #[test]
    fn test_round_trip() {
        let table = Table::infer(
            "CRIUSF_DIR_STREAM",
            vec![
                vec![
                    ("fmtver", Value::I32(16777984)),
                    ("filename", Value::String("movie.usm".to_owned())),
                    ("chno", Value::I16(-1)),
                    ("gain", Value::F32(0.5)),
                    ("extra", Value::Bytes(vec![1, 2, 3])),
                ],
                vec![
                    ("fmtver", Value::I32(16777984)),
                    ("filename", Value::String("movie.ivf".to_owned())),
                    ("chno", Value::I16(0)),
                    ("gain", Value::F32(1.25)),
                    ("extra", Value::Bytes(vec![4, 5])),
                ],
            ],
        )
        .unwrap();

        let data = table.encode(UTF_8).unwrap();
        let decoded = Table::decode(&data, UTF_8).unwrap();
        assert_eq!(decoded, table);
        assert_eq!(decoded.encode(UTF_8).unwrap(), data);
        assert_eq!(decoded.get(1, "extra").and_then(Value::as_bytes), Some(&[4u8, 5][..]));
        assert_eq!(decoded.get_str(0, "filename"), Some("movie.usm"));
    }

    #[test]
    fn test_float_is_little_endian() {
        let table = Table::single("T", vec![("f", Value::F32(1.0))]).unwrap();
        let data = table.encode(UTF_8).unwrap();
        let rows_offset = 8 + u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;
        assert_eq!(&data[rows_offset..rows_offset + 4], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_shift_jis_strings() {
        let table = Table::single("T", vec![("filename", Value::String("ムービー.usm".to_owned()))]).unwrap();
        let data = table.encode(SHIFT_JIS).unwrap();
        assert_eq!(Table::decode(&data, SHIFT_JIS).unwrap(), table);
        assert!(matches!(Table::decode(&data, UTF_8), Err(Error::MalformedTable(_))));
    }

    #[test]
    fn test_empty_table() {
        let table = Table::new(
            "EMPTY",
            vec![Column {
                name: "x".to_owned(),
                element_type: ElementType::U8,
                storage: Storage::PerRow,
            }],
            vec![],
        )
        .unwrap();
        let data = table.encode(UTF_8).unwrap();
        assert_eq!(Table::decode(&data, UTF_8).unwrap(), table);
    }

    #[test]
    fn test_declared_size_too_large() {
        let mut data = seek_table().encode(UTF_8).unwrap();
        let size = (data.len() - 8 + 1) as u32;
        data[4..8].copy_from_slice(&size.to_be_bytes());
        assert!(matches!(Table::decode(&data, UTF_8), Err(Error::MalformedTable(_))));
    }

    #[test]
    fn test_string_offset_out_of_bounds() {
        let mut data = Table::single("T", vec![("s", Value::String("abc".to_owned()))])
            .unwrap()
            .encode(UTF_8)
            .unwrap();
        let rows_offset = 8 + u32::from_be_bytes(data[8..12].try_into().unwrap()) as usize;
        data[rows_offset..rows_offset + 4].copy_from_slice(&0xFFFFu32.to_be_bytes());
        assert!(matches!(Table::decode(&data, UTF_8), Err(Error::MalformedTable(_))));
    }

    #[test]
    fn test_unknown_element_type() {
        let mut data = seek_table().encode(UTF_8).unwrap();
        data[0x20] = 0x5F;
        assert!(matches!(Table::decode(&data, UTF_8), Err(Error::MalformedTable(_))));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = Table::infer(
            "T",
            vec![vec![("a", Value::U8(1))], vec![("b", Value::U8(1))]],
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
