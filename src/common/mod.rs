//! Shared identifiers, SQL data types, and the runtime `Value` union.
//!
//! Every other module depends on these definitions, so they carry no
//! dependency on the rest of the crate.

use std::cmp::Ordering;
use std::fmt;

/// 32-bit page identifier. `0` is [`INVALID_PAGE_ID`]. Allocation is
/// monotonic starting at 1.
pub type PageId = u32;

/// 64-bit monotonic transaction identifier. `0` is invalid/visible-to-all.
pub type TransactionId = u64;

/// 64-bit row identifier, unique within a table, issued from a per-table
/// counter starting at 1.
pub type RowId = u64;

pub const INVALID_PAGE_ID: PageId = 0;
pub const INVALID_TXN_ID: TransactionId = 0;
pub const INVALID_ROW_ID: RowId = 0;

pub const PAGE_SIZE: usize = 8192;

pub const PAGE_HEADER_SIZE: usize = 32;
pub const RECORD_HEADER_SIZE: usize = 26;
pub const BTREE_HEADER_SIZE: usize = 48;
pub const WAL_HEADER_SIZE: usize = 28;

/// The SQL type system this engine serializes and compares. Groups follow
/// `qindb/include/qindb/common.h`'s `DataType` categories; aliases the
/// original spells out separately (`INTEGER`/`INT`, `NUMERIC`/`DECIMAL`,
/// `REAL`/`FLOAT`, ...) collapse onto one canonical variant each, since they
/// carry identical wire and comparison semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Char(u16),
    Varchar(u16),
    Text,
    Binary(u16),
    Varbinary,
    Blob,
    Date,
    Time,
    DateTime,
    Timestamp,
    Boolean,
    Json,
    Xml,
    Uuid,
    /// WKB-encoded geometry; only `POINT` is required to round-trip.
    Geometry,
}

impl DataType {
    /// Byte width for fixed-length types, or `None` for variable-length
    /// types whose payload carries its own length prefix.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::TinyInt => Some(1),
            DataType::SmallInt => Some(2),
            DataType::Int => Some(4),
            DataType::BigInt => Some(8),
            DataType::Float => Some(4),
            DataType::Double => Some(8),
            DataType::Boolean => Some(1),
            DataType::Date => Some(4),
            DataType::Time => Some(4),
            DataType::DateTime => Some(8),
            DataType::Timestamp => Some(8),
            DataType::Uuid => Some(16),
            DataType::Char(n) => Some(*n as usize),
            DataType::Binary(n) => Some(*n as usize),
            DataType::Decimal { .. }
            | DataType::Varchar(_)
            | DataType::Text
            | DataType::Varbinary
            | DataType::Blob
            | DataType::Json
            | DataType::Xml
            | DataType::Geometry => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    pub fn is_variable_length(&self) -> bool {
        self.fixed_size().is_none()
    }
}

/// An ordered list of column types, as seen by the serializer and table
/// page code (which only need types and positions, not full `ColumnDef`s).
pub type ColumnList = Vec<DataType>;

/// Index implementation kind. Only [`IndexKind::Btree`] is implemented by
/// this core; `Hash` and `Fulltext` are carried as catalog-recognized
/// values so `Catalog::create_index` can record an executor's declared
/// intent without this core building the index body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Btree,
    Hash,
    Fulltext,
}

/// A runtime value tagged with the [`DataType`] it was decoded as.
/// Type checks live in the serializer (reject at encode time), not here.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(String),
    Char(String),
    Varchar(String),
    Text(String),
    Binary(Vec<u8>),
    Blob(Vec<u8>),
    /// Days since 1970-01-01.
    Date(i32),
    /// Seconds since midnight.
    Time(i32),
    /// Microseconds since the Unix epoch.
    DateTime(i64),
    Timestamp(i64),
    Boolean(bool),
    Json(String),
    Xml(String),
    Uuid(uuid::Uuid),
    /// WKB-encoded geometry bytes.
    Geometry(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::TinyInt(_) => Some(DataType::TinyInt),
            Value::SmallInt(_) => Some(DataType::SmallInt),
            Value::Int(_) => Some(DataType::Int),
            Value::BigInt(_) => Some(DataType::BigInt),
            Value::Float(_) => Some(DataType::Float),
            Value::Double(_) => Some(DataType::Double),
            Value::Decimal(_) => Some(DataType::Decimal { precision: 0, scale: 0 }),
            Value::Char(_) => Some(DataType::Char(0)),
            Value::Varchar(_) => Some(DataType::Varchar(0)),
            Value::Text(_) => Some(DataType::Text),
            Value::Binary(_) => Some(DataType::Binary(0)),
            Value::Blob(_) => Some(DataType::Blob),
            Value::Date(_) => Some(DataType::Date),
            Value::Time(_) => Some(DataType::Time),
            Value::DateTime(_) => Some(DataType::DateTime),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Json(_) => Some(DataType::Json),
            Value::Xml(_) => Some(DataType::Xml),
            Value::Uuid(_) => Some(DataType::Uuid),
            Value::Geometry(_) => Some(DataType::Geometry),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::TinyInt(v) => write!(f, "{v}"),
            Value::SmallInt(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Decimal(v) => write!(f, "{v}"),
            Value::Char(v) | Value::Varchar(v) | Value::Text(v) => write!(f, "{v}"),
            Value::Binary(v) | Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
            Value::Date(v) => write!(f, "date+{v}d"),
            Value::Time(v) => write!(f, "time+{v}s"),
            Value::DateTime(v) | Value::Timestamp(v) => write!(f, "{v}us"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Json(v) | Value::Xml(v) => write!(f, "{v}"),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Geometry(v) => write!(f, "<geometry {} bytes>", v.len()),
        }
    }
}

/// Three-way ordering result; kept distinct from [`Ordering`] at call sites
/// that care about raw sign (`KeyComparator::compare`'s contract), but
/// trivially convertible.
pub fn cmp_to_sign(o: Ordering) -> i32 {
    match o {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}
