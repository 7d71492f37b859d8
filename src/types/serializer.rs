//! Deterministic, little-endian encoding for every [`DataType`]. A 1-byte
//! null flag precedes every field; `serialize`/`deserialize` are exact
//! inverses for in-range values.

use crate::common::{DataType, Value};
use crate::error::{DbError, Result};

const NULL_FLAG: u8 = 1;
const NOT_NULL_FLAG: u8 = 0;

pub struct TypeSerializer;

impl TypeSerializer {
    /// Encodes `value` (which must either be `Value::Null` or match `ty`)
    /// into its on-disk byte representation, including the leading null
    /// flag.
    pub fn serialize(value: &Value, ty: DataType) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if matches!(value, Value::Null) {
            out.push(NULL_FLAG);
            return Ok(out);
        }
        out.push(NOT_NULL_FLAG);
        Self::serialize_payload(value, ty, &mut out)?;
        Ok(out)
    }

    fn serialize_payload(value: &Value, ty: DataType, out: &mut Vec<u8>) -> Result<()> {
        match (ty, value) {
            (DataType::TinyInt, Value::TinyInt(v)) => out.push(*v as u8),
            (DataType::SmallInt, Value::SmallInt(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (DataType::Int, Value::Int(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (DataType::BigInt, Value::BigInt(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (DataType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (DataType::Double, Value::Double(v)) => out.extend_from_slice(&v.to_le_bytes()),
            (DataType::Decimal { .. }, Value::Decimal(s)) => write_var_string16(out, s)?,
            (DataType::Char(n), Value::Char(s)) => write_fixed_padded(out, s, n as usize)?,
            (DataType::Varchar(n), Value::Varchar(s)) => {
                if n > 0 && s.len() > n as usize {
                    return Err(DbError::ConstraintViolation(format!(
                        "varchar value exceeds declared length {n}"
                    )));
                }
                write_var_string16(out, s)?;
            }
            (DataType::Text, Value::Text(s)) => write_var_bytes32(out, s.as_bytes()),
            (DataType::Binary(n), Value::Binary(b)) => write_fixed_padded_bytes(out, b, n as usize)?,
            (DataType::Varbinary, Value::Binary(b)) => write_var_bytes32(out, b),
            (DataType::Blob, Value::Blob(b)) => write_var_bytes32(out, b),
            (DataType::Date, Value::Date(d)) => out.extend_from_slice(&d.to_le_bytes()),
            (DataType::Time, Value::Time(t)) => out.extend_from_slice(&t.to_le_bytes()),
            (DataType::DateTime, Value::DateTime(t)) => out.extend_from_slice(&t.to_le_bytes()),
            (DataType::Timestamp, Value::Timestamp(t)) => out.extend_from_slice(&t.to_le_bytes()),
            (DataType::Boolean, Value::Boolean(b)) => out.push(*b as u8),
            (DataType::Json, Value::Json(s)) => write_var_bytes32(out, s.as_bytes()),
            (DataType::Xml, Value::Xml(s)) => write_var_bytes32(out, s.as_bytes()),
            (DataType::Uuid, Value::Uuid(u)) => out.extend_from_slice(u.as_bytes()),
            (DataType::Geometry, Value::Geometry(wkb)) => write_var_bytes32(out, wkb),
            _ => {
                return Err(DbError::ConstraintViolation(format!(
                    "value {value:?} does not match declared type {ty:?}"
                )))
            }
        }
        Ok(())
    }

    /// Decodes bytes produced by [`Self::serialize`] back into a `Value`.
    pub fn deserialize(bytes: &[u8], ty: DataType) -> Result<Value> {
        let (value, rest) = Self::deserialize_prefix(bytes, ty)?;
        if !rest.is_empty() {
            return Err(DbError::Corruption(format!(
                "{} trailing bytes after decoding {ty:?}",
                rest.len()
            )));
        }
        Ok(value)
    }

    /// Like [`Self::deserialize`] but returns the unconsumed remainder,
    /// used by `TablePage` to walk a sequence of column payloads packed
    /// back-to-back.
    pub fn deserialize_prefix(bytes: &[u8], ty: DataType) -> Result<(Value, &[u8])> {
        let (flag, rest) = take(bytes, 1)?;
        if flag[0] == NULL_FLAG {
            return Ok((Value::Null, rest));
        }
        Self::deserialize_payload(rest, ty)
    }

    fn deserialize_payload(bytes: &[u8], ty: DataType) -> Result<(Value, &[u8])> {
        Ok(match ty {
            DataType::TinyInt => {
                let (b, rest) = take(bytes, 1)?;
                (Value::TinyInt(b[0] as i8), rest)
            }
            DataType::SmallInt => {
                let (b, rest) = take(bytes, 2)?;
                (Value::SmallInt(i16::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Int => {
                let (b, rest) = take(bytes, 4)?;
                (Value::Int(i32::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::BigInt => {
                let (b, rest) = take(bytes, 8)?;
                (Value::BigInt(i64::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Float => {
                let (b, rest) = take(bytes, 4)?;
                (Value::Float(f32::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Double => {
                let (b, rest) = take(bytes, 8)?;
                (Value::Double(f64::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Decimal { .. } => {
                let (s, rest) = read_var_string16(bytes)?;
                (Value::Decimal(s), rest)
            }
            DataType::Char(n) => {
                let (s, rest) = read_fixed_string(bytes, n as usize)?;
                (Value::Char(s), rest)
            }
            DataType::Varchar(_) => {
                let (s, rest) = read_var_string16(bytes)?;
                (Value::Varchar(s), rest)
            }
            DataType::Text => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Text(String::from_utf8_lossy(&b).into_owned()), rest)
            }
            DataType::Binary(n) => {
                let (b, rest) = take(bytes, n as usize)?;
                (Value::Binary(b.to_vec()), rest)
            }
            DataType::Varbinary => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Binary(b), rest)
            }
            DataType::Blob => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Blob(b), rest)
            }
            DataType::Date => {
                let (b, rest) = take(bytes, 4)?;
                (Value::Date(i32::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Time => {
                let (b, rest) = take(bytes, 4)?;
                (Value::Time(i32::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::DateTime => {
                let (b, rest) = take(bytes, 8)?;
                (Value::DateTime(i64::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Timestamp => {
                let (b, rest) = take(bytes, 8)?;
                (Value::Timestamp(i64::from_le_bytes(b.try_into().unwrap())), rest)
            }
            DataType::Boolean => {
                let (b, rest) = take(bytes, 1)?;
                (Value::Boolean(b[0] != 0), rest)
            }
            DataType::Json => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Json(String::from_utf8_lossy(&b).into_owned()), rest)
            }
            DataType::Xml => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Xml(String::from_utf8_lossy(&b).into_owned()), rest)
            }
            DataType::Uuid => {
                let (b, rest) = take(bytes, 16)?;
                (Value::Uuid(uuid::Uuid::from_slice(b).unwrap()), rest)
            }
            DataType::Geometry => {
                let (b, rest) = read_var_bytes32(bytes)?;
                (Value::Geometry(b), rest)
            }
        })
    }

    /// Total encoded size in bytes, including the null flag.
    pub fn serialized_size(value: &Value, ty: DataType) -> Result<usize> {
        Ok(Self::serialize(value, ty)?.len())
    }

    pub fn is_fixed_length(ty: DataType) -> bool {
        ty.fixed_size().is_some()
    }
}

fn take(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8])> {
    if bytes.len() < n {
        return Err(DbError::Corruption(format!(
            "expected {n} bytes, found {}",
            bytes.len()
        )));
    }
    Ok(bytes.split_at(n))
}

fn write_var_string16(out: &mut Vec<u8>, s: &str) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(DbError::ConstraintViolation("string exceeds u16 length prefix".into()));
    }
    out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn read_var_string16(bytes: &[u8]) -> Result<(String, &[u8])> {
    let (len_bytes, rest) = take(bytes, 2)?;
    let len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    let (data, rest) = take(rest, len)?;
    Ok((String::from_utf8_lossy(data).into_owned(), rest))
}

fn write_var_bytes32(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_var_bytes32(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let (len_bytes, rest) = take(bytes, 4)?;
    let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    let (data, rest) = take(rest, len)?;
    Ok((data.to_vec(), rest))
}

fn write_fixed_padded(out: &mut Vec<u8>, s: &str, n: usize) -> Result<()> {
    if s.len() > n {
        return Err(DbError::ConstraintViolation(format!(
            "char value exceeds declared length {n}"
        )));
    }
    out.extend_from_slice(s.as_bytes());
    out.resize(out.len() + (n - s.len()), b' ');
    Ok(())
}

fn read_fixed_string(bytes: &[u8], n: usize) -> Result<(String, &[u8])> {
    let (data, rest) = take(bytes, n)?;
    Ok((String::from_utf8_lossy(data).into_owned(), rest))
}

fn write_fixed_padded_bytes(out: &mut Vec<u8>, b: &[u8], n: usize) -> Result<()> {
    if b.len() > n {
        return Err(DbError::ConstraintViolation(format!(
            "binary value exceeds declared length {n}"
        )));
    }
    out.extend_from_slice(b);
    out.resize(out.len() + (n - b.len()), 0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip() {
        for (ty, v) in [
            (DataType::TinyInt, Value::TinyInt(-12)),
            (DataType::SmallInt, Value::SmallInt(-1234)),
            (DataType::Int, Value::Int(-123_456)),
            (DataType::BigInt, Value::BigInt(i64::MIN)),
        ] {
            let bytes = TypeSerializer::serialize(&v, ty).unwrap();
            assert_eq!(TypeSerializer::deserialize(&bytes, ty).unwrap(), v);
        }
    }

    #[test]
    fn null_round_trips_for_any_type() {
        let bytes = TypeSerializer::serialize(&Value::Null, DataType::Int).unwrap();
        assert_eq!(bytes, vec![NULL_FLAG]);
        assert_eq!(TypeSerializer::deserialize(&bytes, DataType::Int).unwrap(), Value::Null);
    }

    #[test]
    fn varchar_round_trips_and_rejects_overflow() {
        let v = Value::Varchar("hello".into());
        let bytes = TypeSerializer::serialize(&v, DataType::Varchar(10)).unwrap();
        assert_eq!(TypeSerializer::deserialize(&bytes, DataType::Varchar(10)).unwrap(), v);

        let too_long = Value::Varchar("this is way too long".into());
        assert!(TypeSerializer::serialize(&too_long, DataType::Varchar(4)).is_err());
    }

    #[test]
    fn char_pads_with_trailing_spaces() {
        let v = Value::Char("ab".into());
        let bytes = TypeSerializer::serialize(&v, DataType::Char(5)).unwrap();
        let back = TypeSerializer::deserialize(&bytes, DataType::Char(5)).unwrap();
        assert_eq!(back, Value::Char("ab   ".into()));
    }

    #[test]
    fn uuid_round_trips() {
        let u = uuid::Uuid::new_v4();
        let v = Value::Uuid(u);
        let bytes = TypeSerializer::serialize(&v, DataType::Uuid).unwrap();
        assert_eq!(bytes.len(), 17);
        assert_eq!(TypeSerializer::deserialize(&bytes, DataType::Uuid).unwrap(), v);
    }

    #[test]
    fn blob_round_trips_with_u32_prefix() {
        let v = Value::Blob(vec![1, 2, 3, 4, 5]);
        let bytes = TypeSerializer::serialize(&v, DataType::Blob).unwrap();
        assert_eq!(TypeSerializer::deserialize(&bytes, DataType::Blob).unwrap(), v);
    }
}
