//! Total ordering over [`Value`]s and over their serialized byte form,
//! consistent with [`super::serializer::TypeSerializer`].

use crate::common::{cmp_to_sign, DataType, Value};
use crate::types::serializer::TypeSerializer;
use std::cmp::Ordering;

pub struct KeyComparator;

impl KeyComparator {
    /// Compares two values of the same declared type. Nulls sort below any
    /// non-null value. Floats: NaN sorts above everything, `+0.0 == -0.0`.
    /// `CHAR` strings compare with trailing spaces trimmed; all other
    /// strings compare lexicographically by UTF-8 byte.
    pub fn compare(a: &Value, b: &Value, ty: DataType) -> i32 {
        cmp_to_sign(Self::compare_ordering(a, b, ty))
    }

    pub fn compare_ordering(a: &Value, b: &Value, ty: DataType) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }

        match ty {
            DataType::TinyInt | DataType::SmallInt | DataType::Int | DataType::BigInt => {
                Self::as_i64(a).cmp(&Self::as_i64(b))
            }
            DataType::Float | DataType::Double => {
                Self::compare_float(Self::as_f64(a), Self::as_f64(b))
            }
            DataType::Decimal { .. } => Self::as_str(a).cmp(Self::as_str(b)),
            DataType::Char(_) => Self::as_str(a).trim_end_matches(' ').cmp(Self::as_str(b).trim_end_matches(' ')),
            DataType::Varchar(_) | DataType::Text | DataType::Json | DataType::Xml => {
                Self::as_str(a).cmp(Self::as_str(b))
            }
            DataType::Binary(_) | DataType::Varbinary | DataType::Blob | DataType::Geometry => {
                Self::as_bytes(a).cmp(Self::as_bytes(b))
            }
            DataType::Date | DataType::Time => Self::as_i64(a).cmp(&Self::as_i64(b)),
            DataType::DateTime | DataType::Timestamp => Self::as_i64(a).cmp(&Self::as_i64(b)),
            DataType::Boolean => Self::as_bool(a).cmp(&Self::as_bool(b)),
            DataType::Uuid => Self::uuid_bytes(a).cmp(&Self::uuid_bytes(b)),
        }
    }

    /// Compares two serialized byte strings by decoding and applying
    /// [`Self::compare_ordering`]. Never raw `memcmp`: float and date-time
    /// byte order does not match numeric order for negative/NaN values.
    pub fn compare_serialized(a: &[u8], b: &[u8], ty: DataType) -> i32 {
        let va = TypeSerializer::deserialize(a, ty).unwrap_or(Value::Null);
        let vb = TypeSerializer::deserialize(b, ty).unwrap_or(Value::Null);
        Self::compare(&va, &vb, ty)
    }

    fn compare_float(a: f64, b: f64) -> Ordering {
        match (a.is_nan(), b.is_nan()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Greater,
            (false, true) => return Ordering::Less,
            (false, false) => {}
        }
        // +0.0 and -0.0 must compare equal; total_cmp would separate them.
        if a == b {
            Ordering::Equal
        } else {
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }

    fn as_i64(v: &Value) -> i64 {
        match v {
            Value::TinyInt(i) => *i as i64,
            Value::SmallInt(i) => *i as i64,
            Value::Int(i) => *i as i64,
            Value::BigInt(i) => *i,
            Value::Date(i) => *i as i64,
            Value::Time(i) => *i as i64,
            Value::DateTime(i) | Value::Timestamp(i) => *i,
            _ => 0,
        }
    }

    fn as_f64(v: &Value) -> f64 {
        match v {
            Value::Float(f) => *f as f64,
            Value::Double(f) => *f,
            _ => 0.0,
        }
    }

    fn as_str(v: &Value) -> &str {
        match v {
            Value::Decimal(s) | Value::Char(s) | Value::Varchar(s) | Value::Text(s) | Value::Json(s) | Value::Xml(s) => s,
            _ => "",
        }
    }

    fn as_bytes(v: &Value) -> &[u8] {
        match v {
            Value::Binary(b) | Value::Blob(b) | Value::Geometry(b) => b,
            _ => &[],
        }
    }

    fn as_bool(v: &Value) -> bool {
        matches!(v, Value::Boolean(true))
    }

    fn uuid_bytes(v: &Value) -> [u8; 16] {
        match v {
            Value::Uuid(u) => *u.as_bytes(),
            _ => [0; 16],
        }
    }

    pub fn is_indexable(ty: DataType) -> bool {
        !matches!(ty, DataType::Json | DataType::Xml | DataType::Geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_below_everything() {
        assert_eq!(KeyComparator::compare(&Value::Null, &Value::Int(0), DataType::Int), -1);
        assert_eq!(KeyComparator::compare(&Value::Int(0), &Value::Null, DataType::Int), 1);
        assert_eq!(KeyComparator::compare(&Value::Null, &Value::Null, DataType::Int), 0);
    }

    #[test]
    fn nan_sorts_above_everything_and_signed_zero_equal() {
        let nan = Value::Double(f64::NAN);
        let big = Value::Double(1e300);
        assert_eq!(KeyComparator::compare(&nan, &big, DataType::Double), 1);
        assert_eq!(
            KeyComparator::compare(&Value::Double(0.0), &Value::Double(-0.0), DataType::Double),
            0
        );
    }

    #[test]
    fn char_trims_trailing_spaces() {
        let a = Value::Char("ab  ".into());
        let b = Value::Char("ab".into());
        assert_eq!(KeyComparator::compare(&a, &b, DataType::Char(4)), 0);
    }

    #[test]
    fn compare_serialized_matches_compare_of_values() {
        let a = Value::Int(-5);
        let b = Value::Int(10);
        let sa = TypeSerializer::serialize(&a, DataType::Int).unwrap();
        let sb = TypeSerializer::serialize(&b, DataType::Int).unwrap();
        assert_eq!(
            KeyComparator::compare(&a, &b, DataType::Int).signum(),
            KeyComparator::compare_serialized(&sa, &sb, DataType::Int).signum()
        );
    }
}
