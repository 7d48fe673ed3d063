use std::fmt;

use anyhow::{Result, bail};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Serialize, Serializer};

use crate::types::DataType;

/// Attribute value held by a [`Record`](crate::Record).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// SQL `NULL`, also returned for absent attributes.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Text.
    Text(String),
    /// Binary.
    Bytes(Vec<u8>),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day.
    Time(NaiveTime),
    /// Timestamp without zone (UTC by convention).
    DateTime(NaiveDateTime),
    /// Structured value stored in a JSON column.
    Json(serde_json::Value),
    /// Atomic `column = column + n` marker, persisted by `update` only.
    Increment(i64),
}

impl Value {
    /// Marker that increments a numeric column by `n` on the next update.
    #[must_use]
    pub const fn inc(n: i64) -> Self {
        Self::Increment(n)
    }

    /// Marker that decrements a numeric column by `n` on the next update.
    #[must_use]
    pub const fn dec(n: i64) -> Self {
        Self::Increment(-n)
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns `true` for an increment/decrement marker.
    #[must_use]
    pub const fn is_increment(&self) -> bool {
        matches!(self, Self::Increment(_))
    }

    /// Null, empty text, zero and `false` count as empty key values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(v) => !v,
            Self::Int(v) => *v == 0,
            Self::Text(v) => v.is_empty() || v == "0",
            _ => false,
        }
    }

    /// Integer view, parsing text and truncating floats.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) | Self::Increment(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Bool(v) => Some(i64::from(*v)),
            Self::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(v) => v.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Boolean view.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Key used to match parent and child rows when grouping relation results.
    ///
    /// Integral floats and numeric text compare equal to integers.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn group_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Float(v) if v.fract() == 0.0 => Some((*v as i64).to_string()),
            Self::Bool(v) => Some(i64::from(*v).to_string()),
            Self::Text(v) => Some(v.clone()),
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => f.write_str(&Base64::encode_string(v)),
            Self::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Self::Time(v) => write!(f, "{v}"),
            Self::DateTime(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Increment(v) => write!(f, "{v:+}"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) | Self::Increment(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Json(v) => v.serialize(serializer),
            Self::Text(_)
            | Self::Bytes(_)
            | Self::Date(_)
            | Self::Time(_)
            | Self::DateTime(_) => serializer.collect_str(self),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i8 => Int,
    i16 => Int,
    i32 => Int,
    i64 => Int,
    u8 => Int,
    u16 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value.naive_utc())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// Inbound: driver values before column formatting.
impl From<DataType> for Value {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Boolean(Some(v)) => Self::Bool(v),
            DataType::Int32(Some(v)) => Self::Int(v.into()),
            DataType::Int64(Some(v)) => Self::Int(v),
            DataType::Uint32(Some(v)) => Self::Int(v.into()),
            DataType::Uint64(Some(v)) => i64::try_from(v).map_or(Self::Text(v.to_string()), Self::Int),
            DataType::Float(Some(v)) => Self::Float(v.into()),
            DataType::Double(Some(v)) => Self::Float(v),
            DataType::Str(Some(v)) => Self::Text(v),
            DataType::Binary(Some(v)) => Self::Bytes(v),
            DataType::Date(Some(v)) => parse_date(&v).map_or(Self::Text(v), Self::Date),
            DataType::Time(Some(v)) => parse_time(&v).map_or(Self::Text(v), Self::Time),
            DataType::Timestamp(Some(v)) => parse_datetime(&v).map_or(Self::Text(v), Self::DateTime),
            _ => Self::Null,
        }
    }
}

// Outbound: statement-builder values.
impl From<Value> for sea_query::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::String(None),
            Value::Bool(v) => v.into(),
            Value::Int(v) | Value::Increment(v) => v.into(),
            Value::Float(v) => v.into(),
            Value::Text(v) => v.into(),
            Value::Bytes(v) => v.into(),
            Value::Date(v) => v.into(),
            Value::Time(v) => v.into(),
            Value::DateTime(v) => v.into(),
            Value::Json(v) => v.to_string().into(),
        }
    }
}

/// Converts rendered statement values into bind parameters.
pub(crate) fn values_to_datatypes(values: sea_query::Values) -> Result<Vec<DataType>> {
    values.into_iter().map(value_to_datatype).collect()
}

fn value_to_datatype(value: sea_query::Value) -> Result<DataType> {
    use sea_query::Value as Sv;

    let data_type = match value {
        Sv::Bool(v) => DataType::Boolean(v),
        Sv::TinyInt(v) => DataType::Int32(v.map(i32::from)),
        Sv::SmallInt(v) => DataType::Int32(v.map(i32::from)),
        Sv::Int(v) => DataType::Int32(v),
        Sv::BigInt(v) => DataType::Int64(v),
        Sv::TinyUnsigned(v) => DataType::Uint32(v.map(u32::from)),
        Sv::SmallUnsigned(v) => DataType::Uint32(v.map(u32::from)),
        Sv::Unsigned(v) => DataType::Uint32(v),
        Sv::BigUnsigned(v) => DataType::Uint64(v),
        Sv::Float(v) => DataType::Float(v),
        Sv::Double(v) => DataType::Double(v),
        Sv::String(v) => DataType::Str(v.map(|value| *value)),
        Sv::Char(v) => DataType::Str(v.map(|ch| ch.to_string())),
        Sv::Bytes(v) => DataType::Binary(v.map(|bytes| *bytes)),
        Sv::ChronoDate(v) => DataType::Date(v.map(|date| date.format("%Y-%m-%d").to_string())),
        Sv::ChronoTime(v) => DataType::Time(v.map(|time| time.to_string())),
        Sv::ChronoDateTime(v) => DataType::Timestamp(v.map(|dt| dt.to_string())),
        Sv::ChronoDateTimeUtc(v) => DataType::Timestamp(v.map(|dt| dt.to_rfc3339())),
        _ => bail!("unsupported value type in statement parameters"),
    };
    Ok(data_type)
}

pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_datetime(raw).map(|dt| dt.date()))
}

pub(crate) fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

pub(crate) fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(parsed);
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.naive_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_into_value() {
        assert_eq!(Value::from(DataType::Int64(Some(7))), Value::Int(7));
        assert_eq!(Value::from(DataType::Str(None)), Value::Null);
        assert_eq!(
            Value::from(DataType::Timestamp(Some("2024-01-15 10:30:45".to_string()))),
            Value::DateTime(
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(10, 30, 45).unwrap()
            )
        );
        assert_eq!(
            Value::from(DataType::Date(Some("not a date".to_string()))),
            Value::Text("not a date".to_string())
        );
    }

    #[test]
    fn value_into_params() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let values = sea_query::Values(vec![
            Value::Int(42).into(),
            Value::Null.into(),
            Value::Date(date).into(),
            Value::Json(serde_json::json!({"a": 1})).into(),
        ]);

        let params = values_to_datatypes(values).unwrap();
        assert_eq!(params[0], DataType::Int64(Some(42)));
        assert_eq!(params[1], DataType::Str(None));
        assert_eq!(params[2], DataType::Date(Some("2024-01-15".to_string())));
        assert_eq!(params[3], DataType::Str(Some(r#"{"a":1}"#.to_string())));
    }

    #[test]
    fn parses_timestamp_forms() {
        let expected =
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(10, 30, 45).unwrap();
        assert_eq!(parse_datetime("2024-01-15 10:30:45"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15T10:30:45"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15T10:30:45Z"), Some(expected));
        assert_eq!(
            parse_datetime("2024-01-15"),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn group_keys_match_across_representations() {
        assert_eq!(Value::Int(1).group_key(), Value::Text("1".to_string()).group_key());
        assert_eq!(Value::Int(1).group_key(), Value::Float(1.0).group_key());
        assert_eq!(Value::Null.group_key(), None);
    }

    #[test]
    fn serializes_to_json() {
        let bytes = serde_json::to_value(Value::Bytes(vec![1, 2, 3])).unwrap();
        assert_eq!(bytes, serde_json::json!("AQID"));
        assert_eq!(serde_json::to_value(Value::Null).unwrap(), serde_json::Value::Null);
        assert_eq!(serde_json::to_value(Value::Int(5)).unwrap(), serde_json::json!(5));
    }
}
