//! Dynamic column values.
//!
//! [`Value`] is the cell type of a [`Record`](crate::Record). It binds as a
//! statement parameter against the column type the server infers and decodes
//! from the common Postgres scalar, JSON and array types. A value that has no
//! lossless encoding for the inferred type fails with a wrong-type error
//! instead of sending its native bytes.

use bytes::BytesMut;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::error::Error;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, WrongType, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Uuid(Uuid),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Array(_) => "array",
        }
    }

    /// Convert into a JSON document.
    ///
    /// Timestamps become RFC 3339 strings and UUIDs their hyphenated form.
    /// Decimals become JSON numbers, integral ones exactly.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(v) => J::Bool(*v),
            Value::Int(v) => J::from(*v),
            Value::Float(v) => serde_json::Number::from_f64(*v).map_or(J::Null, J::Number),
            Value::Decimal(d) => match d.fract().is_zero().then(|| d.to_i64()).flatten() {
                Some(i) => J::from(i),
                None => d
                    .to_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or(J::Null, J::Number),
            },
            Value::Text(s) => J::String(s.clone()),
            Value::Timestamp(ts) => J::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Uuid(u) => J::String(u.to_string()),
            Value::Json(j) => j.clone(),
            Value::Array(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Convert a JSON document into the closest scalar value.
    ///
    /// Objects stay JSON; arrays become [`Value::Array`].
    pub fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(v) => Value::Bool(v),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Text(s),
            J::Array(items) => Value::Array(items.into_iter().map(Value::from_json).collect()),
            obj @ J::Object(_) => Value::Json(obj),
        }
    }

    /// Hashable key used when stitching related rows onto their parents.
    ///
    /// Returns `None` for NULL, which never matches anything.
    pub(crate) fn join_key(&self) -> Option<JoinKey> {
        Some(match self {
            Value::Null => return None,
            Value::Bool(v) => JoinKey::Bool(*v),
            Value::Int(v) => JoinKey::Int(*v),
            Value::Float(v) => {
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
                    JoinKey::Int(*v as i64)
                } else {
                    JoinKey::Float(v.to_bits())
                }
            }
            Value::Decimal(d) => match d.fract().is_zero().then(|| d.to_i64()).flatten() {
                Some(i) => JoinKey::Int(i),
                None => JoinKey::Float(d.to_f64()?.to_bits()),
            },
            Value::Text(s) => JoinKey::Text(s.clone()),
            Value::Timestamp(ts) => JoinKey::Timestamp(ts.with_timezone(&Utc)),
            Value::Uuid(u) => JoinKey::Uuid(*u),
            Value::Json(j) => JoinKey::Text(j.to_string()),
            Value::Array(items) => {
                JoinKey::Array(items.iter().filter_map(Value::join_key).collect())
            }
        })
    }
}

/// Equality key for join columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum JoinKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Array(Vec<JoinKey>),
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || matches!(ty.kind(), Kind::Enum(_))
}

fn wrong_type(ty: &Type) -> BoxError {
    Box::new(WrongType::new::<Value>(ty.clone()))
}

/// The integer value of an integral float.
fn integral(v: f64, ty: &Type) -> Result<i64, BoxError> {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Ok(v as i64)
    } else {
        Err(wrong_type(ty))
    }
}

fn int_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(v)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(v)?.to_sql(ty, out),
        Type::INT8 => v.to_sql(ty, out),
        Type::OID => u32::try_from(v)?.to_sql(ty, out),
        Type::FLOAT4 => (v as f32).to_sql(ty, out),
        Type::FLOAT8 => (v as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(v).to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::Value::from(v).to_sql(ty, out),
        ref t if is_text(t) => v.to_string().as_str().to_sql(ty, out),
        _ => Err(wrong_type(ty)),
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => match *ty {
                Type::BOOL => v.to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                ref t if is_text(t) => v.to_string().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Int(v) => int_to_sql(*v, ty, out),
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => v.to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*v)?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => int_to_sql(integral(*v, ty)?, ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                ref t if is_text(t) => v.to_string().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT4 => d.to_f32().ok_or_else(|| wrong_type(ty))?.to_sql(ty, out),
                Type::FLOAT8 => d.to_f64().ok_or_else(|| wrong_type(ty))?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 if d.fract().is_zero() => {
                    int_to_sql(d.to_i64().ok_or_else(|| wrong_type(ty))?, ty, out)
                }
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                ref t if is_text(t) => d.to_string().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Text(s) => match *ty {
                ref t if is_text(t) => s.as_str().to_sql(ty, out),
                Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
                Type::NUMERIC => s.trim().parse::<Decimal>()?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
                    int_to_sql(s.trim().parse::<i64>()?, ty, out)
                }
                Type::FLOAT4 | Type::FLOAT8 => Value::Float(s.trim().parse()?).to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMPTZ => ts.to_sql(ty, out),
                Type::TIMESTAMP => ts.naive_local().to_sql(ty, out),
                Type::DATE => ts.date_naive().to_sql(ty, out),
                Type::JSON | Type::JSONB => self.to_json().to_sql(ty, out),
                ref t if is_text(t) => ts.to_rfc3339().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                ref t if is_text(t) => u.to_string().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                ref t if is_text(t) => j.to_string().as_str().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
            Value::Array(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ if matches!(*ty, Type::JSON | Type::JSONB) => self.to_json().to_sql(ty, out),
                _ => Err(wrong_type(ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Decimal(Decimal::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::Timestamp(DateTime::<FixedOffset>::from_sql(ty, raw)?),
            Type::TIMESTAMP => {
                Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?.and_utc().fixed_offset())
            }
            Type::DATE => Value::Timestamp(
                NaiveDate::from_sql(ty, raw)?
                    .and_time(NaiveTime::MIN)
                    .and_utc()
                    .fixed_offset(),
            ),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            ref t if is_text(t) => Value::Text(String::from_sql(ty, raw)?),
            _ => match ty.kind() {
                Kind::Array(_) => Value::Array(Vec::<Value>::from_sql(ty, raw)?),
                Kind::Domain(inner) => Value::from_sql(inner, raw)?,
                _ => return Err(wrong_type(ty)),
            },
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

// ==================== Conversions ====================

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(v.into())
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v.fixed_offset())
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v.and_utc().fixed_offset())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(v: &[T]) -> Self {
        Value::Array(v.iter().cloned().map(Into::into).collect())
    }
}
