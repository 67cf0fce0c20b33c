//! Column values and parameter handling.
//!
//! Every value written through the [`QueryRunner`](crate::QueryRunner) is
//! bound as a parameter; values are never spliced into SQL text.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row, TypeInfo, ValueRef};

use crate::metadata::ColumnType;

/// A column value held by an entity or bound to a statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f64),
    /// Text value. Also carries `decimal` and `simple-array` columns.
    Text(String),
    /// JSON document, stored as text.
    Json(serde_json::Value),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
    /// Time of day.
    Time(NaiveTime),
    /// Binary blob value.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Builds a `simple-array` value: elements joined by commas.
    #[must_use]
    pub fn simple_array<S: AsRef<str>>(items: &[S]) -> Self {
        Self::Text(
            items
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Splits a `simple-array` value back into its elements.
    #[must_use]
    pub fn as_simple_array(&self) -> Option<Vec<String>> {
        match self {
            Self::Text(s) if s.is_empty() => Some(Vec::new()),
            Self::Text(s) => Some(s.split(',').map(str::to_string).collect()),
            _ => None,
        }
    }

    /// Reads column `index` of a row, using the storage class SQLite reports.
    pub fn from_row(row: &SqliteRow, index: usize) -> Result<Self, sqlx::Error> {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Self::Null);
        }
        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "INT8" | "BIGINT" | "BOOLEAN" => {
                Self::Int(row.try_get_unchecked::<i64, _>(index)?)
            }
            "REAL" | "FLOAT" | "DOUBLE" => Self::Float(row.try_get_unchecked::<f64, _>(index)?),
            "BLOB" => Self::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
            _ => Self::Text(row.try_get_unchecked::<String, _>(index)?),
        };
        Ok(value)
    }

    /// Converts a raw storage value into the logical type of a column.
    ///
    /// Values that do not parse are returned unchanged.
    #[must_use]
    pub fn coerce(self, ty: ColumnType) -> Self {
        match (ty, self) {
            (ColumnType::Boolean, Self::Int(i)) => Self::Bool(i != 0),
            (ColumnType::Float, Self::Int(i)) => {
                #[allow(clippy::cast_precision_loss)]
                let f = i as f64;
                Self::Float(f)
            }
            (ColumnType::Json, Self::Text(s)) => match serde_json::from_str(&s) {
                Ok(json) => Self::Json(json),
                Err(_) => Self::Text(s),
            },
            (ColumnType::Date, Self::Text(s)) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(d) => Self::Date(d),
                Err(_) => Self::Text(s),
            },
            (ColumnType::DateTime, Self::Text(s)) => {
                match NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f") {
                    Ok(dt) => Self::DateTime(dt),
                    Err(_) => Self::Text(s),
                }
            }
            (ColumnType::Time, Self::Text(s)) => match NaiveTime::parse_from_str(&s, "%H:%M:%S%.f")
            {
                Ok(t) => Self::Time(t),
                Err(_) => Self::Text(s),
            },
            (_, other) => other,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::DateTime(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Self::Time(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Binds a [`Value`] parameter to a query.
pub fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Json(j) => query.bind(j.to_string()),
        Value::Date(d) => query.bind(*d),
        Value::DateTime(dt) => query.bind(*dt),
        Value::Time(t) => query.bind(*t),
        Value::Blob(b) => query.bind(b.clone()),
    }
}
