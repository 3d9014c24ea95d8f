use std::fmt;

use crate::error::{Result, SqlHelperError};

/// Represents a SQL parameter or column value in a driver-agnostic way.
/// Drivers are responsible for converting these to and from their native types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// The scalar type tag of this value, or `None` for NULL.
    pub fn sql_type(&self) -> Option<SqlType> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(_) => Some(SqlType::Bool),
            SqlValue::Int32(_) => Some(SqlType::Int32),
            SqlValue::Int64(_) => Some(SqlType::Int64),
            SqlValue::Float64(_) => Some(SqlType::Float64),
            SqlValue::Text(_) => Some(SqlType::Text),
            SqlValue::Bytes(_) => Some(SqlType::Bytes),
        }
    }

    fn type_name(&self) -> &'static str {
        self.sql_type().map_or("NULL", SqlType::name)
    }
}

/// Scalar type tag used to declare output parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Bool,
    Int32,
    Int64,
    Float64,
    Text,
    Bytes,
}

impl SqlType {
    pub fn name(self) -> &'static str {
        match self {
            SqlType::Bool => "bool",
            SqlType::Int32 => "int32",
            SqlType::Int64 => "int64",
            SqlType::Float64 => "float64",
            SqlType::Text => "text",
            SqlType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Bytes(value)
    }
}

impl From<&[u8]> for SqlValue {
    fn from(value: &[u8]) -> Self {
        SqlValue::Bytes(value.to_vec())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Conversion from a column or output value into a Rust type.
///
/// `column` only feeds error messages.
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self>;
}

fn mismatch(column: &str, expected: &'static str, actual: &SqlValue) -> SqlHelperError {
    if actual.is_null() {
        return SqlHelperError::UnexpectedNull(column.to_string());
    }
    SqlHelperError::TypeMismatch {
        column: column.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

impl FromSqlValue for SqlValue {
    fn from_sql_value(value: &SqlValue, _column: &str) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int32(i) => Ok(*i != 0),
            SqlValue::Int64(i) => Ok(*i != 0),
            other => Err(mismatch(column, "bool", other)),
        }
    }
}

impl FromSqlValue for i32 {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Int32(i) => Ok(*i),
            SqlValue::Int64(i) => i32::try_from(*i).map_err(|_| {
                SqlHelperError::Decode(format!("value {i} of column {column} overflows int32"))
            }),
            other => Err(mismatch(column, "int32", other)),
        }
    }
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Int32(i) => Ok(i64::from(*i)),
            SqlValue::Int64(i) => Ok(*i),
            other => Err(mismatch(column, "int64", other)),
        }
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Float64(f) => Ok(*f),
            SqlValue::Int32(i) => Ok(f64::from(*i)),
            SqlValue::Int64(i) => Ok(*i as f64),
            other => Err(mismatch(column, "float64", other)),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            other => Err(mismatch(column, "text", other)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b.clone()),
            other => Err(mismatch(column, "bytes", other)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue, column: &str) -> Result<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other, column).map(Some),
        }
    }
}
