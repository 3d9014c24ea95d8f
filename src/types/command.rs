use std::collections::HashMap;

use crate::error::{Result, SqlHelperError};
use crate::types::{FromSqlValue, SqlType, SqlValue};

/// Whether a command's text is SQL or the name of a stored procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Text,
    StoredProcedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// A named parameter attached to a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: SqlValue,
    pub direction: Direction,
    /// Declared type; always set for output parameters.
    pub sql_type: Option<SqlType>,
}

impl Parameter {
    pub fn input(name: impl Into<String>, value: SqlValue) -> Self {
        Self {
            name: name.into(),
            value,
            direction: Direction::Input,
            sql_type: None,
        }
    }

    pub fn output(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            value: SqlValue::Null,
            direction: Direction::Output,
            sql_type: Some(sql_type),
        }
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }
}

/// A command as handed to a driver: text or procedure name, plus its
/// parameters in attachment order.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<Parameter>,
}

impl Command {
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            kind: CommandKind::Text,
            parameters: Vec::new(),
        }
    }

    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            kind: CommandKind::StoredProcedure,
            parameters: Vec::new(),
        }
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| !p.is_output())
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_output())
    }
}

/// Input parameter set: names mapped to values, kept in insertion order.
///
/// Duplicate names are not rejected here; the database reports them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, SqlValue)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<SqlValue>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Output parameters a stored procedure is expected to populate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputSpec {
    entries: Vec<(String, SqlType)>,
}

impl OutputSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, sql_type: SqlType) -> Self {
        self.entries.push((name.into(), sql_type));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SqlType)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), *t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Values of output parameters after a command has run, keyed by the
/// declared parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputValues {
    values: HashMap<String, SqlValue>,
}

impl OutputValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: SqlValue) {
        self.values.insert(name.into(), value);
    }

    /// Removes and returns the value of an output parameter.
    pub fn take(&mut self, name: &str) -> Option<SqlValue> {
        self.values.remove(name)
    }

    /// Raw value of an output parameter.
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(name)
    }

    /// Reads an output parameter as `T`.
    pub fn get<T: FromSqlValue>(&self, name: &str) -> Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| SqlHelperError::ColumnNotFound(name.to_string()))?;
        T::from_sql_value(value, name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for OutputValues {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// What a non-query execution reports back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutcome {
    pub rows_affected: u64,
    pub output_values: OutputValues,
}
