use std::sync::Arc;

use crate::error::{Result, SqlHelperError};
use crate::traits::ColumnIndex;
use crate::types::{FromSqlValue, SqlValue};

/// A single row fetched from a command's result.
/// Column names are shared by every row of the same result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Creates a new Row from shared column names and values in column order.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Reads a column as `T`.
    ///
    /// Fails with `ColumnNotFound` for an unknown column, `UnexpectedNull`
    /// when a NULL is read into a non-`Option` type and `TypeMismatch` when
    /// the stored value cannot convert.
    pub fn get<T: FromSqlValue, I: ColumnIndex>(&self, index: I) -> Result<T> {
        let value = self.get_value(&index)?;
        T::from_sql_value(value, &index.describe())
    }

    /// Reads a column as `T`, returning `None` when the column is absent.
    pub fn try_get_opt<T: FromSqlValue, I: ColumnIndex>(&self, index: I) -> Result<Option<T>> {
        match index.position(&self.columns).and_then(|pos| self.values.get(pos)) {
            Some(value) => T::from_sql_value(value, &index.describe()).map(Some),
            None => Ok(None),
        }
    }

    /// Gets the raw value of a column.
    pub fn get_value<I: ColumnIndex>(&self, index: I) -> Result<&SqlValue> {
        index
            .position(&self.columns)
            .and_then(|pos| self.values.get(pos))
            .ok_or_else(|| SqlHelperError::ColumnNotFound(index.describe()))
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One result set: column names plus the rows that share them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Row>,
}

impl ResultSet {
    /// Builds a result set from column names and value rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        let columns: Arc<[String]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect();
        Self { columns, rows }
    }

    /// Builds a result set from rows that already share `columns`.
    pub(crate) fn from_rows(columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Returns the column names from this result.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns a reference to the rows without consuming the result.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Returns all rows from the result.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// Returns the number of rows in this result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this result contains no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Every result set returned by one command, in the order the server sent
/// them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    tables: Vec<ResultSet>,
}

impl DataSet {
    pub fn new(tables: Vec<ResultSet>) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &[ResultSet] {
        &self.tables
    }

    pub fn into_tables(self) -> Vec<ResultSet> {
        self.tables
    }

    /// Gets the result set at `index`, if the command produced one.
    pub fn table(&self, index: usize) -> Option<&ResultSet> {
        self.tables.get(index)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        ResultSet::new(
            vec!["Id".to_string(), "Name".to_string()],
            vec![
                vec![SqlValue::Int32(1), SqlValue::Text("John".to_string())],
                vec![SqlValue::Int32(2), SqlValue::Null],
            ],
        )
    }

    #[test]
    fn test_row_get_by_name_and_index() {
        let result = sample();
        let row = &result.rows()[0];

        assert_eq!(row.get::<i32, _>("Id").unwrap(), 1);
        assert_eq!(row.get::<String, _>(1).unwrap(), "John");
        assert_eq!(row.get::<i64, _>("id").unwrap(), 1);
        assert!(matches!(
            row.get::<i32, _>("missing"),
            Err(SqlHelperError::ColumnNotFound(_))
        ));
        assert!(matches!(
            row.get::<i32, _>(5usize),
            Err(SqlHelperError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_row_null_handling() {
        let result = sample();
        let row = &result.rows()[1];

        assert_eq!(row.get::<Option<String>, _>("Name").unwrap(), None);
        assert!(matches!(
            row.get::<String, _>("Name"),
            Err(SqlHelperError::UnexpectedNull(_))
        ));
    }

    #[test]
    fn test_row_try_get_opt_missing_column() {
        let result = sample();
        let row = &result.rows()[0];

        assert_eq!(row.try_get_opt::<i32, _>("Age").unwrap(), None);
        assert_eq!(row.try_get_opt::<i32, _>("Id").unwrap(), Some(1));
    }

    #[test]
    fn test_result_set_shares_columns() {
        let result = sample();
        assert_eq!(result.len(), 2);
        assert_eq!(result.columns(), result.rows()[1].columns());
        assert!(ResultSet::empty().is_empty());
    }
}
