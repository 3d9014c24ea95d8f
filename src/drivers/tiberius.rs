//! SQL Server driver using tiberius.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::{Client, ColumnData, Config, IntoSql, Query, QueryItem, QueryStream};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::drivers::placeholders::{bare_name, positional_values, translate_named, PlaceholderStyle};
use crate::error::{Result, SqlHelperError};
use crate::traits::{DatabaseDriver, DriverConnection, RowCursor};
use crate::types::{
    Command, CommandKind, CommandOutcome, DataSet, OutputValues, ResultSet, Row, SqlType, SqlValue,
};

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Column alias prefix of the trailing row that carries output values.
const OUTPUT_PREFIX: &str = "__out_";

/// SQL Server driver. The connection string uses ADO.NET syntax
/// (`server=tcp:localhost,1433;database=app;user=sa;password=...`).
///
/// Stored procedures run as an `EXEC` batch: output parameters are bound to
/// `DECLARE`d variables and selected back in a final result set whose
/// columns use the reserved `__out_` prefix.
#[derive(Debug, Default, Clone)]
pub struct TiberiusDriver;

impl TiberiusDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseDriver for TiberiusDriver {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DriverConnection>> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| SqlHelperError::ConnectionFailed(e.to_string()))?;

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SqlHelperError::ConnectionFailed(format!("TCP connection error: {e}")))?;
        tcp.set_nodelay(true)
            .map_err(|e| SqlHelperError::ConnectionFailed(e.to_string()))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| SqlHelperError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("connected to SQL Server");
        Ok(Box::new(MssqlConnection { client }))
    }
}

struct MssqlConnection {
    client: MssqlClient,
}

/// Owned parameter value handed to tiberius.
#[derive(Debug)]
struct MssqlParam(SqlValue);

impl<'a> IntoSql<'a> for MssqlParam {
    fn into_sql(self) -> ColumnData<'a> {
        match self.0 {
            SqlValue::Null => ColumnData::String(None),
            SqlValue::Bool(b) => ColumnData::Bit(Some(b)),
            SqlValue::Int32(i) => ColumnData::I32(Some(i)),
            SqlValue::Int64(i) => ColumnData::I64(Some(i)),
            SqlValue::Float64(f) => ColumnData::F64(Some(f)),
            SqlValue::Text(s) => ColumnData::String(Some(Cow::Owned(s))),
            SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Owned(b))),
        }
    }
}

fn tsql_type(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Bool => "BIT",
        SqlType::Int32 => "INT",
        SqlType::Int64 => "BIGINT",
        SqlType::Float64 => "FLOAT",
        SqlType::Text => "NVARCHAR(MAX)",
        SqlType::Bytes => "VARBINARY(MAX)",
    }
}

/// Builds the T-SQL batch for a command along with its positional values.
fn build_batch(command: &Command) -> Result<(String, Vec<SqlValue>)> {
    match command.kind {
        CommandKind::Text => {
            let (sql, names) = translate_named(&command.text, PlaceholderStyle::Mssql);
            Ok((sql, positional_values(command, &names)?))
        }
        CommandKind::StoredProcedure => {
            let mut batch = String::new();
            let mut args = Vec::new();
            let mut values = Vec::new();
            let mut selects = Vec::new();

            for param in command.inputs() {
                values.push(param.value.clone());
                args.push(format!("@{} = @P{}", bare_name(&param.name), values.len()));
            }
            for (i, param) in command.outputs().enumerate() {
                let var = format!("@{}{}", OUTPUT_PREFIX, i);
                let sql_type = param.sql_type.unwrap_or(SqlType::Text);
                batch.push_str(&format!("DECLARE {} {};\n", var, tsql_type(sql_type)));
                args.push(format!("@{} = {} OUTPUT", bare_name(&param.name), var));
                selects.push(format!("{} AS [{}{}]", var, OUTPUT_PREFIX, i));
            }

            batch.push_str(&format!("EXEC {} {};", command.text, args.join(", ")));
            if !selects.is_empty() {
                batch.push_str(&format!("\nSELECT {};", selects.join(", ")));
            }
            Ok((batch, values))
        }
    }
}

fn query_for(sql: String, values: Vec<SqlValue>) -> Query<'static> {
    let mut query = Query::new(sql);
    for value in values {
        query.bind(MssqlParam(value));
    }
    query
}

fn query_error(e: tiberius::error::Error) -> SqlHelperError {
    SqlHelperError::QueryFailed(e.to_string())
}

fn is_output_columns(columns: &[tiberius::Column]) -> bool {
    columns
        .first()
        .is_some_and(|c| c.name().starts_with(OUTPUT_PREFIX))
}

/// Maps the `__out_N` columns of the trailing row back to declared names.
fn capture_outputs(command: &Command, row: &Row, captured: &mut OutputValues) {
    for (i, param) in command.outputs().enumerate() {
        if let Ok(value) = row.get_value(format!("{}{}", OUTPUT_PREFIX, i)) {
            captured.insert(param.name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl DriverConnection for MssqlConnection {
    async fn execute_non_query(&mut self, command: &Command) -> Result<CommandOutcome> {
        let (sql, values) = build_batch(command)?;
        let query = query_for(sql, values);

        if command.outputs().next().is_none() {
            let result = query.execute(&mut self.client).await.map_err(query_error)?;
            return Ok(CommandOutcome {
                rows_affected: result.rows_affected().iter().sum(),
                output_values: OutputValues::new(),
            });
        }

        let results = query
            .query(&mut self.client)
            .await
            .map_err(query_error)?
            .into_results()
            .await
            .map_err(query_error)?;

        let mut output_values = OutputValues::new();
        for tib_row in results.into_iter().flatten() {
            if is_output_columns(tib_row.columns()) {
                let row = convert_row(tib_row)?;
                capture_outputs(command, &row, &mut output_values);
            }
        }
        Ok(CommandOutcome {
            rows_affected: 0,
            output_values,
        })
    }

    async fn execute_reader<'a>(
        &'a mut self,
        command: &'a Command,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let (sql, values) = build_batch(command)?;
        let stream = query_for(sql, values)
            .query(&mut self.client)
            .await
            .map_err(query_error)?;

        Ok(Box::new(MssqlCursor {
            command,
            stream,
            data_result: None,
            outputs: OutputValues::new(),
        }))
    }

    async fn fill_dataset(&mut self, command: &Command) -> Result<DataSet> {
        let (sql, values) = build_batch(command)?;
        let mut stream = query_for(sql, values)
            .query(&mut self.client)
            .await
            .map_err(query_error)?;

        let mut sets = Vec::new();
        let mut current: Option<(Arc<[String]>, Vec<Row>)> = None;
        while let Some(item) = stream.try_next().await.map_err(query_error)? {
            match item {
                QueryItem::Metadata(meta) => {
                    if let Some((columns, rows)) = current.take() {
                        sets.push(ResultSet::from_rows(columns, rows));
                    }
                    if !is_output_columns(meta.columns()) {
                        let names: Vec<String> =
                            meta.columns().iter().map(|c| c.name().to_string()).collect();
                        current = Some((names.into(), Vec::new()));
                    }
                }
                QueryItem::Row(tib_row) => {
                    if let Some((columns, rows)) = current.as_mut() {
                        let values = row_values(tib_row)?;
                        rows.push(Row::new(Arc::clone(columns), values));
                    }
                }
            }
        }
        if let Some((columns, rows)) = current.take() {
            sets.push(ResultSet::from_rows(columns, rows));
        }
        Ok(DataSet::new(sets))
    }
}

struct MssqlCursor<'a> {
    command: &'a Command,
    stream: QueryStream<'a>,
    /// Result index of the first non-output result set.
    data_result: Option<usize>,
    outputs: OutputValues,
}

#[async_trait]
impl<'a> RowCursor for MssqlCursor<'a> {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        while let Some(item) = self.stream.try_next().await.map_err(query_error)? {
            let QueryItem::Row(tib_row) = item else {
                continue;
            };
            if is_output_columns(tib_row.columns()) {
                let row = convert_row(tib_row)?;
                capture_outputs(self.command, &row, &mut self.outputs);
                continue;
            }
            let index = tib_row.result_index();
            let data_result = *self.data_result.get_or_insert(index);
            if index == data_result {
                return convert_row(tib_row).map(Some);
            }
        }
        Ok(None)
    }

    async fn finish(&mut self) -> Result<OutputValues> {
        while self.next_row().await?.is_some() {}
        Ok(std::mem::take(&mut self.outputs))
    }
}

fn convert_row(row: tiberius::Row) -> Result<Row> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let values = row_values(row)?;
    Ok(Row::new(columns.into(), values))
}

fn row_values(row: tiberius::Row) -> Result<Vec<SqlValue>> {
    row.into_iter().map(column_data_to_value).collect()
}

/// Convert tiberius ColumnData to a SqlValue
fn column_data_to_value(data: ColumnData<'static>) -> Result<SqlValue> {
    let value = match data {
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::U8(v) => v.map(|i| SqlValue::Int32(i32::from(i))),
        ColumnData::I16(v) => v.map(|i| SqlValue::Int32(i32::from(i))),
        ColumnData::I32(v) => v.map(SqlValue::Int32),
        ColumnData::I64(v) => v.map(SqlValue::Int64),
        ColumnData::F32(v) => v.map(|f| SqlValue::Float64(f64::from(f))),
        ColumnData::F64(v) => v.map(SqlValue::Float64),
        ColumnData::String(v) => v.map(|s| SqlValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| SqlValue::Text(g.to_string())),
        ColumnData::Binary(v) => v.map(|b| SqlValue::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map(|n| SqlValue::Text(n.to_string())),
        ColumnData::Xml(v) => v.map(|x| SqlValue::Text(x.into_owned().into_string())),
        other => {
            return Err(SqlHelperError::Decode(format!(
                "unsupported SQL Server column value {:?}; cast it to text in the query",
                other
            )))
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{bind_output_parameters, bind_parameters};
    use crate::types::{OutputSpec, Params};

    #[test]
    fn test_build_text_batch() {
        let mut command = Command::text("SELECT * FROM Users WHERE Id = @Id");
        bind_parameters(&mut command, &Params::new().with("@Id", 3));

        let (sql, values) = build_batch(&command).unwrap();
        assert_eq!(sql, "SELECT * FROM Users WHERE Id = @P1");
        assert_eq!(values, [SqlValue::Int32(3)]);
    }

    #[test]
    fn test_build_procedure_batch_with_outputs() {
        let mut command = Command::stored_procedure("dbo.GetUsersPaged");
        bind_parameters(
            &mut command,
            &Params::new().with("@PageNumber", 1).with("PageSize", 2),
        );
        bind_output_parameters(
            &mut command,
            &OutputSpec::new().with("@TotalRecords", SqlType::Int32),
        );

        let (sql, values) = build_batch(&command).unwrap();
        assert_eq!(
            sql,
            "DECLARE @__out_0 INT;\n\
             EXEC dbo.GetUsersPaged @PageNumber = @P1, @PageSize = @P2, @TotalRecords = @__out_0 OUTPUT;\n\
             SELECT @__out_0 AS [__out_0];"
        );
        assert_eq!(values, [SqlValue::Int32(1), SqlValue::Int32(2)]);
    }
}
