//! Execution primitives: no-result, row-list, single-row, multi-table and
//! output-parameter calls, for SQL text and stored procedures alike.

use tracing::debug;

use crate::binder::{bind_output_parameters, bind_parameters};
use crate::client::SqlHelper;
use crate::error::{Result, SqlHelperError};
use crate::traits::RowMapper;
use crate::types::{
    Command, CommandOutcome, DataSet, OutputResult, OutputSpec, OutputValues, Params, SqlValue,
};

/// How many rows a reader call maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    First,
    All,
}

impl SqlHelper {
    /// Executes SQL text and returns the number of affected rows.
    pub async fn execute_query(&self, sql: &str, params: Option<&Params>) -> Result<u64> {
        let command = self.prepare(Command::text(sql), params)?;
        let outcome = self.run_non_query(&command).await?;
        Ok(outcome.rows_affected)
    }

    /// Executes a stored procedure for its side effects.
    ///
    /// Returns `true` once the procedure has run; failures are errors. Row
    /// counts reported by procedures depend on `SET NOCOUNT` and similar
    /// settings, so they are not surfaced.
    pub async fn execute_stored_procedure(&self, name: &str, params: Option<&Params>) -> Result<bool> {
        let command = self.prepare(Command::stored_procedure(name), params)?;
        self.run_non_query(&command).await?;
        Ok(true)
    }

    /// Executes SQL text and maps every row, in the order the database
    /// returned them.
    pub async fn execute_query_list<T, M>(
        &self,
        sql: &str,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<Vec<T>>
    where
        M: RowMapper<T>,
    {
        let command = self.prepare(Command::text(sql), params)?;
        let (data, _) = self.run_reader(&command, &mapper, Fetch::All, false).await?;
        Ok(data)
    }

    /// Executes a stored procedure and maps every row it returns.
    pub async fn execute_stored_procedure_list<T, M>(
        &self,
        name: &str,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<Vec<T>>
    where
        M: RowMapper<T>,
    {
        let command = self.prepare(Command::stored_procedure(name), params)?;
        let (data, _) = self.run_reader(&command, &mapper, Fetch::All, false).await?;
        Ok(data)
    }

    /// Executes SQL text and maps its first row, if any.
    /// An empty result is `Ok(None)`; rows past the first are never read.
    pub async fn execute_query_single<T, M>(
        &self,
        sql: &str,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<Option<T>>
    where
        M: RowMapper<T>,
    {
        let command = self.prepare(Command::text(sql), params)?;
        let (data, _) = self.run_reader(&command, &mapper, Fetch::First, false).await?;
        Ok(data.into_iter().next())
    }

    /// Executes a stored procedure and maps its first row, if any.
    pub async fn execute_stored_procedure_single<T, M>(
        &self,
        name: &str,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<Option<T>>
    where
        M: RowMapper<T>,
    {
        let command = self.prepare(Command::stored_procedure(name), params)?;
        let (data, _) = self.run_reader(&command, &mapper, Fetch::First, false).await?;
        Ok(data.into_iter().next())
    }

    /// Executes SQL text and returns every result set it produces, unmapped.
    pub async fn execute_query_multiple_tables(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> Result<DataSet> {
        let command = self.prepare(Command::text(sql), params)?;
        self.run_dataset(&command).await
    }

    /// Executes a stored procedure and returns every result set it produces,
    /// unmapped.
    pub async fn execute_stored_procedure_multiple_tables(
        &self,
        name: &str,
        params: Option<&Params>,
    ) -> Result<DataSet> {
        let command = self.prepare(Command::stored_procedure(name), params)?;
        self.run_dataset(&command).await
    }

    /// Executes a stored procedure, maps its rows and reads back the declared
    /// output parameters. Outputs the procedure leaves unset come back as
    /// `SqlValue::Null`.
    pub async fn execute_stored_procedure_with_output<T, M>(
        &self,
        name: &str,
        params: Option<&Params>,
        outputs: &OutputSpec,
        mapper: M,
    ) -> Result<OutputResult<T>>
    where
        M: RowMapper<T>,
    {
        let command = self.prepare_with_outputs(name, params, outputs)?;
        let (data, returned) = self.run_reader(&command, &mapper, Fetch::All, true).await?;
        Ok(OutputResult {
            data,
            output_values: declared_outputs(outputs, returned),
        })
    }

    /// Executes a stored procedure without reading its rows and returns the
    /// declared output parameters.
    pub async fn execute_stored_procedure_output_only(
        &self,
        name: &str,
        params: Option<&Params>,
        outputs: &OutputSpec,
    ) -> Result<OutputResult<()>> {
        let command = self.prepare_with_outputs(name, params, outputs)?;
        let outcome = self.run_non_query(&command).await?;
        Ok(OutputResult {
            data: Vec::new(),
            output_values: declared_outputs(outputs, outcome.output_values),
        })
    }

    /// Checks configuration, then binds the inputs.
    fn prepare(&self, mut command: Command, params: Option<&Params>) -> Result<Command> {
        self.connection_string()?;
        if let Some(params) = params {
            bind_parameters(&mut command, params);
        }
        Ok(command)
    }

    fn prepare_with_outputs(
        &self,
        name: &str,
        params: Option<&Params>,
        outputs: &OutputSpec,
    ) -> Result<Command> {
        let mut command = self.prepare(Command::stored_procedure(name), params)?;
        bind_output_parameters(&mut command, outputs);
        Ok(command)
    }

    async fn run_non_query(&self, command: &Command) -> Result<CommandOutcome> {
        debug!(
            command = %command.text,
            kind = ?command.kind,
            params = command.parameters.len(),
            "executing non-query"
        );
        let mut connection = self.open(&command.text).await?;
        let outcome = self
            .guard(&command.text, connection.execute_non_query(command))
            .await?;
        debug!(command = %command.text, rows_affected = outcome.rows_affected, "non-query completed");
        Ok(outcome)
    }

    /// Streams rows through `mapper`. A mapping failure aborts the call and
    /// discards the rows mapped so far.
    async fn run_reader<T, M>(
        &self,
        command: &Command,
        mapper: &M,
        fetch: Fetch,
        read_outputs: bool,
    ) -> Result<(Vec<T>, OutputValues)>
    where
        M: RowMapper<T>,
    {
        debug!(
            command = %command.text,
            kind = ?command.kind,
            params = command.parameters.len(),
            "executing reader"
        );
        let mut connection = self.open(&command.text).await?;
        let mut cursor = self
            .guard(&command.text, connection.execute_reader(command))
            .await?;

        let mut data = Vec::new();
        while let Some(row) = self.guard(&command.text, cursor.next_row()).await? {
            let item = mapper
                .map_row(&row)
                .map_err(|e| SqlHelperError::mapping(&command.text, data.len(), e))?;
            data.push(item);
            if fetch == Fetch::First {
                break;
            }
        }

        let outputs = if read_outputs {
            self.guard(&command.text, cursor.finish()).await?
        } else {
            OutputValues::new()
        };
        debug!(command = %command.text, rows = data.len(), "reader completed");
        Ok((data, outputs))
    }

    async fn run_dataset(&self, command: &Command) -> Result<DataSet> {
        debug!(
            command = %command.text,
            kind = ?command.kind,
            params = command.parameters.len(),
            "filling data set"
        );
        let mut connection = self.open(&command.text).await?;
        let data_set = self
            .guard(&command.text, connection.fill_dataset(command))
            .await?;
        debug!(command = %command.text, tables = data_set.len(), "data set filled");
        Ok(data_set)
    }
}

/// One entry per declared output, NULL where the driver reported nothing.
fn declared_outputs(outputs: &OutputSpec, mut returned: OutputValues) -> OutputValues {
    outputs
        .iter()
        .map(|(name, _)| {
            let value = returned.take(name).unwrap_or(SqlValue::Null);
            (name.to_string(), value)
        })
        .collect()
}
