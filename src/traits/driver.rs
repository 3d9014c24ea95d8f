use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Command, CommandOutcome, DataSet, OutputValues, Row};

/// Trait for database driver implementations.
/// Drivers are responsible for:
/// - Opening connections from a connection string
/// - Converting named parameters to their native placeholder style
/// - Converting native column values to `SqlValue`
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Open a fresh connection. The connection is released when dropped.
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DriverConnection>>;
}

/// One open connection, used by exactly one call at a time.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a command without reading rows.
    async fn execute_non_query(&mut self, command: &Command) -> Result<CommandOutcome>;

    /// Run a command and return a cursor over its first result set.
    async fn execute_reader<'a>(
        &'a mut self,
        command: &'a Command,
    ) -> Result<Box<dyn RowCursor + 'a>>;

    /// Run a command and collect every result set it returns.
    async fn fill_dataset(&mut self, command: &Command) -> Result<DataSet>;
}

/// Forward-only cursor over the rows of a running command.
#[async_trait]
pub trait RowCursor: Send {
    /// Fetch the next row, or `None` once the result set is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>>;

    /// Drain whatever the command still has to send and return the values of
    /// its output parameters.
    async fn finish(&mut self) -> Result<OutputValues>;
}
