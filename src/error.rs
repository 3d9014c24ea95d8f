use thiserror::Error;

/// Error type for sqlhelper operations
#[derive(Debug, Error)]
pub enum SqlHelperError {
    #[error("Connection string is not configured")]
    NotConfigured,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// A driver failure, tagged with the command that caused it.
    #[error("Error executing {command}: {source}")]
    Execution {
        command: String,
        #[source]
        source: Box<SqlHelperError>,
    },

    /// A row mapper failed; no rows of the call are returned.
    #[error("Failed mapping row {row} of {command}: {source}")]
    Mapping {
        command: String,
        row: usize,
        #[source]
        source: Box<SqlHelperError>,
    },

    #[error("Cancelled while executing {command}")]
    Cancelled { command: String },

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Unexpected NULL in column {0}")]
    UnexpectedNull(String),

    #[error("Column {column}: expected {expected}, found {actual}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Free-form decoding failure, for use by caller row mappers.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl SqlHelperError {
    /// True for failures raised by a row mapper rather than by the database.
    pub fn is_mapping_error(&self) -> bool {
        matches!(self, SqlHelperError::Mapping { .. })
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, SqlHelperError::NotConfigured)
    }

    /// The command identifier carried by wrapped errors.
    pub fn command(&self) -> Option<&str> {
        match self {
            SqlHelperError::Execution { command, .. }
            | SqlHelperError::Mapping { command, .. }
            | SqlHelperError::Cancelled { command } => Some(command),
            _ => None,
        }
    }

    /// Tags a driver failure with the command that caused it.
    /// Errors that already carry context pass through unchanged.
    pub(crate) fn in_command(self, command: &str) -> Self {
        match self {
            SqlHelperError::Execution { .. }
            | SqlHelperError::Mapping { .. }
            | SqlHelperError::Cancelled { .. }
            | SqlHelperError::NotConfigured
            | SqlHelperError::InvalidArgument(_) => self,
            other => SqlHelperError::Execution {
                command: command.to_string(),
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn mapping(command: &str, row: usize, source: SqlHelperError) -> Self {
        SqlHelperError::Mapping {
            command: command.to_string(),
            row,
            source: Box::new(source),
        }
    }
}

/// Result type alias for sqlhelper operations
pub type Result<T> = std::result::Result<T, SqlHelperError>;
