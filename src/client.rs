use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::drivers::TokioPostgresDriver;
use crate::error::{Result, SqlHelperError};
use crate::traits::{DatabaseDriver, DriverConnection};

/// Main entry point for sqlhelper.
///
/// Holds the driver and the connection string every call connects with.
/// The handle is immutable and cheap to clone; build a new one to point at a
/// different database.
#[derive(Clone)]
pub struct SqlHelper {
    driver: Arc<dyn DatabaseDriver>,
    connection_string: Option<Arc<str>>,
    cancel: Option<CancellationToken>,
}

impl SqlHelper {
    /// Create a helper for a PostgreSQL database.
    ///
    /// # Example
    /// ```ignore
    /// let helper = SqlHelper::postgres("host=localhost user=app dbname=app")?;
    /// ```
    pub fn postgres(connection_string: &str) -> Result<Self> {
        Self::with_driver(Arc::new(TokioPostgresDriver::new())).configure(connection_string)
    }

    /// Create a helper for a SQL Server database.
    ///
    /// # Example
    /// ```ignore
    /// let helper = SqlHelper::mssql("server=tcp:localhost,1433;user=sa;password=...")?;
    /// ```
    #[cfg(feature = "mssql")]
    pub fn mssql(connection_string: &str) -> Result<Self> {
        Self::with_driver(Arc::new(crate::drivers::TiberiusDriver::new()))
            .configure(connection_string)
    }

    /// Create an unconfigured helper over a custom driver.
    /// Useful for testing or using alternative database drivers.
    pub fn with_driver(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            connection_string: None,
            cancel: None,
        }
    }

    /// Set the connection string used by every call.
    ///
    /// Fails with `InvalidArgument` when the string is empty or whitespace.
    pub fn configure(mut self, connection_string: &str) -> Result<Self> {
        if connection_string.trim().is_empty() {
            return Err(SqlHelperError::InvalidArgument(
                "connection string cannot be empty".to_string(),
            ));
        }
        self.connection_string = Some(Arc::from(connection_string));
        Ok(self)
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string
            .as_deref()
            .is_some_and(|cs| !cs.trim().is_empty())
    }

    /// Returns a helper whose calls stop at the next open, execute or fetch
    /// step once `token` is cancelled. The connection is still released.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancel: Some(token),
            ..self.clone()
        }
    }

    pub(crate) fn connection_string(&self) -> Result<&str> {
        match self.connection_string.as_deref() {
            Some(cs) if !cs.trim().is_empty() => Ok(cs),
            _ => Err(SqlHelperError::NotConfigured),
        }
    }

    /// Opens a connection for one call.
    pub(crate) async fn open(&self, command: &str) -> Result<Box<dyn DriverConnection>> {
        let connection_string = self.connection_string()?;
        self.guard(command, self.driver.open(connection_string))
            .await
    }

    /// Runs one driver step, racing the cancellation token when one is set,
    /// and tags failures with the command.
    pub(crate) async fn guard<T, F>(&self, command: &str, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result = match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SqlHelperError::Cancelled {
                        command: command.to_string(),
                    }),
                    result = step => result,
                }
            }
            None => step.await,
        };
        result.map_err(|e| e.in_command(command))
    }
}

impl fmt::Debug for SqlHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlHelper")
            .field("configured", &self.is_configured())
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::InMemoryTestDriver;

    fn helper() -> SqlHelper {
        SqlHelper::with_driver(Arc::new(InMemoryTestDriver::new()))
    }

    #[test]
    fn test_configure_rejects_blank() {
        for blank in ["", "   ", "\t\n"] {
            match helper().configure(blank) {
                Err(SqlHelperError::InvalidArgument(_)) => {}
                other => panic!("Expected InvalidArgument, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_configure_is_idempotent() {
        let once = helper().configure("db://one").unwrap();
        let twice = once.clone().configure("db://one").unwrap();
        assert_eq!(once.connection_string().unwrap(), "db://one");
        assert_eq!(twice.connection_string().unwrap(), "db://one");
    }

    #[test]
    fn test_unconfigured_helper() {
        let helper = helper();
        assert!(!helper.is_configured());
        assert!(matches!(
            helper.connection_string(),
            Err(SqlHelperError::NotConfigured)
        ));
    }

    #[test]
    fn test_debug_hides_connection_string() {
        let helper = helper().configure("password=secret").unwrap();
        let printed = format!("{:?}", helper);
        assert!(!printed.contains("secret"));
    }
}
