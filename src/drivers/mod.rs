pub mod placeholders;
#[cfg(feature = "mssql")]
mod tiberius;
mod tokio_postgres;

pub use self::in_memory_test::{InMemoryTestDriver, InMemoryTestResponseBuilder, TestResponse};
#[cfg(feature = "mssql")]
pub use self::tiberius::{MssqlClient, TiberiusDriver};
pub use self::tokio_postgres::TokioPostgresDriver;
