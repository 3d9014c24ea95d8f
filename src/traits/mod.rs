mod column;
mod driver;
mod mapper;

pub use column::ColumnIndex;
pub use driver::{DatabaseDriver, DriverConnection, RowCursor};
pub use mapper::{FromRow, RowMapper};
