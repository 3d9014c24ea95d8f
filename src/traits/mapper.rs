use crate::error::Result;
use crate::types::Row;

/// Converts one row into a caller-owned type.
///
/// Any `Fn(&Row) -> Result<T>` is a mapper, so closures and `T::from_row`
/// can be passed directly.
pub trait RowMapper<T>: Send + Sync {
    fn map_row(&self, row: &Row) -> Result<T>;
}

impl<T, F> RowMapper<T> for F
where
    F: Fn(&Row) -> Result<T> + Send + Sync,
{
    fn map_row(&self, row: &Row) -> Result<T> {
        self(row)
    }
}

/// Types that know how to build themselves from a row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self>;
}
