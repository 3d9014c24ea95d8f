//! Page-at-a-time reads, for stored procedures that window their own
//! results and for plain SQL queries.

use tracing::{debug, warn};

use crate::client::SqlHelper;
use crate::error::{Result, SqlHelperError};
use crate::traits::RowMapper;
use crate::types::{OutputSpec, PagedResult, Params, Row, SqlType};

/// Input the procedure receives the requested page number in.
pub const PAGE_NUMBER_PARAM: &str = "@PageNumber";
/// Input the procedure receives the page size in.
pub const PAGE_SIZE_PARAM: &str = "@PageSize";
/// Output the procedure reports the unfiltered row count in.
pub const TOTAL_RECORDS_PARAM: &str = "@TotalRecords";

fn validate_page(page_number: i32, page_size: i32) -> Result<()> {
    if page_number < 1 {
        return Err(SqlHelperError::InvalidArgument(format!(
            "page number must be at least 1, got {}",
            page_number
        )));
    }
    if page_size < 1 {
        return Err(SqlHelperError::InvalidArgument(format!(
            "page size must be at least 1, got {}",
            page_size
        )));
    }
    Ok(())
}

/// Appends an OFFSET/FETCH window ordered by the first projected column.
///
/// The window goes on its own line so a trailing `--` comment in the base
/// query cannot swallow it.
pub fn paged_sql(base_sql: &str, page_number: i32, page_size: i32) -> String {
    let offset = (i64::from(page_number) - 1) * i64::from(page_size);
    let base = base_sql.trim_end().trim_end_matches(';').trim_end();
    format!(
        "{}\nORDER BY 1 OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
        base, offset, page_size
    )
}

impl SqlHelper {
    /// Reads one page from a stored procedure.
    ///
    /// The procedure receives `@PageNumber` and `@PageSize`, must apply the
    /// window itself, and must set the `@TotalRecords` output to the
    /// unfiltered row count.
    ///
    /// With [`TokioPostgresDriver`](crate::drivers::TokioPostgresDriver) the
    /// total is read from a `totalrecords` column of the returned rows. A
    /// page past the end returns no rows, so it reports zero records and zero
    /// pages while `has_previous_page` is still set.
    pub async fn execute_stored_procedure_paginated<T, M>(
        &self,
        name: &str,
        page_number: i32,
        page_size: i32,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<PagedResult<T>>
    where
        M: RowMapper<T>,
    {
        self.connection_string()?;
        validate_page(page_number, page_size)?;

        let mut inputs = params.cloned().unwrap_or_default();
        inputs.push(PAGE_NUMBER_PARAM, page_number);
        inputs.push(PAGE_SIZE_PARAM, page_size);
        let outputs = OutputSpec::new().with(TOTAL_RECORDS_PARAM, SqlType::Int32);

        let result = self
            .execute_stored_procedure_with_output(name, Some(&inputs), &outputs, mapper)
            .await?;
        let total_records = result
            .output_values
            .get::<Option<i64>>(TOTAL_RECORDS_PARAM)
            .map_err(|e| e.in_command(name))?
            .unwrap_or_else(|| {
                warn!(command = %name, "procedure left @TotalRecords unset; counting zero records");
                0
            });

        debug!(command = %name, page_number, page_size, total_records, "page read");
        Ok(PagedResult::new(result.data, page_number, page_size, total_records))
    }

    /// Reads one page of a SQL query.
    ///
    /// `count_sql` must return the total row count in the first column of
    /// its first row. `base_sql` gets an OFFSET/FETCH window appended and is
    /// ordered by its first column, which must give a stable order. Both
    /// commands receive the same parameters.
    pub async fn execute_query_paginated<T, M>(
        &self,
        base_sql: &str,
        count_sql: &str,
        page_number: i32,
        page_size: i32,
        params: Option<&Params>,
        mapper: M,
    ) -> Result<PagedResult<T>>
    where
        M: RowMapper<T>,
    {
        self.connection_string()?;
        validate_page(page_number, page_size)?;

        let total_records = self
            .execute_query_single(count_sql, params, |row: &Row| row.get::<Option<i64>, _>(0))
            .await?
            .flatten()
            .unwrap_or(0);

        let sql = paged_sql(base_sql, page_number, page_size);
        let data = self.execute_query_list(&sql, params, mapper).await?;

        debug!(command = %base_sql, page_number, page_size, total_records, "page read");
        Ok(PagedResult::new(data, page_number, page_size, total_records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paged_sql() {
        assert_eq!(
            paged_sql("SELECT Id, Name FROM Users", 1, 10),
            "SELECT Id, Name FROM Users\nORDER BY 1 OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(
            paged_sql("SELECT Id FROM Users;  \n", 3, 25),
            "SELECT Id FROM Users\nORDER BY 1 OFFSET 50 ROWS FETCH NEXT 25 ROWS ONLY"
        );
    }

    #[test]
    fn test_paged_sql_after_line_comment() {
        let sql = paged_sql("SELECT Id FROM Users -- active only", 2, 10);
        let window = sql.lines().last().unwrap();
        assert_eq!(window, "ORDER BY 1 OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY");
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(1, 1).is_ok());
        assert!(matches!(
            validate_page(0, 10),
            Err(SqlHelperError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_page(1, 0),
            Err(SqlHelperError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_page(-3, -1),
            Err(SqlHelperError::InvalidArgument(_))
        ));
    }
}
