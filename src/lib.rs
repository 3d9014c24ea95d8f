//! sqlhelper - A thin async helper for running SQL text and stored procedures
//!
//! Executes commands through a pluggable driver, maps rows into caller types,
//! and adds paging, multi-result-set and output-parameter support on top.
//!
//! # Example
//! ```ignore
//! use sqlhelper::{Params, Row, SqlHelper};
//!
//! struct User {
//!     id: i32,
//!     name: String,
//! }
//!
//! let helper = SqlHelper::postgres("host=localhost user=app dbname=app")?;
//!
//! let users = helper
//!     .execute_query_list(
//!         "SELECT id, name FROM users WHERE active = @Active",
//!         Some(&Params::new().with("@Active", true)),
//!         |row: &Row| {
//!             Ok(User {
//!                 id: row.get("id")?,
//!                 name: row.get("name")?,
//!             })
//!         },
//!     )
//!     .await?;
//!
//! let page = helper
//!     .execute_stored_procedure_paginated("get_users_paged", 1, 20, None, |row: &Row| {
//!         row.get::<String, _>("name")
//!     })
//!     .await?;
//! println!("{} of {} pages", page.page_number(), page.total_pages());
//! ```

pub mod binder;
pub mod drivers;
pub mod error;
pub mod paging;
pub mod traits;
pub mod types;

mod client;
mod executor;

// Re-export main types for convenient access
pub use client::SqlHelper;
pub use error::{Result, SqlHelperError};
pub use tokio_util::sync::CancellationToken;
pub use traits::{ColumnIndex, DatabaseDriver, DriverConnection, FromRow, RowCursor, RowMapper};
pub use types::{
    Command, CommandKind, DataSet, FromSqlValue, OutputResult, OutputSpec, OutputValues,
    PagedResult, Params, ResultSet, Row, SqlType, SqlValue,
};
