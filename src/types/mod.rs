mod command;
mod results;
mod row;
mod sql_value;

pub use command::{
    Command, CommandKind, CommandOutcome, Direction, OutputSpec, OutputValues, Parameter, Params,
};
pub use results::{OutputResult, PagedResult};
pub use row::{DataSet, ResultSet, Row};
pub use sql_value::{FromSqlValue, SqlType, SqlValue};
