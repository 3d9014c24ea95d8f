use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::TryStreamExt;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls, RowStream, SimpleQueryMessage, Statement};

use crate::drivers::placeholders::{bare_name, positional_values, translate_named, PlaceholderStyle};
use crate::error::{Result, SqlHelperError};
use crate::traits::{DatabaseDriver, DriverConnection, RowCursor};
use crate::types::{
    Command, CommandKind, CommandOutcome, DataSet, OutputValues, ResultSet, Row, SqlValue,
};

/// PostgreSQL driver implementation using tokio-postgres.
///
/// Opens one connection per call. Stored procedures map onto PostgreSQL
/// routines called with named-argument notation (`@PageSize` becomes
/// `pagesize => $2`):
/// - readers run `SELECT * FROM routine(...)`, so set-returning functions work
///   and output values are read from same-named columns of the last row;
/// - non-queries run `CALL routine(...)`, passing NULL for output arguments and
///   reading them back from the row the server returns.
///
/// Reader outputs only exist while rows come back: a call that returns no
/// rows reports every output as NULL. Paging past the last page therefore
/// sees a total of zero.
///
/// Values are decoded by column type. `numeric`, `uuid`, date/time and JSON
/// columns come back as `SqlValue::Text`; other non-text types must be cast
/// in the query. Parameters are encoded for the type the server inferred,
/// parsing text where needed, and fail instead of sending mismatched bytes.
#[derive(Debug, Default, Clone)]
pub struct TokioPostgresDriver;

impl TokioPostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DatabaseDriver for TokioPostgresDriver {
    async fn open(&self, connection_string: &str) -> Result<Box<dyn DriverConnection>> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls)
            .await
            .map_err(|e| SqlHelperError::ConnectionFailed(e.to_string()))?;

        // Spawn the connection handler; it ends once the client is dropped.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        Ok(Box::new(PostgresConnection { client }))
    }
}

struct PostgresConnection {
    client: Client,
}

/// SQL and positional values for one command.
struct PreparedCommand {
    sql: String,
    values: Vec<PgParam>,
}

impl PreparedCommand {
    fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|v| v as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Routine argument name: `@PageSize` becomes `pagesize`.
fn routine_arg(name: &str) -> String {
    bare_name(name).to_ascii_lowercase()
}

fn build_command(command: &Command, call: bool) -> Result<PreparedCommand> {
    match command.kind {
        CommandKind::Text => {
            let (sql, names) = translate_named(&command.text, PlaceholderStyle::Postgres);
            let values = positional_values(command, &names)?
                .into_iter()
                .map(PgParam)
                .collect();
            Ok(PreparedCommand { sql, values })
        }
        CommandKind::StoredProcedure => {
            let mut args = Vec::new();
            let mut values = Vec::new();
            for param in command.inputs() {
                values.push(PgParam(param.value.clone()));
                args.push(format!("{} => ${}", routine_arg(&param.name), values.len()));
            }
            if call {
                for param in command.outputs() {
                    args.push(format!("{} => NULL", routine_arg(&param.name)));
                }
            }
            let sql = if call {
                format!("CALL {}({})", command.text, args.join(", "))
            } else {
                format!("SELECT * FROM {}({})", command.text, args.join(", "))
            };
            Ok(PreparedCommand { sql, values })
        }
    }
}

fn query_error(e: tokio_postgres::Error) -> SqlHelperError {
    match e.as_db_error() {
        Some(db) => SqlHelperError::QueryFailed(format!(
            "{} (code: {})",
            db.message(),
            db.code().code()
        )),
        None => SqlHelperError::QueryFailed(e.to_string()),
    }
}

fn column_names(statement: &Statement) -> Arc<[String]> {
    statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect::<Vec<_>>()
        .into()
}

/// Copies declared output values out of a row whose column names match them.
fn capture_outputs(command: &Command, row: &Row, captured: &mut OutputValues) {
    for param in command.outputs() {
        if let Ok(value) = row.get_value(routine_arg(&param.name)) {
            captured.insert(param.name.clone(), value.clone());
        }
    }
}

#[async_trait]
impl DriverConnection for PostgresConnection {
    async fn execute_non_query(&mut self, command: &Command) -> Result<CommandOutcome> {
        let has_outputs = command.outputs().next().is_some();
        let prepared = build_command(command, command.kind == CommandKind::StoredProcedure)?;
        let params = prepared.params();

        if !has_outputs {
            let rows_affected = self
                .client
                .execute(prepared.sql.as_str(), &params)
                .await
                .map_err(query_error)?;
            return Ok(CommandOutcome {
                rows_affected,
                output_values: OutputValues::new(),
            });
        }

        let statement = self
            .client
            .prepare(&prepared.sql)
            .await
            .map_err(query_error)?;
        let columns = column_names(&statement);
        let rows = self
            .client
            .query(&statement, &params)
            .await
            .map_err(query_error)?;

        let mut output_values = OutputValues::new();
        if let Some(pg_row) = rows.first() {
            let row = convert_row(&columns, &statement, pg_row)?;
            capture_outputs(command, &row, &mut output_values);
        }
        Ok(CommandOutcome {
            rows_affected: 0,
            output_values,
        })
    }

    async fn execute_reader<'a>(
        &'a mut self,
        command: &'a Command,
    ) -> Result<Box<dyn RowCursor + 'a>> {
        let prepared = build_command(command, false)?;
        let statement = self
            .client
            .prepare(&prepared.sql)
            .await
            .map_err(query_error)?;
        let columns = column_names(&statement);
        let stream = self
            .client
            .query_raw(&statement, prepared.values.iter())
            .await
            .map_err(query_error)?;

        Ok(Box::new(PostgresCursor {
            command,
            statement,
            columns,
            stream: Box::pin(stream),
            outputs: OutputValues::new(),
        }))
    }

    async fn fill_dataset(&mut self, command: &Command) -> Result<DataSet> {
        if command.kind == CommandKind::Text && command.parameters.is_empty() {
            let messages = self
                .client
                .simple_query(&command.text)
                .await
                .map_err(query_error)?;
            return Ok(DataSet::new(split_result_sets(messages)));
        }

        // The extended protocol carries one statement, hence one result set.
        let prepared = build_command(command, false)?;
        let statement = self
            .client
            .prepare(&prepared.sql)
            .await
            .map_err(query_error)?;
        let columns = column_names(&statement);
        let pg_rows = self
            .client
            .query(&statement, &prepared.params())
            .await
            .map_err(query_error)?;
        let rows = pg_rows
            .iter()
            .map(|r| convert_row(&columns, &statement, r))
            .collect::<Result<Vec<_>>>()?;
        Ok(DataSet::new(vec![ResultSet::from_rows(columns, rows)]))
    }
}

struct PostgresCursor<'a> {
    command: &'a Command,
    statement: Statement,
    columns: Arc<[String]>,
    stream: Pin<Box<RowStream>>,
    outputs: OutputValues,
}

#[async_trait]
impl<'a> RowCursor for PostgresCursor<'a> {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(pg_row) = self.stream.try_next().await.map_err(query_error)? else {
            return Ok(None);
        };
        let row = convert_row(&self.columns, &self.statement, &pg_row)?;
        capture_outputs(self.command, &row, &mut self.outputs);
        Ok(Some(row))
    }

    async fn finish(&mut self) -> Result<OutputValues> {
        while self.next_row().await?.is_some() {}
        Ok(std::mem::take(&mut self.outputs))
    }
}

/// Groups simple-query messages into one result set per row-returning
/// statement. Text-protocol values arrive as strings.
fn split_result_sets(messages: Vec<SimpleQueryMessage>) -> Vec<ResultSet> {
    let mut sets = Vec::new();
    let mut current: Option<(Arc<[String]>, Vec<Row>)> = None;

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
                current = Some((names.into(), Vec::new()));
            }
            SimpleQueryMessage::Row(row) => {
                let (columns, rows) = current.get_or_insert_with(|| {
                    let names: Vec<String> =
                        row.columns().iter().map(|c| c.name().to_string()).collect();
                    (names.into(), Vec::new())
                });
                let values = (0..row.len())
                    .map(|i| {
                        row.get(i)
                            .map_or(SqlValue::Null, |s| SqlValue::Text(s.to_string()))
                    })
                    .collect();
                rows.push(Row::new(Arc::clone(columns), values));
            }
            SimpleQueryMessage::CommandComplete(_) => {
                if let Some((columns, rows)) = current.take() {
                    sets.push(ResultSet::from_rows(columns, rows));
                }
            }
            _ => {}
        }
    }
    sets
}

fn convert_row(
    columns: &Arc<[String]>,
    statement: &Statement,
    row: &tokio_postgres::Row,
) -> Result<Row> {
    let values = statement
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| row_value(row, i, col.type_(), col.name()))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(Arc::clone(columns), values))
}

fn row_value(row: &tokio_postgres::Row, index: usize, ty: &Type, name: &str) -> Result<SqlValue> {
    row.try_get::<_, PgColumnValue>(index)
        .map(|v| v.0)
        .map_err(|e| SqlHelperError::Decode(format!("column {} ({}): {}", name, ty, e)))
}

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Types whose binary form is the UTF-8 text itself.
fn is_text_like(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN | Type::XML
    ) || matches!(ty.kind(), Kind::Enum(_))
        || ty.name() == "citext"
}

/// A column value decoded according to its PostgreSQL type.
struct PgColumnValue(SqlValue);

impl<'a> FromSql<'a> for PgColumnValue {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        decode_value(ty, raw).map(Self)
    }

    fn from_sql_null(_: &Type) -> std::result::Result<Self, BoxError> {
        Ok(Self(SqlValue::Null))
    }

    // decode_value rejects what it cannot read
    fn accepts(_: &Type) -> bool {
        true
    }
}

fn decode_value(ty: &Type, raw: &[u8]) -> std::result::Result<SqlValue, BoxError> {
    let value = match *ty {
        Type::BOOL => SqlValue::Bool(bool::from_sql(ty, raw)?),
        Type::CHAR => SqlValue::Int32(i32::from(i8::from_sql(ty, raw)?)),
        Type::INT2 => SqlValue::Int32(i32::from(i16::from_sql(ty, raw)?)),
        Type::INT4 => SqlValue::Int32(i32::from_sql(ty, raw)?),
        Type::INT8 => SqlValue::Int64(i64::from_sql(ty, raw)?),
        Type::OID => SqlValue::Int64(i64::from(u32::from_sql(ty, raw)?)),
        Type::FLOAT4 => SqlValue::Float64(f64::from(f32::from_sql(ty, raw)?)),
        Type::FLOAT8 => SqlValue::Float64(f64::from_sql(ty, raw)?),
        Type::NUMERIC => SqlValue::Text(decode_numeric(raw)?),
        Type::BYTEA => SqlValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
        Type::UUID => SqlValue::Text(uuid::Uuid::from_sql(ty, raw)?.to_string()),
        Type::DATE => SqlValue::Text(NaiveDate::from_sql(ty, raw)?.to_string()),
        Type::TIME => SqlValue::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMP => SqlValue::Text(NaiveDateTime::from_sql(ty, raw)?.to_string()),
        Type::TIMESTAMPTZ => SqlValue::Text(DateTime::<Utc>::from_sql(ty, raw)?.to_rfc3339()),
        Type::JSON | Type::JSONB => {
            SqlValue::Text(serde_json::Value::from_sql(ty, raw)?.to_string())
        }
        _ if is_text_like(ty) => SqlValue::Text(String::from_utf8(raw.to_vec())?),
        _ => {
            return Err(format!(
                "unsupported PostgreSQL type {}; cast it to text in the query",
                ty
            )
            .into())
        }
    };
    Ok(value)
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Renders a binary `numeric` (base-10000 digit groups with a weight, sign
/// and display scale) as decimal text.
fn decode_numeric(raw: &[u8]) -> std::result::Result<String, BoxError> {
    if raw.len() < 8 {
        return Err("numeric value is too short".into());
    }
    let ndigits = usize::from(u16::from_be_bytes([raw[0], raw[1]]));
    let weight = i32::from(i16::from_be_bytes([raw[2], raw[3]]));
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = usize::from(u16::from_be_bytes([raw[6], raw[7]]));
    if raw.len() != 8 + ndigits * 2 {
        return Err("numeric value has the wrong length".into());
    }
    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("unknown numeric sign {:#06x}", other).into()),
    }

    let groups: Vec<u16> = raw[8..]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    if groups.iter().any(|g| *g > 9999) {
        return Err("numeric digit group out of range".into());
    }
    // group i carries 10000^(weight - i)
    let group_at = |index: i32| -> u16 {
        usize::try_from(index)
            .ok()
            .and_then(|i| groups.get(i))
            .copied()
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group_at(0).to_string());
        for index in 1..=weight {
            text.push_str(&format!("{:04}", group_at(index)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut index = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group_at(index)));
            index += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// Writes decimal text (`-12.340`, `NaN`) in the binary `numeric` format.
fn write_numeric(text: &str, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("nan") {
        out.put_i16(0);
        out.put_i16(0);
        out.put_u16(NUMERIC_NAN);
        out.put_i16(0);
        return Ok(IsNull::No);
    }

    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let all_digits = int_part
        .bytes()
        .chain(frac_part.bytes())
        .all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !all_digits {
        return Err(format!("invalid numeric value {:?}", text).into());
    }
    let int_part = int_part.trim_start_matches('0');
    let dscale = i16::try_from(frac_part.len())?;

    // pad both parts out to whole groups of four digits
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let digits = "0".repeat(int_pad) + int_part + frac_part + &"0".repeat(frac_pad);
    let mut groups: Vec<u16> = digits
        .as_bytes()
        .chunks(4)
        .map(|c| c.iter().fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0')))
        .collect();
    let mut weight = i16::try_from((int_pad + int_part.len()) / 4)? - 1;

    let leading = groups.iter().take_while(|g| **g == 0).count();
    groups.drain(..leading);
    weight -= i16::try_from(leading)?;
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }
    let sign = if negative && !groups.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    out.put_i16(i16::try_from(groups.len())?);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_i16(dscale);
    for group in groups {
        out.put_u16(group);
    }
    Ok(IsNull::No)
}

/// Parameter wrapper that encodes for the type the server inferred.
#[derive(Debug)]
struct PgParam(SqlValue);

impl ToSql for PgParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match &self.0 {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ if is_text_like(ty) => b.to_string().to_sql(ty, out),
                _ => Err(mismatch("bool", ty)),
            },
            SqlValue::Int32(i) => write_int(i64::from(*i), ty, out),
            SqlValue::Int64(i) => write_int(*i, ty, out),
            SqlValue::Float64(f) => write_float(*f, ty, out),
            SqlValue::Text(s) => write_text(s, ty, out),
            SqlValue::Bytes(b) => match *ty {
                Type::BYTEA => b.to_sql(ty, out),
                _ => Err(mismatch("bytes", ty)),
            },
        }
    }

    // each value checks the target type itself, so NULL binds anywhere
    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn mismatch(kind: &str, ty: &Type) -> BoxError {
    format!("cannot send a {} value as PostgreSQL {}", kind, ty).into()
}

fn write_int(value: i64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::INT8 => value.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::NUMERIC => write_numeric(&value.to_string(), out),
        _ if is_text_like(ty) => value.to_string().to_sql(ty, out),
        _ => Err(mismatch("integer", ty)),
    }
}

fn write_float(value: f64, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => value.to_sql(ty, out),
        Type::NUMERIC => write_numeric(&value.to_string(), out),
        _ if is_text_like(ty) => value.to_string().to_sql(ty, out),
        _ => Err(mismatch("float", ty)),
    }
}

/// Text parameters are parsed into the target type, so `@Id` can be
/// compared with a `uuid` column or `@Since` with a `timestamp`.
fn write_text(value: &str, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => value.trim().parse::<bool>()?.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            write_int(value.trim().parse()?, ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => write_float(value.trim().parse()?, ty, out),
        Type::NUMERIC => write_numeric(value, out),
        Type::UUID => value.trim().parse::<uuid::Uuid>()?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(value.trim(), "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(value)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(value)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            serde_json::from_str::<serde_json::Value>(value)?.to_sql(ty, out)
        }
        _ if is_text_like(ty) => value.to_sql(ty, out),
        _ => Err(mismatch("text", ty)),
    }
}

/// `2024-03-01 10:30:00[.fff]`, the same with a `T`, or a bare date.
fn parse_timestamp(value: &str) -> std::result::Result<NaiveDateTime, BoxError> {
    let value = value.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("invalid timestamp {:?}", value).into())
}

/// RFC 3339, or a timestamp without offset taken as UTC.
fn parse_timestamptz(value: &str) -> std::result::Result<DateTime<Utc>, BoxError> {
    match DateTime::parse_from_rfc3339(value.trim()) {
        Ok(timestamp) => Ok(timestamp.with_timezone(&Utc)),
        Err(_) => parse_timestamp(value)
            .map(|timestamp| DateTime::<Utc>::from_naive_utc_and_offset(timestamp, Utc)),
    }
}
