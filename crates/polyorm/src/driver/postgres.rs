use std::error::Error;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};

use super::{Driver, DriverConnection, DriverResult, ReplicationMode, RowStream};
use crate::dialect::Dialect;
use crate::error::{OrmError, OrmResult};
use crate::monitor::QueryType;
use crate::row::Row;
use crate::value::Value;

/// Postgres driver opening one `tokio-postgres` connection per runner.
///
/// ```ignore
/// let driver = PostgresDriver::from_url("postgres://app@localhost/app")?;
/// let source = DataSource::builder(driver).registry(registry).build()?;
/// ```
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    config: tokio_postgres::Config,
    dialect: Dialect,
}

impl PostgresDriver {
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self {
            config,
            dialect: Dialect::Postgres,
        }
    }

    pub fn from_url(url: &str) -> OrmResult<Self> {
        let config: tokio_postgres::Config = url
            .parse()
            .map_err(|e: tokio_postgres::Error| OrmError::Connection(e.to_string()))?;
        Ok(Self::new(config))
    }

    /// Speak CockroachDB's Postgres dialect over the same wire protocol.
    pub fn cockroach(mut self) -> Self {
        self.dialect = Dialect::CockroachDb;
        self
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn connect(&self, _mode: ReplicationMode) -> OrmResult<Box<dyn DriverConnection>> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| OrmError::Connection(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(target: "polyorm.driver", error = %e, "postgres connection closed with error");
            }
        });
        Ok(Box::new(PgConnection::new(client)))
    }
}

/// Anything that dereferences to a live `tokio_postgres::Client`.
pub(super) trait PgHandle: Send + Sync + 'static {
    fn client(&self) -> &Client;
}

impl PgHandle for Client {
    fn client(&self) -> &Client {
        self
    }
}

pub(super) struct PgConnection<H: PgHandle> {
    handle: Option<H>,
}

impl<H: PgHandle> PgConnection<H> {
    pub(super) fn new(handle: H) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    fn client(&self) -> OrmResult<&Client> {
        self.handle
            .as_ref()
            .map(PgHandle::client)
            .ok_or_else(|| OrmError::Connection("connection already closed".into()))
    }
}

#[async_trait]
impl<H: PgHandle> DriverConnection for PgConnection<H> {
    async fn query(&mut self, sql: &str, params: &[Value]) -> OrmResult<DriverResult> {
        let client = self.client()?;
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        let statement = client.prepare(sql).await.map_err(map_pg_error)?;

        if statement.columns().is_empty() {
            let affected = client.execute(&statement, &refs).await.map_err(map_pg_error)?;
            return Ok(DriverResult::affected(affected));
        }

        let rows = client.query(&statement, &refs).await.map_err(map_pg_error)?;
        let decoded = rows.iter().map(decode_row).collect::<OrmResult<Vec<_>>>()?;
        let mut result = DriverResult::from_rows(decoded);
        if QueryType::from_sql(sql) != QueryType::Select {
            result.affected = Some(rows.len() as u64);
        }
        Ok(result)
    }

    async fn stream(&mut self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let client = self.client()?;
        let stream = client
            .query_raw(sql, params.iter().map(|v| v as &(dyn ToSql + Sync)))
            .await
            .map_err(map_pg_error)?;
        Ok(RowStream::new(stream.map(|row| match row {
            Ok(row) => decode_row(&row),
            Err(e) => Err(map_pg_error(e)),
        })))
    }

    async fn close(&mut self) -> OrmResult<()> {
        // Dropping the client ends the connection task; a pooled object goes back to its pool.
        self.handle.take();
        Ok(())
    }
}

/// Serialization failures, deadlocks and lock timeouts are safe to retry.
pub(super) fn map_pg_error(err: tokio_postgres::Error) -> OrmError {
    if err.is_closed() {
        return OrmError::Connection(err.to_string());
    }
    let transient = err.code().is_some_and(|code| {
        *code == SqlState::T_R_SERIALIZATION_FAILURE
            || *code == SqlState::T_R_DEADLOCK_DETECTED
            || *code == SqlState::LOCK_NOT_AVAILABLE
    });
    OrmError::driver(err, transient)
}

fn decode_row(row: &tokio_postgres::Row) -> OrmResult<Row> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_cell(row, idx, column.type_())
            .map_err(|e| OrmError::decode(column.name(), e.to_string()))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_cell(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, Box<dyn Error + Send + Sync>> {
    macro_rules! get {
        ($t:ty) => {
            Value::from(row.try_get::<_, Option<$t>>(idx)?)
        };
    }

    let value = match *ty {
        Type::BOOL => get!(bool),
        Type::INT2 => get!(i16),
        Type::INT4 => get!(i32),
        Type::INT8 => get!(i64),
        Type::OID => get!(u32),
        Type::FLOAT4 => get!(f32),
        Type::FLOAT8 => get!(f64),
        Type::NUMERIC => decode_numeric(row, idx)?,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => get!(String),
        Type::UUID => get!(uuid::Uuid),
        Type::TIMESTAMPTZ => get!(chrono::DateTime<chrono::Utc>),
        Type::TIMESTAMP => get!(chrono::NaiveDateTime),
        Type::DATE => get!(chrono::NaiveDate),
        Type::TIME => get!(chrono::NaiveTime),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::Json)
            .unwrap_or(Value::Null),
        Type::BYTEA => get!(Vec<u8>),
        _ => match ty.kind() {
            Kind::Array(member) => decode_array(row, idx, member)?,
            Kind::Enum(_) => Value::from(row.try_get::<_, Option<PgEnumText>>(idx)?.map(|e| e.0)),
            _ => return Err(format!("unsupported column type {ty}").into()),
        },
    };
    Ok(value)
}

fn decode_array(row: &tokio_postgres::Row, idx: usize, member: &Type) -> Result<Value, Box<dyn Error + Send + Sync>> {
    macro_rules! array {
        ($t:ty) => {
            match row.try_get::<_, Option<Vec<Option<$t>>>>(idx)? {
                Some(items) => Value::array(items),
                None => Value::Null,
            }
        };
    }

    Ok(match *member {
        Type::BOOL => array!(bool),
        Type::INT2 => array!(i16),
        Type::INT4 => array!(i32),
        Type::INT8 => array!(i64),
        Type::FLOAT8 => array!(f64),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR => array!(String),
        Type::UUID => array!(uuid::Uuid),
        Type::TIMESTAMPTZ => array!(chrono::DateTime<chrono::Utc>),
        _ => return Err(format!("unsupported array element type {member}").into()),
    })
}

#[cfg(feature = "rust_decimal")]
fn decode_numeric(row: &tokio_postgres::Row, idx: usize) -> Result<Value, Box<dyn Error + Send + Sync>> {
    Ok(row
        .try_get::<_, Option<rust_decimal::Decimal>>(idx)?
        .map(|d| Value::Text(d.to_string()))
        .unwrap_or(Value::Null))
}

#[cfg(not(feature = "rust_decimal"))]
fn decode_numeric(_row: &tokio_postgres::Row, _idx: usize) -> Result<Value, Box<dyn Error + Send + Sync>> {
    Err("NUMERIC columns require the `rust_decimal` feature; cast to float8 or text instead".into())
}

/// Text label of a Postgres enum value.
struct PgEnumText(String);

impl<'a> tokio_postgres::types::FromSql<'a> for PgEnumText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

// ─── ToSql ──────────────────────────────────────────────────────────────────
//
// A `Value` adapts to whatever type the server inferred for its placeholder,
// so `Value::Int(1)` binds to int2/int4/int8/float/numeric/text alike.

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::INT2 | Type::INT4 | Type::INT8 => Value::Int(i64::from(*b)).to_sql(ty, out),
                _ => b.to_sql(ty, out),
            },
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::NUMERIC => numeric_to_sql(&i.to_string(), ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => i.to_string().to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::NUMERIC => numeric_to_sql(&f.to_string(), ty, out),
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => f.to_string().to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            Value::Text(s) => match *ty {
                Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => Value::Int(s.parse()?).to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => Value::Float(s.parse()?).to_sql(ty, out),
                Type::NUMERIC => numeric_to_sql(s, ty, out),
                Type::TIMESTAMPTZ | Type::TIMESTAMP => {
                    let parsed = chrono::DateTime::parse_from_rfc3339(s)?.with_timezone(&chrono::Utc);
                    Value::Timestamp(parsed).to_sql(ty, out)
                }
                _ => s.as_str().to_sql(ty, out),
            },
            Value::Bytes(b) => b.as_slice().to_sql(ty, out),
            Value::Uuid(u) => match *ty {
                Type::TEXT | Type::VARCHAR | Type::BPCHAR => u.to_string().to_sql(ty, out),
                _ => u.to_sql(ty, out),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMP => ts.naive_utc().to_sql(ty, out),
                Type::DATE => ts.date_naive().to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => ts.to_rfc3339().to_sql(ty, out),
                _ => ts.to_sql(ty, out),
            },
            Value::Date(d) => d.to_sql(ty, out),
            Value::Time(t) => t.to_sql(ty, out),
            Value::Json(j) => match *ty {
                Type::TEXT | Type::VARCHAR => j.to_string().to_sql(ty, out),
                _ => j.to_sql(ty, out),
            },
            Value::Array(items) => items.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    tokio_postgres::types::to_sql_checked!();
}

#[cfg(feature = "rust_decimal")]
fn numeric_to_sql(text: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    text.parse::<rust_decimal::Decimal>()?.to_sql(ty, out)
}

#[cfg(not(feature = "rust_decimal"))]
fn numeric_to_sql(_text: &str, _ty: &Type, _out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    Err("binding NUMERIC parameters requires the `rust_decimal` feature".into())
}
