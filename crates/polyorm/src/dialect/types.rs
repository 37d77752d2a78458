use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::Dialect;
use crate::metadata::{ColumnMetadata, ColumnType};
use crate::value::Value;

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S%.3f";

impl Dialect {
    /// Coerce an entity property into the value bound for `column`.
    pub fn prepare_persistent_value(self, column: &ColumnMetadata, value: &serde_json::Value) -> Value {
        use serde_json::Value as Json;

        if value.is_null() {
            return Value::Null;
        }

        match column.column_type {
            ColumnType::Integer | ColumnType::BigInt => match value {
                Json::String(s) => s.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::Text(s.clone())),
                other => Value::from_json(other),
            },
            ColumnType::Float | ColumnType::Decimal => match value {
                Json::Number(n) => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
                Json::String(s) => s.parse::<f64>().map(Value::Float).unwrap_or_else(|_| Value::Text(s.clone())),
                other => Value::from_json(other),
            },
            ColumnType::Boolean => {
                let flag = match value {
                    Json::Bool(b) => *b,
                    Json::Number(n) => n.as_i64().unwrap_or(0) != 0,
                    Json::String(s) => matches!(s.as_str(), "true" | "1"),
                    _ => false,
                };
                if self.stores_booleans_as_integers() {
                    Value::Int(flag as i64)
                } else {
                    Value::Bool(flag)
                }
            }
            ColumnType::Text | ColumnType::Enum => match value {
                Json::String(s) => Value::Text(s.clone()),
                Json::Number(n) if column.column_type == ColumnType::Enum => Value::from_json(&Json::Number(n.clone())),
                other => Value::Text(other.to_string()),
            },
            ColumnType::Uuid => match value {
                Json::String(s) if self.has_native_uuid() => uuid::Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .unwrap_or_else(|_| Value::Text(s.clone())),
                other => Value::from_json(other),
            },
            ColumnType::Timestamp => match value.as_str().and_then(parse_timestamp) {
                Some(ts) if matches!(self, Self::Sqlite | Self::LibSql) => {
                    Value::Text(ts.format(SQLITE_DATETIME).to_string())
                }
                Some(ts) => Value::Timestamp(ts),
                None => Value::from_json(value),
            },
            ColumnType::Date => match value.as_str().and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()) {
                Some(date) => Value::Date(date),
                None => Value::from_json(value),
            },
            ColumnType::Time => match value.as_str().and_then(|s| NaiveTime::parse_from_str(s, "%H:%M:%S%.f").ok()) {
                Some(time) => Value::Time(time),
                None => Value::from_json(value),
            },
            ColumnType::Json => {
                if matches!(self, Self::Sqlite | Self::LibSql | Self::MsSql | Self::Oracle | Self::SapHana) {
                    Value::Text(value.to_string())
                } else {
                    Value::Json(value.clone())
                }
            }
            ColumnType::SimpleArray => match value {
                Json::Array(items) => Value::Text(
                    items
                        .iter()
                        .map(|item| match item {
                            Json::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(","),
                ),
                other => Value::from_json(other),
            },
            ColumnType::Bytes => match value {
                Json::Array(items) => Value::Bytes(
                    items
                        .iter()
                        .filter_map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                        .collect(),
                ),
                Json::String(s) => Value::Bytes(s.as_bytes().to_vec()),
                other => Value::from_json(other),
            },
            ColumnType::Array => Value::from_json(value),
        }
    }

    /// Coerce a raw driver value into the entity property value for `column`.
    pub fn prepare_hydrated_value(self, column: &ColumnMetadata, value: &Value) -> serde_json::Value {
        use serde_json::Value as Json;

        match (column.column_type, value) {
            (_, Value::Null) => Json::Null,
            (ColumnType::Boolean, Value::Int(i)) => Json::Bool(*i != 0),
            (ColumnType::Boolean, Value::Text(s)) => Json::Bool(matches!(s.as_str(), "1" | "true" | "t")),
            (ColumnType::Integer | ColumnType::BigInt, Value::Text(s)) => s
                .parse::<i64>()
                .map(Json::from)
                .unwrap_or_else(|_| Json::String(s.clone())),
            (ColumnType::Float | ColumnType::Decimal, Value::Text(s)) => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Json::Number)
                .unwrap_or_else(|| Json::String(s.clone())),
            (ColumnType::Timestamp, Value::Text(s)) => parse_timestamp(s)
                .map(|ts| Json::String(ts.to_rfc3339()))
                .unwrap_or_else(|| Json::String(s.clone())),
            (ColumnType::Json, Value::Text(s)) => serde_json::from_str(s).unwrap_or_else(|_| Json::String(s.clone())),
            (ColumnType::SimpleArray, Value::Text(s)) => {
                if s.is_empty() {
                    Json::Array(Vec::new())
                } else {
                    Json::Array(s.split(',').map(|item| Json::String(item.to_string())).collect())
                }
            }
            (ColumnType::Uuid, Value::Bytes(bytes)) => uuid::Uuid::from_slice(bytes)
                .map(|u| Json::String(u.to_string()))
                .unwrap_or(Json::Null),
            (_, other) => other.to_json(),
        }
    }

    fn stores_booleans_as_integers(self) -> bool {
        matches!(self, Self::Sqlite | Self::LibSql | Self::MySql | Self::MariaDb | Self::Oracle)
    }

    fn has_native_uuid(self) -> bool {
        matches!(self, Self::Postgres | Self::CockroachDb | Self::DuckDb | Self::MsSql)
    }

    /// Native type name for a logical column type.
    pub fn normalize_type(self, column_type: ColumnType) -> &'static str {
        use ColumnType as T;
        match (self, column_type) {
            (Self::Postgres | Self::CockroachDb, T::Integer) => "integer",
            (Self::Postgres | Self::CockroachDb, T::Timestamp) => "timestamp with time zone",
            (Self::Postgres | Self::CockroachDb, T::Json) => "jsonb",
            (Self::Postgres | Self::CockroachDb, T::Bytes) => "bytea",
            (Self::Postgres | Self::CockroachDb | Self::DuckDb, T::Uuid) => "uuid",
            (Self::MySql | Self::MariaDb, T::Integer) => "int",
            (Self::MySql | Self::MariaDb, T::Boolean) => "tinyint",
            (Self::MySql | Self::MariaDb, T::Timestamp) => "datetime",
            (Self::MySql | Self::MariaDb, T::Uuid | T::Text | T::Enum) => "varchar",
            (Self::MySql | Self::MariaDb, T::Bytes) => "blob",
            (Self::MySql | Self::MariaDb | Self::DuckDb, T::Json) => "json",
            (Self::Sqlite | Self::LibSql, T::Integer | T::BigInt | T::Boolean) => "integer",
            (Self::Sqlite | Self::LibSql, T::Float | T::Decimal) => "real",
            (Self::Sqlite | Self::LibSql, T::Bytes) => "blob",
            (Self::Sqlite | Self::LibSql, _) => "text",
            (Self::MsSql, T::Integer) => "int",
            (Self::MsSql, T::Boolean) => "bit",
            (Self::MsSql, T::Timestamp) => "datetime2",
            (Self::MsSql, T::Uuid) => "uniqueidentifier",
            (Self::MsSql, T::Text | T::Enum | T::Json | T::SimpleArray) => "nvarchar",
            (Self::MsSql, T::Bytes) => "varbinary",
            (Self::Oracle, T::Integer | T::BigInt | T::Boolean | T::Float | T::Decimal) => "number",
            (Self::Oracle, T::Text | T::Enum | T::Uuid) => "varchar2",
            (Self::Oracle, T::Json | T::SimpleArray) => "clob",
            (Self::Oracle, T::Bytes) => "blob",
            (Self::SapHana, T::Text | T::Enum | T::Uuid) => "nvarchar",
            (Self::SapHana, T::Json | T::SimpleArray) => "nclob",
            (Self::Spanner, T::Integer | T::BigInt) => "int64",
            (Self::Spanner, T::Float | T::Decimal) => "float64",
            (Self::Spanner, T::Boolean) => "bool",
            (Self::Spanner, T::Text | T::Enum | T::Uuid | T::SimpleArray) => "string",
            (Self::Spanner, T::Bytes) => "bytes",
            (_, T::Integer) => "integer",
            (_, T::BigInt) => "bigint",
            (_, T::Float) => "double precision",
            (_, T::Decimal) => "decimal",
            (_, T::Boolean) => "boolean",
            (_, T::Text | T::Enum | T::SimpleArray) => "text",
            (_, T::Timestamp) => "timestamp",
            (_, T::Date) => "date",
            (_, T::Time) => "time",
            (_, T::Json) => "text",
            (_, T::Bytes) => "blob",
            (_, T::Array) => "text",
        }
    }

    /// Full column type including length or array suffix, as used in DDL.
    pub fn create_full_type(self, column: &ColumnMetadata) -> String {
        let base = self.normalize_type(column.column_type);
        match (self, column.column_type) {
            (Self::MySql | Self::MariaDb, ColumnType::Uuid) => format!("{base}(36)"),
            (_, _) if matches!(base, "varchar" | "nvarchar" | "varchar2") => format!("{base}(255)"),
            (Self::Spanner, _) if base == "string" => format!("{base}(MAX)"),
            (Self::Postgres | Self::CockroachDb | Self::DuckDb, ColumnType::Array) => format!("{base}[]"),
            _ => base.to_string(),
        }
    }
}

/// Parse RFC 3339 or `YYYY-MM-DD HH:MM:SS[.fff]` (assumed UTC).
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
