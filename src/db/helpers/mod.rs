use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Value;

use crate::db::models::{IntegrityVerdict, SensorKind, SensorValue, WashStatus};

/// Fixed-width RFC 3339 so that lexical order in SQLite matches time order.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `value` as it reads back after a round trip through `format_timestamp`.
pub fn stored_precision(value: DateTime<Utc>) -> DateTime<Utc> {
    value.trunc_subsecs(3)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_status(value: &str) -> Result<WashStatus> {
    match value {
        "active" => Ok(WashStatus::Active),
        "inactive" => Ok(WashStatus::Inactive),
        other => Err(anyhow!("unknown wash status {other}")),
    }
}

pub fn parse_integrity(value: Option<i64>) -> Result<IntegrityVerdict> {
    match value {
        None => Ok(IntegrityVerdict::Pending),
        Some(code) => IntegrityVerdict::try_from(code).map_err(|err| anyhow!(err)),
    }
}

pub fn sensor_value_from_sql(value: Value, field: &str) -> Result<SensorValue> {
    match value {
        Value::Real(real) => Ok(SensorValue::Numeric(real)),
        Value::Integer(int) => Ok(SensorValue::Numeric(int as f64)),
        Value::Text(text) => Ok(SensorValue::Code(text)),
        Value::Null => bail!("{field} is NULL"),
        Value::Blob(_) => bail!("{field} holds an unsupported blob"),
    }
}

pub fn sensor_value_to_sql(value: &SensorValue) -> Value {
    match value {
        SensorValue::Numeric(real) => Value::Real(*real),
        SensorValue::Code(code) => Value::Text(code.clone()),
    }
}

/// Colors carry codes, the other series carry numbers.
pub fn check_value_kind(kind: SensorKind, value: &SensorValue) -> Result<()> {
    match (kind.is_categorical(), value) {
        (true, SensorValue::Code(_)) | (false, SensorValue::Numeric(_)) => Ok(()),
        (true, SensorValue::Numeric(_)) => bail!("{kind} readings must be codes"),
        (false, SensorValue::Code(_)) => bail!("{kind} readings must be numeric"),
    }
}
