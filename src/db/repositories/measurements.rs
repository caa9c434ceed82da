use anyhow::{Context, Result};
use log::warn;
use rusqlite::{params, params_from_iter, types::Value, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{
        check_value_kind, format_timestamp, parse_datetime, sensor_value_from_sql,
        sensor_value_to_sql, stored_precision,
    },
    models::{Measurement, NewMeasurement, Page, PageQuery, PaginationInfo, SensorKind, TimeRange},
};

fn row_to_measurement(row: &Row) -> Result<Measurement> {
    let captured_at: String = row.get("captured_at")?;
    let value: Value = row.get("value")?;

    Ok(Measurement {
        id: row.get("id")?,
        name: row.get("name")?,
        value: sensor_value_from_sql(value, "value")?,
        captured_at: parse_datetime(&captured_at, "captured_at")?,
    })
}

/// `WHERE` clause and bound values for an inclusive `captured_at` range.
fn range_filter(range: &TimeRange) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(start) = range.start {
        conditions.push("captured_at >= ?");
        values.push(Value::Text(format_timestamp(&start)));
    }
    if let Some(end) = range.end {
        conditions.push("captured_at <= ?");
        values.push(Value::Text(format_timestamp(&end)));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

impl Database {
    pub async fn insert_measurement(
        &self,
        kind: SensorKind,
        measurement: &NewMeasurement,
    ) -> Result<Measurement> {
        check_value_kind(kind, &measurement.value)?;

        let record = Measurement {
            id: Uuid::new_v4().to_string(),
            name: measurement.name.clone(),
            value: measurement.value.clone(),
            captured_at: stored_precision(measurement.captured_at),
        };

        self.execute(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, name, value, captured_at) VALUES (?1, ?2, ?3, ?4)",
                    kind.as_str()
                ),
                params![
                    record.id,
                    record.name,
                    sensor_value_to_sql(&record.value),
                    format_timestamp(&record.captured_at),
                ],
            )
            .with_context(|| format!("failed to insert {kind} reading"))?;
            Ok(record)
        })
        .await
    }

    /// Readings of one series inside `range`, in no particular order.
    pub async fn fetch_series(
        &self,
        kind: SensorKind,
        range: TimeRange,
    ) -> Result<Vec<Measurement>> {
        if range.is_unbounded() {
            warn!("Fetching the whole {kind} series without a time window");
        }

        self.execute(move |conn| {
            let (filter, values) = range_filter(&range);
            let mut stmt = conn.prepare(&format!(
                "SELECT id, name, value, captured_at FROM {}{}",
                kind.as_str(),
                filter
            ))?;

            let mut rows = stmt.query(params_from_iter(values))?;
            let mut series = Vec::new();
            while let Some(row) = rows.next()? {
                series.push(row_to_measurement(row)?);
            }

            Ok(series)
        })
        .await
    }

    pub async fn fetch_series_page(
        &self,
        kind: SensorKind,
        query: PageQuery,
    ) -> Result<Page<Measurement>> {
        self.execute(move |conn| {
            let (filter, values) = range_filter(&query.range);

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}{}", kind.as_str(), filter),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT id, name, value, captured_at FROM {}{}
                 ORDER BY captured_at {}
                 LIMIT {} OFFSET {}",
                kind.as_str(),
                filter,
                query.sort_order.as_sql(),
                query.limit(),
                query.offset(),
            ))?;

            let mut rows = stmt.query(params_from_iter(values.iter()))?;
            let mut data = Vec::new();
            while let Some(row) = rows.next()? {
                data.push(row_to_measurement(row)?);
            }

            Ok(Page {
                data,
                pagination: PaginationInfo::new(&query, total.max(0) as u64),
            })
        })
        .await
    }
}
