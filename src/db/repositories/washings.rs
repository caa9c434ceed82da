use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_timestamp, parse_datetime, parse_integrity, parse_status, stored_precision},
    models::{IntegrityVerdict, NewWashCycle, WashCycle, WashEdit, WashOutcome},
};

const WASHING_COLUMNS: &str = "id, patient_id, filter_id, attended_by, start_date, residual_volume, integrity_test, status, created_at, updated_at";

fn row_to_washing(row: &Row) -> Result<WashCycle> {
    let start_date: String = row.get("start_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let integrity_test: Option<i64> = row.get("integrity_test")?;
    let status: String = row.get("status")?;

    Ok(WashCycle {
        id: row.get("id")?,
        patient_ref: row.get("patient_id")?,
        filter_ref: row.get("filter_id")?,
        attended_by_ref: row.get("attended_by")?,
        start_date: parse_datetime(&start_date, "start_date")?,
        residual_volume: row.get("residual_volume")?,
        integrity_test: parse_integrity(integrity_test)?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_washing(&self, washing: &NewWashCycle) -> Result<WashCycle> {
        let now = stored_precision(Utc::now());
        let record = WashCycle {
            id: Uuid::new_v4().to_string(),
            patient_ref: washing.patient_ref.clone(),
            filter_ref: washing.filter_ref.clone(),
            attended_by_ref: washing.attended_by_ref.clone(),
            start_date: stored_precision(washing.start_date),
            residual_volume: 0.0,
            integrity_test: IntegrityVerdict::Pending,
            status: washing.status,
            created_at: now,
            updated_at: now,
        };

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO washings (id, patient_id, filter_id, attended_by, start_date, residual_volume, integrity_test, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    record.id,
                    record.patient_ref,
                    record.filter_ref,
                    record.attended_by_ref,
                    format_timestamp(&record.start_date),
                    record.residual_volume,
                    record.integrity_test.code(),
                    record.status.as_str(),
                    format_timestamp(&record.created_at),
                    format_timestamp(&record.updated_at),
                ],
            )?;
            Ok(record)
        })
        .await
    }

    /// All washings, or only those of one patient.
    pub async fn list_washings(&self, patient_ref: Option<&str>) -> Result<Vec<WashCycle>> {
        let patient_ref = patient_ref.map(str::to_string);
        self.execute(move |conn| {
            let mut washings = Vec::new();
            match patient_ref {
                Some(patient_ref) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {WASHING_COLUMNS} FROM washings
                         WHERE patient_id = ?1
                         ORDER BY start_date DESC"
                    ))?;
                    let mut rows = stmt.query(params![patient_ref])?;
                    while let Some(row) = rows.next()? {
                        washings.push(row_to_washing(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {WASHING_COLUMNS} FROM washings ORDER BY start_date DESC"
                    ))?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        washings.push(row_to_washing(row)?);
                    }
                }
            }

            Ok(washings)
        })
        .await
    }

    pub async fn get_washing(&self, washing_id: &str) -> Result<Option<WashCycle>> {
        let washing_id = washing_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WASHING_COLUMNS} FROM washings WHERE id = ?1"
            ))?;

            let washing = stmt
                .query_row(params![washing_id], |row| Ok(row_to_washing(row)))
                .optional()?
                .transpose()?;

            Ok(washing)
        })
        .await
    }

    /// Manual edit. Leaves `residual_volume` and `integrity_test` untouched.
    pub async fn update_washing(&self, washing_id: &str, edit: &WashEdit) -> Result<WashCycle> {
        let washing_id = washing_id.to_string();
        let edit = edit.clone();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE washings
                 SET patient_id = ?1,
                     filter_id = ?2,
                     attended_by = ?3,
                     start_date = ?4,
                     status = ?5,
                     updated_at = ?6
                 WHERE id = ?7",
                params![
                    edit.patient_ref,
                    edit.filter_ref,
                    edit.attended_by_ref,
                    format_timestamp(&edit.start_date),
                    edit.status.as_str(),
                    format_timestamp(&Utc::now()),
                    washing_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Washing not found"));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {WASHING_COLUMNS} FROM washings WHERE id = ?1"
            ))?;
            let washing = stmt.query_row(params![washing_id], |row| Ok(row_to_washing(row)))??;
            Ok(washing)
        })
        .await
    }

    /// Partial update of the derived fields. Does not check whether the cycle
    /// was already finalized; callers that care re-read it first.
    pub async fn update_outcome(&self, washing_id: &str, outcome: WashOutcome) -> Result<()> {
        let washing_id = washing_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "UPDATE washings
                 SET residual_volume = ?1,
                     integrity_test = ?2,
                     updated_at = ?3
                 WHERE id = ?4",
                params![
                    outcome.residual_volume,
                    outcome.integrity_test.code(),
                    format_timestamp(&Utc::now()),
                    washing_id,
                ],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Washing not found"));
            }

            Ok(())
        })
        .await
    }
}
