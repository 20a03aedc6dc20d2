//! Trigger rows: persisted hooks with pollable high-water marks.

use rusqlite::{params, Row};
use serde_json::Value;

use super::{opt_ts, sql_to_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{Trigger, TriggerType};

fn row_to_trigger(row: &Row<'_>) -> Result<Trigger, HiveError> {
    let trigger_type: String = row.get(2)?;
    let config: String = row.get(3)?;
    Ok(Trigger {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        trigger_type: TriggerType::parse(&trigger_type).unwrap_or(TriggerType::Webhook),
        config: serde_json::from_str(&config)?,
        history_id: row.get(4)?,
        watch_expiry: opt_ts(row.get(5)?)?,
        created_at: sql_to_ts(&row.get::<_, String>(6)?)?,
    })
}

const TRIGGER_COLUMNS: &str =
    "id, agent_id, trigger_type, config, history_id, watch_expiry, created_at";

impl Db {
    pub async fn create_trigger(
        &self,
        agent_id: i64,
        trigger_type: TriggerType,
        config: &Value,
    ) -> Result<Trigger, HiveError> {
        let config = serde_json::to_string(config)?;
        let now = ts_to_sql(chrono::Utc::now());
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO triggers (agent_id, trigger_type, config, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![agent_id, trigger_type.as_str(), config, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_trigger(id).await
    }

    pub async fn get_trigger(&self, id: i64) -> Result<Trigger, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_trigger(row),
                None => Err(HiveError::NotFound(format!("trigger {id}"))),
            }
        })
        .await
    }

    pub async fn list_triggers(&self, agent_id: i64) -> Result<Vec<Trigger>, HiveError> {
        self.call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRIGGER_COLUMNS} FROM triggers WHERE agent_id = ?1 ORDER BY id ASC"
            ))?;
            let mut rows = stmt.query(params![agent_id])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_trigger(row)?);
            }
            Ok(out)
        })
        .await
    }

    /// Advances a pollable trigger's high-water mark so polling resumes where
    /// it left off.
    pub async fn update_trigger_watermark(
        &self,
        id: i64,
        history_id: Option<String>,
        watch_expiry: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<(), HiveError> {
        let watch_expiry = watch_expiry.map(ts_to_sql);
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE triggers SET history_id = ?2, watch_expiry = ?3 WHERE id = ?1",
                params![id, history_id, watch_expiry],
            )?;
            if n == 0 {
                return Err(HiveError::NotFound(format!("trigger {id}")));
            }
            Ok(())
        })
        .await
    }
}
