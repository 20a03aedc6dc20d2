//! Run rows: the registry of every execution attempt. Immutable once finished.

use rusqlite::{params, Row};

use super::{opt_ts, ts_to_sql, Db};
use crate::error::HiveError;
use crate::model::{Run, RunStatus, RunTrigger};

fn row_to_run(row: &Row<'_>) -> Result<Run, HiveError> {
    let status: String = row.get(3)?;
    let trigger: String = row.get(4)?;
    Ok(Run {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        thread_id: row.get(2)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Queued),
        trigger: RunTrigger::parse(&trigger).unwrap_or(RunTrigger::Api),
        started_at: opt_ts(row.get(5)?)?,
        finished_at: opt_ts(row.get(6)?)?,
        duration_ms: row.get(7)?,
        total_tokens: row.get(8)?,
        total_cost_usd: row.get(9)?,
        error: row.get(10)?,
        summary: row.get(11)?,
    })
}

const RUN_COLUMNS: &str = "id, agent_id, thread_id, status, trigger, started_at, finished_at,
    duration_ms, total_tokens, total_cost_usd, error, summary";

impl Db {
    pub async fn create_run(
        &self,
        agent_id: i64,
        thread_id: Option<i64>,
        trigger: RunTrigger,
        status: RunStatus,
    ) -> Result<Run, HiveError> {
        let id = self
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runs (agent_id, thread_id, status, trigger)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![agent_id, thread_id, status.as_str(), trigger.as_str()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        self.get_run(id).await
    }

    pub async fn get_run(&self, id: i64) -> Result<Run, HiveError> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"))?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => row_to_run(row),
                None => Err(HiveError::NotFound(format!("run {id}"))),
            }
        })
        .await
    }

    pub async fn mark_run_running(&self, id: i64) -> Result<(), HiveError> {
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            conn.execute(
                "UPDATE runs SET status = 'running', started_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
            Ok(())
        })
        .await
    }

    /// Finishes a run. Finished runs are immutable: a second terminal write is
    /// a conflict.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_run_finished(
        &self,
        id: i64,
        status: RunStatus,
        duration_ms: i64,
        total_tokens: Option<i64>,
        total_cost_usd: Option<f64>,
        error: Option<String>,
        summary: Option<String>,
    ) -> Result<Run, HiveError> {
        if !status.is_terminal() {
            return Err(HiveError::Validation(format!(
                "'{}' is not a terminal run status",
                status.as_str()
            )));
        }
        let now = ts_to_sql(chrono::Utc::now());
        self.call(move |conn| {
            let n = conn.execute(
                "UPDATE runs SET status = ?2, finished_at = ?3, duration_ms = ?4,
                    total_tokens = ?5, total_cost_usd = ?6, error = ?7, summary = ?8
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![
                    id,
                    status.as_str(),
                    now,
                    duration_ms,
                    total_tokens,
                    total_cost_usd,
                    error,
                    summary
                ],
            )?;
            if n == 0 {
                return Err(HiveError::Conflict(format!("run {id} already finished")));
            }
            Ok(())
        })
        .await?;
        self.get_run(id).await
    }

    /// Count of runs started by this owner's agents in the given UTC calendar
    /// day (used for the daily quota).
    pub async fn runs_started_on_day(
        &self,
        owner_id: i64,
        day: chrono::NaiveDate,
    ) -> Result<u32, HiveError> {
        let day_start = format!("{day}T00:00:00");
        let day_end = format!("{day}T23:59:59.999999999");
        self.call(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM runs r
                 JOIN agents a ON a.id = r.agent_id
                 WHERE a.owner_id = ?1 AND r.started_at >= ?2 AND r.started_at <= ?3",
                params![owner_id, day_start, day_end],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
        .await
    }

    /// Total provider-reported cost (USD) booked on the given UTC day,
    /// optionally restricted to one owner.
    pub async fn cost_on_day(
        &self,
        owner_id: Option<i64>,
        day: chrono::NaiveDate,
    ) -> Result<f64, HiveError> {
        let day_start = format!("{day}T00:00:00");
        let day_end = format!("{day}T23:59:59.999999999");
        self.call(move |conn| {
            let total: f64 = match owner_id {
                Some(owner) => conn.query_row(
                    "SELECT COALESCE(SUM(r.total_cost_usd), 0) FROM runs r
                     JOIN agents a ON a.id = r.agent_id
                     WHERE a.owner_id = ?1 AND r.started_at >= ?2 AND r.started_at <= ?3",
                    params![owner, day_start, day_end],
                    |row| row.get(0),
                )?,
                None => conn.query_row(
                    "SELECT COALESCE(SUM(total_cost_usd), 0) FROM runs
                     WHERE started_at >= ?1 AND started_at <= ?2",
                    params![day_start, day_end],
                    |row| row.get(0),
                )?,
            };
            Ok(total)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::agents::NewAgent;
    use super::super::test_support::open_temp;
    use super::*;
    use crate::model::UserRole;

    async fn seed_agent(db: &Db) -> (i64, i64) {
        let owner = db
            .create_user("r@example.com", None, UserRole::User)
            .await
            .unwrap()
            .id;
        let agent = db
            .create_agent(NewAgent {
                owner_id: owner,
                name: "a".into(),
                model: "gpt-4o-mini".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (owner, agent.id)
    }

    #[tokio::test]
    async fn run_lifecycle_and_immutability() {
        let (_dir, db) = open_temp().await;
        let (_owner, agent_id) = seed_agent(&db).await;
        let run = db
            .create_run(agent_id, None, RunTrigger::Manual, RunStatus::Queued)
            .await
            .unwrap();
        db.mark_run_running(run.id).await.unwrap();
        let finished = db
            .mark_run_finished(
                run.id,
                RunStatus::Success,
                1200,
                Some(345),
                Some(0.0021),
                None,
                Some("did the thing".into()),
            )
            .await
            .unwrap();
        assert_eq!(finished.status, RunStatus::Success);
        assert_eq!(finished.total_tokens, Some(345));

        // Finished runs are immutable.
        assert!(matches!(
            db.mark_run_finished(run.id, RunStatus::Failed, 1, None, None, None, None)
                .await,
            Err(HiveError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn daily_counters() {
        let (_dir, db) = open_temp().await;
        let (owner, agent_id) = seed_agent(&db).await;
        for _ in 0..3 {
            let run = db
                .create_run(agent_id, None, RunTrigger::Schedule, RunStatus::Queued)
                .await
                .unwrap();
            db.mark_run_running(run.id).await.unwrap();
            db.mark_run_finished(run.id, RunStatus::Success, 10, Some(100), Some(0.01), None, None)
                .await
                .unwrap();
        }
        let today = chrono::Utc::now().date_naive();
        assert_eq!(db.runs_started_on_day(owner, today).await.unwrap(), 3);
        let cost = db.cost_on_day(Some(owner), today).await.unwrap();
        assert!((cost - 0.03).abs() < 1e-9);
        assert!((db.cost_on_day(None, today).await.unwrap() - 0.03).abs() < 1e-9);
    }
}
