//! Run admission: global kill switch, per-user daily run cap, and the daily
//! cost budget reporting behind the ops summary.

use serde::Serialize;

use crate::db::Db;
use crate::error::HiveError;
use crate::model::{User, UserRole};

/// Refuses a run when the kill switch is on or the daily cap is reached.
/// Admins bypass both.
pub async fn assert_can_start_run(
    db: &Db,
    settings: &env_config::Settings,
    user: &User,
) -> Result<(), HiveError> {
    if user.role == UserRole::Admin {
        return Ok(());
    }
    if settings.llm_disabled {
        return Err(HiveError::Validation(
            "LLM is temporarily disabled by the administrator".to_string(),
        ));
    }
    let today = chrono::Utc::now().date_naive();
    let started = db.runs_started_on_day(user.id, today).await?;
    if started >= settings.daily_runs_per_user {
        return Err(HiveError::RateLimited(format!(
            "daily run limit of {} reached",
            settings.daily_runs_per_user
        )));
    }
    Ok(())
}

/// Daily usage versus budgets, for dashboards.
#[derive(Clone, Debug, Serialize)]
pub struct OpsSummary {
    pub runs_today: u32,
    pub user_cost_today_usd: f64,
    pub global_cost_today_usd: f64,
    /// Percent of the per-user daily budget consumed, when one is set.
    pub user_budget_pct: Option<f64>,
    /// Percent of the global daily budget consumed, when one is set.
    pub global_budget_pct: Option<f64>,
}

pub async fn ops_summary(
    db: &Db,
    settings: &env_config::Settings,
    owner_id: i64,
) -> Result<OpsSummary, HiveError> {
    let today = chrono::Utc::now().date_naive();
    let runs_today = db.runs_started_on_day(owner_id, today).await?;
    let user_cost = db.cost_on_day(Some(owner_id), today).await?;
    let global_cost = db.cost_on_day(None, today).await?;

    let pct = |cost_usd: f64, budget_cents: Option<u64>| {
        budget_cents.filter(|b| *b > 0).map(|budget| {
            let budget_usd = budget as f64 / 100.0;
            (cost_usd / budget_usd * 1000.0).round() / 10.0
        })
    };

    Ok(OpsSummary {
        runs_today,
        user_cost_today_usd: user_cost,
        global_cost_today_usd: global_cost,
        user_budget_pct: pct(user_cost, settings.daily_cost_per_user_cents),
        global_budget_pct: pct(global_cost, settings.daily_cost_global_cents),
    })
}
