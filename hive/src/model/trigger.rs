//! Persisted trigger hooks (email, webhook, cron).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Email,
    Webhook,
    Cron,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Cron => "cron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "webhook" => Some(Self::Webhook),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

/// A persisted hook that fires agent runs. `config` is the provider-specific
/// blob; pollable sources track a high-water mark so polling resumes where it
/// left off (e.g. a Gmail `history_id` and watch expiry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub agent_id: i64,
    pub trigger_type: TriggerType,
    pub config: Value,
    pub history_id: Option<String>,
    pub watch_expiry: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_type_round_trips() {
        for t in [TriggerType::Email, TriggerType::Webhook, TriggerType::Cron] {
            assert_eq!(TriggerType::parse(t.as_str()), Some(t));
        }
    }
}
