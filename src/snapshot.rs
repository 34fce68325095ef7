//! Periodic snapshot reader
//!
//! Parses the aggregate cache the log producer rewrites on its own schedule.
//! The file is always optional and stale-tolerant: absent, empty or malformed
//! all map to `None`, never an error.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

/// Lifetime and per-day figures from the external aggregate cache. Read-only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotAggregate {
    pub last_computed_date: Option<DateTime<Utc>>,
    pub total_sessions: u32,
    pub total_messages: u32,
    pub daily_activity: Vec<DailyActivityEntry>,
    pub daily_model_tokens: Vec<DailyModelTokens>,
    pub model_costs: HashMap<String, f64>,
    pub total_time_saved_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivityEntry {
    pub date: NaiveDate,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub session_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyModelTokens {
    pub date: NaiveDate,
    #[serde(default)]
    pub tokens_by_model: HashMap<String, u64>,
}

pub fn read(path: &Path) -> Option<SnapshotAggregate> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            tracing::debug!("snapshot unavailable at {:?}: {}", path, err);
            return None;
        }
    };
    if content.trim().is_empty() {
        return None;
    }
    match serde_json::from_str(&content) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::debug!("malformed snapshot at {:?}: {}", path, err);
            None
        }
    }
}
