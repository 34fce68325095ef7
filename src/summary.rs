//! Reconciled usage data model
//!
//! `UsageSummary` is the engine's one output: a self-contained snapshot of
//! everything the tray icon, tooltip and dashboard need. One fresh value is
//! produced per reconciliation pass and broadcast whole; consumers never see
//! partial deltas.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel percentage meaning "no data from any source".
pub const NO_DATA: f64 = -1.0;

/// Placeholder for display strings when no projection can be made.
pub const PLACEHOLDER: &str = "\u{2014}";

/// One rate-limit window as reported by the live usage endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaWindow {
    pub used_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Supplementary spend-based window (pay-as-you-go overflow).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraSpend {
    pub enabled: bool,
    pub used_percent: f64,
    pub used_amount: f64,
    pub limit_amount: f64,
    pub currency: String,
}

/// Activity for one UTC calendar day, used for the 7-day dashboard sparkline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayActivity {
    pub date: NaiveDate,
    pub messages: u32,
    pub tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStats {
    pub messages: u32,
    pub tokens: u64,
    pub sessions: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeStats {
    pub sessions: u32,
    pub messages: u32,
}

/// Full reconciled usage summary for one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    /// Primary gauge value, clamped to `[0, 100]`, or [`NO_DATA`].
    pub estimated_percentage: f64,
    pub weekly_tokens_used: u64,
    pub weekly_token_limit: u64,
    pub tier: String,
    pub subscription_type: String,
    pub today: TodayStats,
    pub lifetime: LifetimeStats,
    pub model_breakdown: HashMap<String, u64>,
    /// Exactly 7 entries, oldest first, missing days zero-filled.
    pub daily_activity: Vec<DayActivity>,
    pub is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<QuotaWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly: Option<QuotaWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_sub: Option<QuotaWindow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_spend: Option<ExtraSpend>,
    pub total_cost_usd: f64,
    pub time_saved_ms: u64,
    pub daily_burn_rate_text: String,
    pub runway_text: String,
    pub session_runway_text: String,
    pub last_refresh_time: DateTime<Utc>,
}

impl UsageSummary {
    /// Build a summary with the "no data" sentinel and a zero-filled 7-day
    /// activity window ending at `today`.
    pub fn empty(today: NaiveDate, now: DateTime<Utc>) -> Self {
        let daily_activity = (0..7i64)
            .rev()
            .map(|back| DayActivity {
                date: today - Duration::days(back),
                messages: 0,
                tokens: 0,
            })
            .collect();

        Self {
            estimated_percentage: NO_DATA,
            weekly_tokens_used: 0,
            weekly_token_limit: 0,
            tier: String::new(),
            subscription_type: String::new(),
            today: TodayStats::default(),
            lifetime: LifetimeStats::default(),
            model_breakdown: HashMap::new(),
            daily_activity,
            is_live: false,
            session: None,
            weekly: None,
            model_sub: None,
            extra_spend: None,
            total_cost_usd: 0.0,
            time_saved_ms: 0,
            daily_burn_rate_text: PLACEHOLDER.to_string(),
            runway_text: PLACEHOLDER.to_string(),
            session_runway_text: PLACEHOLDER.to_string(),
            last_refresh_time: now,
        }
    }
}
