//! Usage reconciler
//!
//! Pure merge of the three sources into one `UsageSummary`: the periodic
//! snapshot provides the baseline, the live-computed log buckets overlay it
//! (fresher figures only ever raise the estimate, never lower it), and the
//! live quota response, when present, supplies the authoritative percentages.
//! No I/O here; the pass's wall-clock time is an explicit input.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::plan;
use crate::quota::{LiveQuotaResponse, PlanMetadata};
use crate::scanner::DayBucket;
use crate::snapshot::SnapshotAggregate;
use crate::summary::{
    ExtraSpend, LifetimeStats, QuotaWindow, UsageSummary, PLACEHOLDER,
};

/// Length of the rolling weekly quota window, in days. The burn-rate
/// denominator assumes this matches the remote service's window.
const WEEKLY_WINDOW_DAYS: f64 = 7.0;

/// Length of the session quota window, in hours.
const SESSION_WINDOW_HOURS: f64 = 5.0;

pub struct ReconcileInputs<'a> {
    pub snapshot: Option<&'a SnapshotAggregate>,
    pub log_buckets: &'a HashMap<NaiveDate, DayBucket>,
    pub live: Option<&'a LiveQuotaResponse>,
    pub plan_meta: &'a PlanMetadata,
    pub plan_limits: &'a HashMap<String, u64>,
    pub now: DateTime<Utc>,
}

pub fn reconcile(inputs: ReconcileInputs<'_>) -> UsageSummary {
    let today = inputs.now.date_naive();
    let window_start = today - Duration::days(6);

    let mut summary = UsageSummary::empty(today, inputs.now);
    summary.tier = inputs.plan_meta.tier.clone();
    summary.subscription_type = inputs.plan_meta.subscription_type.clone();
    summary.weekly_token_limit = plan::weekly_limit_for_tier(&summary.tier, inputs.plan_limits);

    // No source produced anything: keep the sentinel percentage. A missing
    // snapshot with live log activity still yields a real summary below.
    if inputs.snapshot.is_none() && inputs.log_buckets.is_empty() {
        return summary;
    }

    if let Some(snapshot) = inputs.snapshot {
        fold_snapshot(&mut summary, snapshot, window_start, today);
    }
    overlay_log_buckets(&mut summary, inputs.log_buckets, window_start, today);

    summary.estimated_percentage =
        usage_percentage(summary.weekly_tokens_used, summary.weekly_token_limit);

    if let Some(live) = inputs.live {
        overlay_live(&mut summary, live);
    }

    let active_days = summary
        .daily_activity
        .iter()
        .filter(|day| day.tokens > 0)
        .count();
    let (burn_text, runway_text) = weekly_projection(
        summary.weekly_tokens_used,
        summary.weekly_token_limit,
        summary.weekly.as_ref().and_then(|w| w.resets_at),
        active_days,
        inputs.now,
    );
    summary.daily_burn_rate_text = burn_text;
    summary.runway_text = runway_text;
    summary.session_runway_text = session_runway(summary.session.as_ref(), inputs.now);

    summary
}

/// Step 4: baseline figures from the periodic snapshot.
fn fold_snapshot(
    summary: &mut UsageSummary,
    snapshot: &SnapshotAggregate,
    window_start: NaiveDate,
    today: NaiveDate,
) {
    summary.lifetime = LifetimeStats {
        sessions: snapshot.total_sessions,
        messages: snapshot.total_messages,
    };
    summary.total_cost_usd = snapshot.model_costs.values().sum();
    summary.time_saved_ms = snapshot.total_time_saved_ms;

    for entry in &snapshot.daily_model_tokens {
        if entry.date < window_start || entry.date > today {
            continue;
        }
        let day_total: u64 = entry.tokens_by_model.values().sum();
        summary.weekly_tokens_used += day_total;
        for (model, tokens) in &entry.tokens_by_model {
            *summary.model_breakdown.entry(model.clone()).or_insert(0) += tokens;
        }
        if entry.date == today {
            summary.today.tokens += day_total;
        }
        if let Some(day) = summary
            .daily_activity
            .iter_mut()
            .find(|day| day.date == entry.date)
        {
            day.tokens += day_total;
        }
    }

    for entry in &snapshot.daily_activity {
        if entry.date == today {
            summary.today.messages = entry.message_count;
            summary.today.sessions = entry.session_count;
        }
        if let Some(day) = summary
            .daily_activity
            .iter_mut()
            .find(|day| day.date == entry.date)
        {
            day.messages = entry.message_count;
        }
    }
}

/// Step 5: overlay log-derived figures. The logs are the fresher source, so
/// they only ever raise the estimate — max, never sum, never min.
fn overlay_log_buckets(
    summary: &mut UsageSummary,
    buckets: &HashMap<NaiveDate, DayBucket>,
    window_start: NaiveDate,
    today: NaiveDate,
) {
    let log_weekly: u64 = buckets
        .iter()
        .filter(|(date, _)| **date >= window_start && **date <= today)
        .map(|(_, bucket)| bucket.output_tokens)
        .sum();
    summary.weekly_tokens_used = summary.weekly_tokens_used.max(log_weekly);

    if let Some(bucket) = buckets.get(&today) {
        summary.today.messages = summary.today.messages.max(bucket.message_count);
        summary.today.tokens = summary.today.tokens.max(bucket.output_tokens);
        summary.today.sessions = summary.today.sessions.max(bucket.session_count);
    }

    for day in &mut summary.daily_activity {
        if let Some(bucket) = buckets.get(&day.date) {
            day.messages = day.messages.max(bucket.message_count);
            day.tokens = day.tokens.max(bucket.output_tokens);
        }
    }

    // The per-model breakdown is replaced wholesale: the log-derived one is
    // always more current than the snapshot's periodic recomputation.
    let log_breakdown = merge_model_breakdown(buckets, window_start, today);
    if !log_breakdown.is_empty() {
        summary.model_breakdown = log_breakdown;
    }
}

/// Merge per-day model maps across the window, case-insensitively, keeping
/// the first-seen casing (in date order) as the display key.
fn merge_model_breakdown(
    buckets: &HashMap<NaiveDate, DayBucket>,
    window_start: NaiveDate,
    today: NaiveDate,
) -> HashMap<String, u64> {
    let mut days: Vec<(&NaiveDate, &DayBucket)> = buckets
        .iter()
        .filter(|(date, _)| **date >= window_start && **date <= today)
        .collect();
    days.sort_by_key(|(date, _)| **date);

    let mut merged: HashMap<String, u64> = HashMap::new();
    let mut display_keys: HashMap<String, String> = HashMap::new();
    for (_, bucket) in days {
        for (model, tokens) in &bucket.tokens_by_model {
            let key = display_keys
                .entry(model.to_ascii_lowercase())
                .or_insert_with(|| model.clone())
                .clone();
            *merged.entry(key).or_insert(0) += tokens;
        }
    }
    merged
}

/// Step 6: live percentages are authoritative. The weekly limit is
/// back-calculated from the live percentage so the runway projection uses the
/// true observed limit instead of the configured approximation.
fn overlay_live(summary: &mut UsageSummary, live: &LiveQuotaResponse) {
    summary.is_live = true;

    let window = |w: &crate::quota::LiveWindow| QuotaWindow {
        used_percent: w.utilization,
        resets_at: w.resets_at,
    };
    summary.session = live.session.as_ref().map(window);
    summary.weekly = live.weekly.as_ref().map(window);
    summary.model_sub = live.model_sub.as_ref().map(window);
    summary.extra_spend = live.extra_spend.as_ref().map(|extra| ExtraSpend {
        enabled: extra.enabled,
        used_percent: extra.utilization,
        used_amount: extra.used_amount,
        limit_amount: extra.limit_amount,
        currency: extra.currency.clone(),
    });

    if let Some(weekly) = &live.weekly {
        if weekly.utilization > 0.0 && summary.weekly_tokens_used > 0 {
            summary.weekly_token_limit =
                (summary.weekly_tokens_used as f64 / (weekly.utilization / 100.0)).round() as u64;
        }
    }

    // The session window is the faster-moving, more actionable signal for the
    // primary gauge.
    if let Some(session) = &live.session {
        summary.estimated_percentage = session.utilization.clamp(0.0, 100.0);
    }
}

fn usage_percentage(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    ((used as f64 / limit as f64) * 100.0).clamp(0.0, 100.0)
}

fn weekly_projection(
    tokens_used: u64,
    token_limit: u64,
    weekly_resets_at: Option<DateTime<Utc>>,
    active_days: usize,
    now: DateTime<Utc>,
) -> (String, String) {
    if tokens_used == 0 {
        return (PLACEHOLDER.to_string(), PLACEHOLDER.to_string());
    }

    let days_until_reset = weekly_resets_at
        .map(|resets_at| ((resets_at - now).num_seconds() as f64 / 86_400.0).max(0.0));
    let days_elapsed = match days_until_reset {
        Some(until) => (WEEKLY_WINDOW_DAYS - until).max(1.0),
        None => (active_days as f64).max(1.0),
    };

    let daily_burn_rate = (tokens_used as f64 / days_elapsed).floor() as u64;
    let burn_text = format_burn_rate(daily_burn_rate);

    if daily_burn_rate == 0 || token_limit == 0 {
        return (burn_text, PLACEHOLDER.to_string());
    }

    let remaining = token_limit as i64 - tokens_used as i64;
    if remaining <= 0 {
        return (burn_text, "At limit".to_string());
    }

    let runway_days = remaining as f64 / daily_burn_rate as f64;
    let runway_text = match days_until_reset {
        Some(until) if runway_days >= until => "Resets first".to_string(),
        _ if runway_days < 1.0 => "< 1 day".to_string(),
        _ => format!("~{:.1} days", runway_days),
    };
    (burn_text, runway_text)
}

fn format_burn_rate(tokens_per_day: u64) -> String {
    if tokens_per_day >= 1_000_000 {
        format!("{:.1}M/day", tokens_per_day as f64 / 1_000_000.0)
    } else if tokens_per_day >= 1_000 {
        format!("{:.0}K/day", tokens_per_day as f64 / 1_000.0)
    } else {
        format!("{}/day", tokens_per_day)
    }
}

/// Per-hour extrapolation over the 5-hour session window.
fn session_runway(session: Option<&QuotaWindow>, now: DateTime<Utc>) -> String {
    let Some(window) = session else {
        return PLACEHOLDER.to_string();
    };
    let Some(resets_at) = window.resets_at else {
        return PLACEHOLDER.to_string();
    };

    let percent = window.used_percent;
    let hours_until_reset = (resets_at - now).num_seconds() as f64 / 3_600.0;
    let hours_elapsed = SESSION_WINDOW_HOURS - hours_until_reset;
    if hours_elapsed <= 0.0 || percent <= 0.0 {
        return PLACEHOLDER.to_string();
    }
    if percent >= 99.5 {
        return "At limit".to_string();
    }

    let burn_per_hour = percent / hours_elapsed;
    let hours_to_limit = (100.0 - percent) / burn_per_hour;
    if hours_to_limit >= hours_until_reset {
        return "Resets first".to_string();
    }

    if hours_to_limit < 1.0 {
        let minutes = (hours_to_limit * 60.0).round() as i64;
        if minutes < 1 {
            "< 1m".to_string()
        } else {
            format!("~{}m", minutes)
        }
    } else {
        let total_minutes = (hours_to_limit * 60.0).round() as i64;
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        if minutes == 0 {
            format!("~{}h", hours)
        } else {
            format!("~{}h {}m", hours, minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::LiveWindow;
    use crate::snapshot::{DailyActivityEntry, DailyModelTokens};
    use crate::summary::NO_DATA;
    use chrono::TimeZone;

    fn test_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).unwrap()
    }

    fn inputs<'a>(
        snapshot: Option<&'a SnapshotAggregate>,
        buckets: &'a HashMap<NaiveDate, DayBucket>,
        live: Option<&'a LiveQuotaResponse>,
        plan_meta: &'a PlanMetadata,
        plan_limits: &'a HashMap<String, u64>,
    ) -> ReconcileInputs<'a> {
        ReconcileInputs {
            snapshot,
            log_buckets: buckets,
            live,
            plan_meta,
            plan_limits,
            now: test_now(),
        }
    }

    fn snapshot_with_tokens(date: NaiveDate, model: &str, tokens: u64) -> SnapshotAggregate {
        SnapshotAggregate {
            daily_model_tokens: vec![DailyModelTokens {
                date,
                tokens_by_model: HashMap::from([(model.to_string(), tokens)]),
            }],
            ..Default::default()
        }
    }

    fn day_bucket(tokens: u64, messages: u32, sessions: u32) -> DayBucket {
        let mut bucket = DayBucket::default();
        bucket.message_count = messages;
        bucket.output_tokens = tokens;
        bucket.session_count = sessions;
        if tokens > 0 {
            bucket.add_model_tokens("claude-x", tokens);
        }
        bucket
    }

    #[test]
    fn no_sources_yields_sentinel() {
        let buckets = HashMap::new();
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(None, &buckets, None, &meta, &limits));

        assert_eq!(summary.estimated_percentage, NO_DATA);
        assert_eq!(summary.daily_burn_rate_text, PLACEHOLDER);
        assert_eq!(summary.runway_text, PLACEHOLDER);
        assert_eq!(summary.daily_activity.len(), 7);
    }

    #[test]
    fn empty_window_is_zero_percent_not_error() {
        // Snapshot present but no dailyModelTokens in the trailing 7 days.
        let old = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        let snapshot = snapshot_with_tokens(old, "claude-x", 900_000);
        let buckets = HashMap::new();
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));

        assert_eq!(summary.weekly_tokens_used, 0);
        assert_eq!(summary.estimated_percentage, 0.0);
    }

    #[test]
    fn zero_limit_is_zero_percent_not_division_fault() {
        let today = test_now().date_naive();
        let snapshot = snapshot_with_tokens(today, "claude-x", 500);
        let buckets = HashMap::new();
        let meta = PlanMetadata {
            tier: "broken_tier".to_string(),
            subscription_type: String::new(),
        };
        let limits = HashMap::from([("broken_tier".to_string(), 0u64)]);
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));

        assert_eq!(summary.weekly_token_limit, 0);
        assert_eq!(summary.estimated_percentage, 0.0);
    }

    #[test]
    fn over_limit_clamps_to_exactly_100() {
        let today = test_now().date_naive();
        let snapshot = snapshot_with_tokens(today, "claude-x", 99_000_000);
        let buckets = HashMap::new();
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));

        assert_eq!(summary.estimated_percentage, 100.0);
    }

    #[test]
    fn reconcile_is_idempotent_for_fixed_now() {
        let today = test_now().date_naive();
        let snapshot = snapshot_with_tokens(today, "claude-x", 1200);
        let mut buckets = HashMap::new();
        buckets.insert(today, day_bucket(2000, 4, 1));
        let meta = PlanMetadata::default();
        let limits = HashMap::new();

        let first = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));
        let second = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));
        assert_eq!(first, second);
    }

    #[test]
    fn weekly_tokens_are_max_of_sources_never_sum() {
        let today = test_now().date_naive();
        let meta = PlanMetadata::default();
        let limits = HashMap::new();

        // Log-derived larger.
        let snapshot = snapshot_with_tokens(today, "claude-x", 1000);
        let mut buckets = HashMap::new();
        buckets.insert(today, day_bucket(3000, 0, 0));
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));
        assert_eq!(summary.weekly_tokens_used, 3000);

        // Snapshot-derived larger: a stale log scan never lowers the figure.
        let snapshot = snapshot_with_tokens(today, "claude-x", 8000);
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));
        assert_eq!(summary.weekly_tokens_used, 8000);
    }

    #[test]
    fn today_prefers_larger_message_count() {
        let today = test_now().date_naive();
        let snapshot = SnapshotAggregate {
            daily_activity: vec![DailyActivityEntry {
                date: today,
                message_count: 3,
                session_count: 1,
            }],
            ..Default::default()
        };
        let mut buckets = HashMap::new();
        buckets.insert(today, day_bucket(0, 9, 2));
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));

        assert_eq!(summary.today.messages, 9);
        assert_eq!(summary.today.sessions, 2);
    }

    #[test]
    fn log_breakdown_replaces_snapshot_breakdown_when_nonempty() {
        let today = test_now().date_naive();
        let snapshot = snapshot_with_tokens(today, "claude-old", 500);
        let mut buckets = HashMap::new();
        buckets.insert(today, day_bucket(700, 0, 0));
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(Some(&snapshot), &buckets, None, &meta, &limits));

        assert_eq!(summary.model_breakdown.len(), 1);
        assert_eq!(summary.model_breakdown["claude-x"], 700);
    }

    #[test]
    fn live_overlay_sets_gauge_and_back_calculates_limit() {
        let today = test_now().date_naive();
        let snapshot = snapshot_with_tokens(today, "claude-x", 1_000_000);
        let buckets = HashMap::new();
        let live = LiveQuotaResponse {
            session: Some(LiveWindow {
                utilization: 35.0,
                resets_at: Some(test_now() + Duration::hours(2)),
            }),
            weekly: Some(LiveWindow {
                utilization: 40.0,
                resets_at: Some(test_now() + Duration::days(3)),
            }),
            ..Default::default()
        };
        let meta = PlanMetadata::default();
        let limits = HashMap::new();
        let summary = reconcile(inputs(Some(&snapshot), &buckets, Some(&live), &meta, &limits));

        assert!(summary.is_live);
        assert_eq!(summary.estimated_percentage, 35.0);
        // 1,000,000 / 0.40 = 2,500,000 observed limit
        assert_eq!(summary.weekly_token_limit, 2_500_000);
    }

    #[test]
    fn burn_rate_formatting_by_magnitude() {
        assert_eq!(format_burn_rate(999), "999/day");
        assert_eq!(format_burn_rate(1000), "1K/day");
        assert_eq!(format_burn_rate(1_000_000), "1.0M/day");
    }

    #[test]
    fn runway_under_one_day() {
        // used=2.4M, limit=2.5M, resets in 5 days -> elapsed=2, burn=1.2M/day,
        // remaining=100K, runway ~0.083 days.
        let (burn, runway) = weekly_projection(
            2_400_000,
            2_500_000,
            Some(test_now() + Duration::days(5)),
            0,
            test_now(),
        );
        assert_eq!(burn, "1.2M/day");
        assert_eq!(runway, "< 1 day");
    }

    #[test]
    fn runway_reset_beats_exhaustion() {
        // burn = 100K/day over 2 elapsed days, remaining 2.3M -> 23 days >= 5.
        let (_, runway) = weekly_projection(
            200_000,
            2_500_000,
            Some(test_now() + Duration::days(5)),
            0,
            test_now(),
        );
        assert_eq!(runway, "Resets first");
    }

    #[test]
    fn runway_at_limit_and_no_usage() {
        let (_, runway) =
            weekly_projection(2_600_000, 2_500_000, None, 3, test_now());
        assert_eq!(runway, "At limit");

        let (burn, runway) = weekly_projection(0, 2_500_000, None, 0, test_now());
        assert_eq!(burn, PLACEHOLDER);
        assert_eq!(runway, PLACEHOLDER);
    }

    #[test]
    fn runway_multi_day_without_reset_uses_active_days() {
        // 300K over 3 active days = 100K/day; remaining 2.2M -> ~22 days.
        let (burn, runway) = weekly_projection(300_000, 2_500_000, None, 3, test_now());
        assert_eq!(burn, "100K/day");
        assert_eq!(runway, "~22.0 days");
    }

    #[test]
    fn session_runway_cases() {
        let now = test_now();
        let window = |pct: f64, resets_in_hours: f64| QuotaWindow {
            used_percent: pct,
            resets_at: Some(now + Duration::seconds((resets_in_hours * 3600.0) as i64)),
        };

        assert_eq!(session_runway(None, now), PLACEHOLDER);
        assert_eq!(
            session_runway(
                Some(&QuotaWindow {
                    used_percent: 50.0,
                    resets_at: None
                }),
                now
            ),
            PLACEHOLDER
        );
        // Window has not started burning yet.
        assert_eq!(session_runway(Some(&window(50.0, 5.0)), now), PLACEHOLDER);
        assert_eq!(session_runway(Some(&window(0.0, 2.0)), now), PLACEHOLDER);
        assert_eq!(session_runway(Some(&window(99.7, 2.0)), now), "At limit");
        // 50% over 2.5h elapsed -> 20%/h -> 2.5h to limit >= 2.5h until reset.
        assert_eq!(session_runway(Some(&window(50.0, 2.5)), now), "Resets first");
        // 80% over 1h elapsed -> 80%/h -> 0.25h to limit -> ~15m.
        assert_eq!(session_runway(Some(&window(80.0, 4.0)), now), "~15m");
        // 60% over 0.5h elapsed -> 120%/h -> 20m... under an hour.
        assert_eq!(session_runway(Some(&window(60.0, 4.5)), now), "~20m");
    }

    #[test]
    fn session_runway_hours_format() {
        let now = test_now();
        // 40% over 3h elapsed -> 13.33%/h -> 4.5h to limit, but only 2h until
        // reset, so the reset wins.
        let near_reset = QuotaWindow {
            used_percent: 40.0,
            resets_at: Some(now + Duration::hours(2)),
        };
        assert_eq!(session_runway(Some(&near_reset), now), "Resets first");

        // 30% over 0.5h elapsed -> 60%/h -> ~1.17h to limit, 4.5h until reset.
        let early = QuotaWindow {
            used_percent: 30.0,
            resets_at: Some(now + Duration::seconds(16_200)),
        };
        assert_eq!(session_runway(Some(&early), now), "~1h 10m");
    }
}
