//! Plan tier tables
//!
//! Static tier -> weekly token limit mapping used as a fallback before live
//! data is available, plus the display-name transform for unknown tier codes.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Fallback when the tier is unknown to the table.
pub const DEFAULT_WEEKLY_TOKEN_LIMIT: u64 = 2_500_000;

static PLAN_WEEKLY_LIMITS: Lazy<HashMap<&'static str, u64>> = Lazy::new(|| {
    let mut limits = HashMap::new();
    limits.insert("default_claude_ai", 2_500_000);
    limits.insert("default_claude_pro", 2_500_000);
    limits.insert("default_claude_team", 5_000_000);
    limits.insert("default_claude_max_5x", 12_500_000);
    limits.insert("default_claude_max_20x", 50_000_000);
    limits
});

static PLAN_DISPLAY_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut names = HashMap::new();
    names.insert("default_claude_ai", "Free");
    names.insert("default_claude_pro", "Pro");
    names.insert("default_claude_team", "Team");
    names.insert("default_claude_max_5x", "Max 5x");
    names.insert("default_claude_max_20x", "Max 20x");
    names
});

/// Weekly token limit for a tier: per-profile override first, then the static
/// table, then [`DEFAULT_WEEKLY_TOKEN_LIMIT`].
pub fn weekly_limit_for_tier(tier: &str, overrides: &HashMap<String, u64>) -> u64 {
    if let Some(limit) = overrides.get(tier) {
        return *limit;
    }
    PLAN_WEEKLY_LIMITS
        .get(tier)
        .copied()
        .unwrap_or(DEFAULT_WEEKLY_TOKEN_LIMIT)
}

/// Human-readable plan name. Known tiers use the static mapping; anything else
/// goes through a deterministic transform: strip known prefixes, split on
/// separators, title-case.
pub fn display_name(tier: &str) -> String {
    if let Some(name) = PLAN_DISPLAY_NAMES.get(tier) {
        return (*name).to_string();
    }

    let mut rest = tier;
    for prefix in ["default_", "claude_", "anthropic_"] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
        }
    }

    rest.split(['_', '-'])
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_lookup_prefers_override_then_table_then_default() {
        let mut overrides = HashMap::new();
        overrides.insert("default_claude_pro".to_string(), 9_000_000u64);

        assert_eq!(
            weekly_limit_for_tier("default_claude_pro", &overrides),
            9_000_000
        );
        assert_eq!(
            weekly_limit_for_tier("default_claude_max_5x", &HashMap::new()),
            12_500_000
        );
        assert_eq!(
            weekly_limit_for_tier("some_new_tier", &HashMap::new()),
            DEFAULT_WEEKLY_TOKEN_LIMIT
        );
    }

    #[test]
    fn display_name_falls_back_to_title_case_transform() {
        assert_eq!(display_name("default_claude_max_20x"), "Max 20x");
        assert_eq!(display_name("default_claude_enterprise"), "Enterprise");
        assert_eq!(display_name("anthropic_starter-plus"), "Starter Plus");
        assert_eq!(display_name(""), "");
    }
}
