//! Profile configuration
//!
//! One profile per configured Claude Code data directory. Profiles are fully
//! independent; each gets its own reconciliation pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub name: String,
    /// Root of the per-conversation JSONL logs.
    pub log_dir: PathBuf,
    /// Periodic aggregate cache written by the log producer.
    pub snapshot_path: PathBuf,
    /// OAuth credential file, read passively.
    pub credentials_path: PathBuf,
    /// Trailing window for the log scan, in calendar days.
    pub window_days: i64,
    /// Fallback poll interval; guarantees freshness without file events.
    pub poll_interval: Duration,
    /// Coalescing window for bursts of file-change notifications.
    pub debounce: Duration,
    /// Per-profile tier -> weekly token limit overrides.
    pub plan_limits: HashMap<String, u64>,
}

impl ProfileConfig {
    pub fn for_config_dir(name: impl Into<String>, dir: &Path) -> Self {
        Self {
            name: name.into(),
            log_dir: dir.join("projects"),
            snapshot_path: dir.join("usage-snapshot.json"),
            credentials_path: dir.join(".credentials.json"),
            window_days: 7,
            poll_interval: Duration::from_secs(300),
            debounce: Duration::from_millis(500),
            plan_limits: HashMap::new(),
        }
    }

    /// Resolve every configured profile. `CLAUDE_CONFIG_DIR` may name several
    /// comma-separated directories; otherwise the conventional home-dir
    /// locations are probed.
    pub fn discover() -> Vec<ProfileConfig> {
        if let Ok(env) = std::env::var("CLAUDE_CONFIG_DIR") {
            let mut profiles = Vec::new();
            for part in env.split(',') {
                let trimmed = part.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let path = PathBuf::from(trimmed);
                profiles.push(Self::for_config_dir(profile_name(&path), &path));
            }
            if !profiles.is_empty() {
                return profiles;
            }
        }

        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"));
        let candidates = [home.join(".config").join("claude"), home.join(".claude")];
        let mut profiles: Vec<ProfileConfig> = candidates
            .iter()
            .filter(|dir| dir.exists())
            .map(|dir| Self::for_config_dir(profile_name(dir), dir))
            .collect();
        if profiles.is_empty() {
            profiles.push(Self::for_config_dir("claude", &home.join(".claude")));
        }
        profiles
    }
}

fn profile_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.trim_start_matches('.').to_string())
        .unwrap_or_else(|| "claude".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_layout_is_conventional() {
        let config = ProfileConfig::for_config_dir("claude", Path::new("/home/dev/.claude"));
        assert_eq!(config.log_dir, Path::new("/home/dev/.claude/projects"));
        assert_eq!(
            config.snapshot_path,
            Path::new("/home/dev/.claude/usage-snapshot.json")
        );
        assert_eq!(
            config.credentials_path,
            Path::new("/home/dev/.claude/.credentials.json")
        );
        assert_eq!(config.window_days, 7);
        assert_eq!(config.debounce, Duration::from_millis(500));
    }

    #[test]
    fn profile_name_strips_leading_dot() {
        assert_eq!(profile_name(Path::new("/home/dev/.claude")), "claude");
        assert_eq!(profile_name(Path::new("/opt/work-claude")), "work-claude");
    }
}
