//! Conversation log scanner
//!
//! Walks the Claude Code projects tree and folds each JSONL record into
//! per-UTC-day activity buckets. Every file is rescanned in full on each pass;
//! the only filter is the file-level mtime window. Unreadable files and
//! malformed lines are skipped, never fatal.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;

/// Aggregated activity for one UTC calendar day.
#[derive(Debug, Clone, Default)]
pub struct DayBucket {
    pub message_count: u32,
    pub output_tokens: u64,
    pub session_count: u32,
    /// Per-model output tokens, keyed by the first-seen casing of the model name.
    pub tokens_by_model: HashMap<String, u64>,
    // lowercase model name -> display key in tokens_by_model
    model_keys: HashMap<String, String>,
}

impl DayBucket {
    /// Accumulate output tokens under a case-insensitive model key, keeping the
    /// first-seen casing as the display key.
    pub fn add_model_tokens(&mut self, model: &str, tokens: u64) {
        let key = self
            .model_keys
            .entry(model.to_ascii_lowercase())
            .or_insert_with(|| model.to_string())
            .clone();
        *self.tokens_by_model.entry(key).or_insert(0) += tokens;
    }
}

/// Scan every conversation log under `log_dir` and bucket activity by UTC day.
pub fn scan(log_dir: &Path, window_days: i64) -> HashMap<NaiveDate, DayBucket> {
    scan_at(log_dir, window_days, Utc::now().date_naive())
}

pub(crate) fn scan_at(
    log_dir: &Path,
    window_days: i64,
    today: NaiveDate,
) -> HashMap<NaiveDate, DayBucket> {
    let cutoff = today - Duration::days(window_days.max(1) - 1);
    let mut buckets = HashMap::new();

    for path in collect_log_files(log_dir) {
        if !modified_within_window(&path, cutoff) {
            continue;
        }
        scan_log_file(&path, &mut buckets);
    }

    buckets
}

/// Recursively collect `.jsonl` files, skipping dot-directories and any path
/// with a `subagents` segment (subagent transcripts carry synthetic tool
/// prompts, not user activity).
fn collect_log_files(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("skipping unreadable directory {:?}: {}", dir, err);
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    if name.starts_with('.') || name == "subagents" {
                        continue;
                    }
                }
                stack.push(path);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
    }

    files
}

/// File-level staleness filter: keep files whose mtime (UTC date) falls inside
/// the trailing window. Performance only; retained files are rescanned in full.
fn modified_within_window(path: &Path, cutoff: NaiveDate) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map(|mtime| DateTime::<Utc>::from(mtime).date_naive() >= cutoff)
        .unwrap_or(true)
}

fn scan_log_file(path: &Path, buckets: &mut HashMap<NaiveDate, DayBucket>) {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            tracing::debug!("skipping unreadable log file {:?}: {}", path, err);
            return;
        }
    };
    let reader = BufReader::new(file);
    // Days on which this file produced at least one human message; each file
    // contributes at most one session per day.
    let mut message_days: HashSet<NaiveDate> = HashSet::new();

    for line in reader.lines().flatten() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let record_type = match value.get("type").and_then(Value::as_str) {
            Some(t) => t,
            None => continue,
        };
        let day = match record_day(&value) {
            Some(day) => day,
            None => continue,
        };

        match record_type {
            "user" => {
                if is_human_message(&value) {
                    buckets.entry(day).or_default().message_count += 1;
                    message_days.insert(day);
                }
            }
            "assistant" => {
                let output = value
                    .get("message")
                    .and_then(|m| m.get("usage"))
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                if output == 0 {
                    continue;
                }
                let bucket = buckets.entry(day).or_default();
                bucket.output_tokens += output;
                if let Some(model) = value
                    .get("message")
                    .and_then(|m| m.get("model"))
                    .and_then(Value::as_str)
                {
                    bucket.add_model_tokens(model, output);
                }
            }
            _ => {}
        }
    }

    for day in message_days {
        buckets.entry(day).or_default().session_count += 1;
    }
}

fn record_day(value: &Value) -> Option<NaiveDate> {
    let timestamp = value.get("timestamp").and_then(Value::as_str)?;
    let parsed = DateTime::parse_from_rfc3339(timestamp).ok()?;
    Some(parsed.with_timezone(&Utc).date_naive())
}

/// A `"user"` record counts as a human message only when its content is
/// human-authored text. String content is human iff it does not start with `<`
/// (system-injected content is always wrapped in an XML-like tag); array
/// content is human iff at least one block is a `text` block.
fn is_human_message(value: &Value) -> bool {
    match value.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(text)) => !text.starts_with('<'),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .any(|block| block.get("type").and_then(Value::as_str) == Some("text")),
        _ => false,
    }
}
