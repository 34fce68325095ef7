//! Refresh orchestration
//!
//! One `Pipeline` per profile. A pass scans the logs and snapshot on the
//! blocking pool, attempts the live quota fetch best-effort, reconciles, and
//! broadcasts the fresh summary. Triggers come from a fallback poll timer and
//! a debounced file watcher; at most one pass is in flight at a time, and a
//! trigger that arrives mid-pass is dropped — the next tick supersedes it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::MissedTickBehavior;

use crate::config::ProfileConfig;
use crate::quota::{self, QuotaClient};
use crate::reconcile::{reconcile, ReconcileInputs};
use crate::scanner;
use crate::snapshot;
use crate::summary::UsageSummary;

enum WatchSignal {
    Changed,
    Failed,
}

pub struct Pipeline {
    config: ProfileConfig,
    quota: tokio::sync::Mutex<QuotaClient>,
    // Binary gate: at most one reconciliation pass in flight per profile.
    gate: Semaphore,
    last_trigger: Mutex<Option<Instant>>,
    updates: broadcast::Sender<UsageSummary>,
}

impl Pipeline {
    pub fn new(config: ProfileConfig) -> Arc<Self> {
        let (updates, _) = broadcast::channel(16);
        Arc::new(Self {
            config,
            quota: tokio::sync::Mutex::new(QuotaClient::new()),
            gate: Semaphore::new(1),
            last_trigger: Mutex::new(None),
            updates,
        })
    }

    pub fn profile_name(&self) -> &str {
        &self.config.name
    }

    /// One "summary updated" event per completed pass, carrying the full
    /// summary. Consumers never see partial deltas.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageSummary> {
        self.updates.subscribe()
    }

    /// Run one reconciliation pass now. Returns `None` when another pass is
    /// already in flight (the skipped call is correct, not an error).
    pub async fn refresh(&self) -> Option<UsageSummary> {
        let _permit = match self.gate.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!(profile = %self.config.name, "refresh skipped, pass in flight");
                return None;
            }
        };

        let summary = self.run_pass().await;
        let _ = self.updates.send(summary.clone());
        Some(summary)
    }

    async fn run_pass(&self) -> UsageSummary {
        let config = self.config.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            let buckets = scanner::scan(&config.log_dir, config.window_days);
            let snapshot = snapshot::read(&config.snapshot_path);
            let plan_meta = quota::read_plan_metadata(&config.credentials_path);
            (buckets, snapshot, plan_meta)
        })
        .await;

        let (buckets, snapshot, plan_meta) = match scanned {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(profile = %self.config.name, "scan task failed: {}", err);
                (HashMap::new(), None, Default::default())
            }
        };

        let live = {
            let mut client = self.quota.lock().await;
            client.fetch(&self.config.credentials_path).await
        };

        reconcile(ReconcileInputs {
            snapshot: snapshot.as_ref(),
            log_buckets: &buckets,
            live: live.as_ref(),
            plan_meta: &plan_meta,
            plan_limits: &self.config.plan_limits,
            now: Utc::now(),
        })
    }

    /// Schedule a pass unless we are inside the debounce window.
    pub fn trigger(self: &Arc<Self>) {
        if !self.debounce_elapsed() {
            return;
        }
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.refresh().await;
        });
    }

    fn debounce_elapsed(&self) -> bool {
        let mut last = self
            .last_trigger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.config.debounce {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Drive the pipeline: an immediate pass, then the poll timer plus the
    /// file watcher. Watcher setup failure is non-fatal (the poll timer keeps
    /// things fresh); a watcher error after setup recreates the watcher.
    pub async fn run(self: Arc<Self>) {
        self.trigger();

        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
        let mut debouncer = self.spawn_watcher(&watch_tx);

        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await; // the first tick completes immediately

        loop {
            tokio::select! {
                _ = poll.tick() => self.trigger(),
                signal = watch_rx.recv() => match signal {
                    Some(WatchSignal::Changed) => self.trigger(),
                    Some(WatchSignal::Failed) => {
                        tracing::warn!(profile = %self.config.name, "file watcher failed, recreating");
                        debouncer = self.spawn_watcher(&watch_tx);
                        self.trigger();
                    }
                    None => break,
                },
            }
        }

        drop(debouncer);
    }

    fn spawn_watcher(
        &self,
        tx: &mpsc::UnboundedSender<WatchSignal>,
    ) -> Option<Debouncer<RecommendedWatcher>> {
        let tx = tx.clone();
        let result = new_debouncer(
            self.config.debounce,
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if !events.is_empty() {
                        let _ = tx.send(WatchSignal::Changed);
                    }
                }
                Err(err) => {
                    tracing::debug!("watch error: {}", err);
                    let _ = tx.send(WatchSignal::Failed);
                }
            },
        );
        let mut debouncer = match result {
            Ok(debouncer) => debouncer,
            Err(err) => {
                tracing::debug!(profile = %self.config.name, "file watching unavailable: {}", err);
                return None;
            }
        };

        if let Err(err) = debouncer
            .watcher()
            .watch(&self.config.log_dir, RecursiveMode::Recursive)
        {
            tracing::debug!(
                profile = %self.config.name,
                "could not watch {:?}: {}", self.config.log_dir, err
            );
            return None;
        }

        // Best-effort: also watch the snapshot's directory for cache rewrites.
        if let Some(parent) = self.config.snapshot_path.parent() {
            if let Err(err) = debouncer.watcher().watch(parent, RecursiveMode::NonRecursive) {
                tracing::debug!("could not watch snapshot dir {:?}: {}", parent, err);
            }
        }

        Some(debouncer)
    }
}
