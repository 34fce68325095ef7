//! UsageBar core - usage estimator for Claude Code quota tracking
//!
//! The aggregation engine behind a menu bar usage gauge: tails conversation
//! logs, reads the periodic usage snapshot, asks the OAuth usage endpoint
//! best-effort, and reconciles all three into one `UsageSummary` per profile.

pub mod config;
pub mod orchestrator;
pub mod plan;
pub mod quota;
pub mod reconcile;
pub mod scanner;
pub mod snapshot;
pub mod summary;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("usagebar=debug".parse().unwrap()),
        )
        .init();
}
