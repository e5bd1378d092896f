use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::lifecycle::Lifecycle;

pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub promoted: usize,
    pub purged: usize,
}

/// Background driver for time-based message transitions: promotes due
/// scheduled messages to visible and purges expired self-destruct messages.
/// Each tick is idempotent — the store's check-and-set guards make a repeat
/// sweep over the same instant a no-op.
pub struct Sweeper {
    lifecycle: Arc<Lifecycle>,
    period: Duration,
}

impl Sweeper {
    pub fn new(lifecycle: Arc<Lifecycle>, period: Duration) -> Self {
        Self { lifecycle, period }
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.period);
        loop {
            tick.tick().await;
            match self.sweep_once(Utc::now()).await {
                Ok(stats) if stats.promoted > 0 || stats.purged > 0 => {
                    debug!(
                        "Sweep promoted {} scheduled, purged {} self-destructed",
                        stats.promoted, stats.purged
                    );
                }
                Ok(_) => {}
                Err(e) => warn!("Sweep failed: {}", e),
            }
        }
    }

    /// One pass of both sweeps against an explicit `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> CoreResult<SweepStats> {
        let promoted = self.lifecycle.promote_scheduled(now).await?;
        let purged = self.lifecycle.purge_self_destructed(now).await?;
        Ok(SweepStats { promoted, purged })
    }
}
