use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::forward::stats::StatsSnapshot;
use crate::forward::{DedupCache, ForwardStats};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub evicted: usize,
    pub remaining: usize,
    pub stats: StatsSnapshot,
}

/// Evicts expired dedup entries and reports the forwarding counters
pub struct Reaper {
    dedup: Arc<Mutex<DedupCache>>,
    stats: Arc<ForwardStats>,
    window: Duration,
}

impl Reaper {
    pub fn new(dedup: Arc<Mutex<DedupCache>>, stats: Arc<ForwardStats>, window: Duration) -> Self {
        Self {
            dedup,
            stats,
            window,
        }
    }

    pub async fn run_once(&self) -> ReapReport {
        let (evicted, remaining) = {
            let mut cache = self.dedup.lock().await;
            if cache.is_empty() {
                (0, 0)
            } else {
                let evicted = cache.evict_expired(Instant::now(), self.window);
                (evicted, cache.len())
            }
        };
        let stats = self.stats.snapshot();

        info!(
            "Forward stats: {} (dedup cache: {} evicted, {} kept)",
            stats, evicted, remaining
        );
        ReapReport {
            evicted,
            remaining,
            stats,
        }
    }

    /// Run the reaper on `scheduler` every `interval`
    pub async fn register(
        self: Arc<Self>,
        scheduler: &mut Scheduler,
        interval: Duration,
    ) -> Result<Uuid> {
        scheduler
            .add_repeated_job(interval, "dedup-reaper", move || {
                let reaper = self.clone();
                async move {
                    reaper.run_once().await;
                }
                .boxed()
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::dedup::DedupKey;

    #[tokio::test(start_paused = true)]
    async fn test_run_once_evicts_only_expired_entries() {
        let dedup = Arc::new(Mutex::new(DedupCache::new()));
        let stats = Arc::new(ForwardStats::new());
        let window = Duration::from_secs(60);
        {
            let mut cache = dedup.lock().await;
            cache.check_and_record(DedupKey::new(1, 1, None), Instant::now(), window);
        }
        tokio::time::advance(Duration::from_secs(90)).await;
        {
            let mut cache = dedup.lock().await;
            cache.check_and_record(DedupKey::new(2, 1, None), Instant::now(), window);
        }
        stats.record_received();
        stats.record_forwarded();

        let reaper = Reaper::new(dedup.clone(), stats, window);
        let report = reaper.run_once().await;

        assert_eq!(report.evicted, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(report.stats.received, 1);
        assert_eq!(report.stats.forwarded, 1);
        assert_eq!(dedup.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_once_on_empty_cache() {
        let reaper = Reaper::new(
            Arc::new(Mutex::new(DedupCache::new())),
            Arc::new(ForwardStats::new()),
            Duration::from_secs(60),
        );
        let report = reaper.run_once().await;
        assert_eq!(report.evicted, 0);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.stats, StatsSnapshot::default());
    }
}
