// Sampler - Periodic fetch, parse, commit and publish
use crate::application::parser;
use crate::application::reading_repository::ReadingRepository;
use crate::application::sample_source::SampleSource;
use crate::domain::reading::Reading;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Slow subscribers lag and skip readings past this many.
const NOTIFY_CAPACITY: usize = 64;

/// Owns the sampling cycle: sources are tried in order until one parses,
/// the reading is stored, then published to every subscriber.
pub struct Sampler {
    sources: Vec<Arc<dyn SampleSource>>,
    repository: Arc<dyn ReadingRepository>,
    notifier: broadcast::Sender<Reading>,
    interval: watch::Sender<Duration>,
    degraded: AtomicBool,
    sources_failing: AtomicBool,
    clear_on_start: bool,
}

/// Stops the background loop started by [`Sampler::spawn`].
pub struct SamplerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    /// Prevent further ticks and wait for the loop to exit. A fetch already
    /// running completes but its reading is thrown away.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Sampler task ended abnormally: {}", e);
        }
    }
}

impl Sampler {
    pub fn new(
        sources: Vec<Arc<dyn SampleSource>>,
        repository: Arc<dyn ReadingRepository>,
        interval: Duration,
        clear_on_start: bool,
    ) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (interval_tx, _) = watch::channel(clamp_interval(interval));

        Self {
            sources,
            repository,
            notifier,
            interval: interval_tx,
            degraded: AtomicBool::new(false),
            sources_failing: AtomicBool::new(false),
            clear_on_start,
        }
    }

    /// One notification per committed reading.
    pub fn subscribe(&self) -> broadcast::Receiver<Reading> {
        self.notifier.subscribe()
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Change the sampling period; a running loop picks it up immediately.
    /// Returns the period actually applied.
    pub fn set_interval(&self, requested: Duration) -> Duration {
        let applied = clamp_interval(requested);
        self.interval.send_replace(applied);
        applied
    }

    /// True when storage could not be opened or the last write failed.
    pub fn is_degraded(&self) -> bool {
        !self.repository.is_persistent() || self.degraded.load(Ordering::Relaxed)
    }

    /// Run one fetch-parse-commit cycle now, outside the schedule.
    pub async fn sample_once(&self) -> Option<Reading> {
        let reading = self.fetch_reading().await?;
        self.commit(reading).await
    }

    /// Start the periodic loop. The first sample is taken right away.
    pub fn spawn(self: &Arc<Self>) -> SamplerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let sampler = Arc::clone(self);
        let task = tokio::spawn(async move { sampler.run(stop_rx).await });

        SamplerHandle {
            stop: stop_tx,
            task,
        }
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        if self.clear_on_start {
            match self.repository.clear().await {
                Ok(()) => tracing::info!("Cleared stored readings on start"),
                Err(e) => tracing::warn!("Failed to clear readings on start: {}", e),
            }
        }

        match self.repository.evict().await {
            Ok(eviction) if eviction.total() > 0 => tracing::info!(
                "Pruned {} expired and {} excess readings on start",
                eviction.expired,
                eviction.over_capacity
            ),
            Ok(_) => {}
            Err(e) => tracing::warn!("Startup eviction failed: {}", e),
        }

        let mut interval_rx = self.interval.subscribe();
        let period = *interval_rx.borrow_and_update();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Sampler started: every {:?} from {} source(s)",
            period,
            self.sources.len()
        );

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                Ok(()) = interval_rx.changed() => {
                    let period = *interval_rx.borrow_and_update();
                    ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    tracing::info!("Sampling interval changed to {:?}", period);
                }
                _ = ticker.tick() => {
                    let reading = self.fetch_reading().await;
                    if *stop.borrow() {
                        tracing::debug!("Stopped during fetch; discarding sample");
                        break;
                    }
                    if let Some(reading) = reading {
                        self.commit(reading).await;
                    }
                }
            }
        }

        tracing::info!("Sampler stopped");
    }

    async fn fetch_reading(&self) -> Option<Reading> {
        for source in &self.sources {
            let raw = match source.fetch().await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!("Source `{}` failed: {:#}", source.describe(), e);
                    continue;
                }
            };

            match parser::parse(&raw) {
                Ok(reading) => {
                    if self.sources_failing.swap(false, Ordering::Relaxed) {
                        tracing::info!("Source `{}` is producing readings again", source.describe());
                    }
                    return Some(reading);
                }
                Err(e) => tracing::debug!("Source `{}` gave no reading: {}", source.describe(), e),
            }
        }

        if !self.sources_failing.swap(true, Ordering::Relaxed) {
            tracing::warn!("No source produced a valid reading; samples are skipped until one does");
        } else {
            tracing::debug!("No source produced a valid reading; sample skipped");
        }
        None
    }

    async fn commit(&self, reading: Reading) -> Option<Reading> {
        if let Err(e) = self.repository.append(&reading).await {
            // One warning per outage, not one per sample
            if !self.degraded.swap(true, Ordering::Relaxed) {
                tracing::warn!("Storage unavailable, samples are being dropped: {}", e);
            } else {
                tracing::debug!("Dropped sample: {}", e);
            }
            return None;
        }

        if self.degraded.swap(false, Ordering::Relaxed) {
            tracing::info!("Storage recovered");
        }

        tracing::debug!(
            "Committed reading: {:.2} W at {}%{}",
            reading.power_w,
            reading.percentage,
            if reading.is_charging { " (charging)" } else { "" }
        );

        // No subscribers is fine
        let _ = self.notifier.send(reading.clone());
        Some(reading)
    }
}

fn clamp_interval(requested: Duration) -> Duration {
    let applied = requested.clamp(MIN_INTERVAL, MAX_INTERVAL);
    if applied != requested {
        tracing::warn!(
            "Sampling interval {:?} outside {:?}..={:?}; using {:?}",
            requested,
            MIN_INTERVAL,
            MAX_INTERVAL,
            applied
        );
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reading_repository::UnavailableRepository;
    use crate::infrastructure::sqlite_repository::{RetentionPolicy, SqliteRepository};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    const CHARGING: &str =
        r#""Voltage" = 12000, "InstantAmperage" = 2000, "IsCharging" = Yes, "CurrentCapacity" = 55"#;

    /// Replays canned replies, then repeats the last one.
    struct ScriptedSource {
        replies: Mutex<VecDeque<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(replies: &[Option<&str>]) -> Arc<dyn SampleSource> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().copied().map(|r| r.map(str::to_string)).collect()),
            })
        }
    }

    #[async_trait]
    impl SampleSource for ScriptedSource {
        async fn fetch(&self) -> anyhow::Result<String> {
            let mut replies = self.replies.lock().unwrap();
            let reply = if replies.len() > 1 {
                replies.pop_front().flatten()
            } else {
                replies.front().cloned().flatten()
            };
            reply.ok_or_else(|| anyhow::anyhow!("source offline"))
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Holds every fetch until the test releases it.
    struct GatedSource {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl SampleSource for GatedSource {
        async fn fetch(&self) -> anyhow::Result<String> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(CHARGING.to_string())
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    fn memory_repo() -> Arc<SqliteRepository> {
        Arc::new(SqliteRepository::open_in_memory(RetentionPolicy::default()).unwrap())
    }

    #[tokio::test]
    async fn test_sample_once_commits_and_notifies() {
        let repo = memory_repo();
        let sampler = Sampler::new(
            vec![ScriptedSource::new(&[Some(CHARGING)])],
            repo.clone(),
            DEFAULT_INTERVAL,
            false,
        );
        let mut rx = sampler.subscribe();

        let reading = sampler.sample_once().await.unwrap();
        assert_eq!(reading.power_w, 24.0);
        assert_eq!(rx.recv().await.unwrap(), reading);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert!(!sampler.is_degraded());
    }

    #[tokio::test]
    async fn test_source_outage_is_tracked_until_a_reading_parses() {
        let sampler = Sampler::new(
            vec![ScriptedSource::new(&[None, None, Some(CHARGING)])],
            memory_repo(),
            DEFAULT_INTERVAL,
            false,
        );

        assert!(sampler.sample_once().await.is_none());
        assert!(sampler.sources_failing.load(Ordering::Relaxed));
        assert!(sampler.sample_once().await.is_none());
        assert!(sampler.sources_failing.load(Ordering::Relaxed));

        assert!(sampler.sample_once().await.is_some());
        assert!(!sampler.sources_failing.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_sources_tried_in_order() {
        let repo = memory_repo();
        let sampler = Sampler::new(
            vec![
                ScriptedSource::new(&[None]),
                ScriptedSource::new(&[Some("garbage without numbers")]),
                ScriptedSource::new(&[Some(CHARGING)]),
            ],
            repo.clone(),
            DEFAULT_INTERVAL,
            false,
        );

        assert_eq!(sampler.sample_once().await.unwrap().percentage, 55);
    }

    #[tokio::test]
    async fn test_rejected_sample_is_skipped() {
        let repo = memory_repo();
        let sampler = Sampler::new(
            vec![ScriptedSource::new(&[Some(r#""Voltage" = 0, "IsCharging" = No"#)])],
            repo.clone(),
            DEFAULT_INTERVAL,
            false,
        );
        let mut rx = sampler.subscribe();

        assert!(sampler.sample_once().await.is_none());
        assert_eq!(repo.count().await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_storage_failure_marks_degraded_without_notifying() {
        let sampler = Sampler::new(
            vec![ScriptedSource::new(&[Some(CHARGING)])],
            Arc::new(UnavailableRepository::new("read-only volume")),
            DEFAULT_INTERVAL,
            false,
        );
        let mut rx = sampler.subscribe();

        assert!(sampler.sample_once().await.is_none());
        assert!(sampler.sample_once().await.is_none());
        assert!(sampler.is_degraded());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_interval_is_clamped() {
        let sampler = Sampler::new(Vec::new(), memory_repo(), Duration::ZERO, false);
        assert_eq!(sampler.interval(), MIN_INTERVAL);

        assert_eq!(sampler.set_interval(Duration::from_secs(3600)), MAX_INTERVAL);
        assert_eq!(sampler.set_interval(Duration::from_secs(42)), Duration::from_secs(42));
        assert_eq!(sampler.interval(), Duration::from_secs(42));
    }

    #[tokio::test]
    async fn test_loop_samples_and_follows_interval_change() {
        let repo = memory_repo();
        let sampler = Arc::new(Sampler::new(
            vec![ScriptedSource::new(&[Some(CHARGING)])],
            repo.clone(),
            MAX_INTERVAL,
            false,
        ));
        let mut rx = sampler.subscribe();
        let handle = sampler.spawn();

        // First tick fires immediately
        let wait = Duration::from_secs(5);
        tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap();

        // Without the change the next tick would be five minutes away
        sampler.set_interval(MIN_INTERVAL);
        tokio::time::timeout(wait, rx.recv()).await.unwrap().unwrap();

        handle.stop().await;
        assert!(repo.count().await.unwrap() >= 2);
    }

    #[tokio::test]
    async fn test_clear_on_start_wipes_store() {
        let repo = memory_repo();
        repo.append(&Reading::idle(chrono::Utc::now(), 12_000.0, 10))
            .await
            .unwrap();

        let sampler = Arc::new(Sampler::new(
            vec![ScriptedSource::new(&[Some(CHARGING)])],
            repo.clone(),
            MAX_INTERVAL,
            true,
        ));
        let mut rx = sampler.subscribe();
        let handle = sampler.spawn();
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        handle.stop().await;

        let stored = repo.query_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_charging);
    }

    #[tokio::test]
    async fn test_stop_discards_in_flight_fetch() {
        let repo = memory_repo();
        let source = Arc::new(GatedSource {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let sampler = Arc::new(Sampler::new(
            vec![source.clone() as Arc<dyn SampleSource>],
            repo.clone(),
            MIN_INTERVAL,
            false,
        ));
        let handle = sampler.spawn();

        source.entered.notified().await;
        let stopping = tokio::spawn(handle.stop());
        // Let the stop flag land before the fetch returns
        tokio::time::sleep(Duration::from_millis(20)).await;
        source.release.notify_one();
        stopping.await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
