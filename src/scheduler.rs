//! Periodic jobs driving ingestion, cleanup, stats and like boosts.
//!
//! Every job is a tokio task ticking on an interval. Each tick runs in its own
//! spawned task, so an error or a panic in one cycle is logged and the job
//! keeps its schedule.

use crate::config::SchedulerConfig;
use crate::engagement::{self, LikeBoostPolicy};
use crate::error::Result;
use crate::ingest::manager::{CleanupOptions, ScrapeMode, ScraperManager};
use crate::types::{Community, CommunityId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

/// Opaque identity of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobHandle(u64);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum JobKind {
    Ingest,
    Cleanup,
    Stats,
    LikeBoost,
    Community { id: CommunityId, slug: String },
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ingest => write!(f, "ingest"),
            Self::Cleanup => write!(f, "cleanup"),
            Self::Stats => write!(f, "stats"),
            Self::LikeBoost => write!(f, "like-boost"),
            Self::Community { slug, .. } => write!(f, "community:{slug}"),
        }
    }
}

/// Intervals of the fixed jobs. `like_boost` is `None` when disabled.
#[derive(Debug, Clone)]
pub struct Periods {
    pub ingest: Duration,
    pub cleanup: Duration,
    pub stats: Duration,
    pub like_boost: Option<Duration>,
    pub per_community_jobs: bool,
}

impl Periods {
    pub fn from_config(cfg: &SchedulerConfig, boost: &LikeBoostPolicy) -> Self {
        Self {
            ingest: Duration::from_secs(cfg.ingest_interval_secs),
            cleanup: Duration::from_secs(cfg.cleanup_interval_secs),
            stats: Duration::from_secs(cfg.stats_interval_secs),
            like_boost: boost
                .enabled
                .then(|| Duration::from_secs(boost.interval_secs.max(1))),
            per_community_jobs: cfg.per_community_jobs,
        }
    }
}

#[derive(Default)]
struct JobState {
    running: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
}

struct Job {
    kind: JobKind,
    period: Duration,
    state: Arc<JobState>,
    task: JoinHandle<()>,
}

/// Aborts the in-flight cycle when the timer task is cancelled while awaiting it.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub handle: JobHandle,
    pub kind: JobKind,
    pub period_secs: f64,
    /// A tick is executing right now.
    pub running: bool,
    /// The job's timer task is alive.
    pub scheduled: bool,
    pub runs: u64,
    pub failures: u64,
}

pub struct Scheduler {
    manager: Arc<ScraperManager>,
    periods: Periods,
    cleanup: CleanupOptions,
    jobs: Mutex<BTreeMap<JobHandle, Job>>,
    next_id: AtomicU64,
    initialized: AtomicBool,
}

impl Scheduler {
    pub fn new(manager: Arc<ScraperManager>, periods: Periods, cleanup: CleanupOptions) -> Self {
        Self {
            manager,
            periods,
            cleanup,
            jobs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, BTreeMap<JobHandle, Job>> {
        // Nothing panics while holding this lock.
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the fixed jobs, plus one job per community when configured.
    /// A second call logs and does nothing.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            info!("scheduler already initialized");
            return Ok(());
        }

        let manager = self.manager.clone();
        self.spawn_job(JobKind::Ingest, self.periods.ingest, move || {
            let manager = manager.clone();
            async move {
                let summary = manager.scrape_all_communities(ScrapeMode::Single).await?;
                info!(
                    communities = summary.total_communities,
                    posts_created = summary.total_posts_created,
                    failed = summary.failed_scrapes,
                    "scheduled ingestion complete"
                );
                Ok(())
            }
        });

        let manager = self.manager.clone();
        let opts = self.cleanup.clone();
        self.spawn_job(JobKind::Cleanup, self.periods.cleanup, move || {
            let manager = manager.clone();
            let opts = opts.clone();
            async move {
                let result = manager.cleanup_posts(&opts).await?;
                info!(cleaned = result.total_cleaned, "scheduled cleanup complete");
                Ok(())
            }
        });

        let manager = self.manager.clone();
        self.spawn_job(JobKind::Stats, self.periods.stats, move || {
            let manager = manager.clone();
            async move {
                let stats = manager.ingestion_stats().await?;
                for p in &stats.last_24_hours {
                    info!(
                        platform = %p.platform,
                        posts = p.count,
                        avg_quality = p.avg_quality_score,
                        engagement = p.total_engagement,
                        "ingestion stats"
                    );
                }
                info!(total = stats.total_scraped_posts, "scraped posts in store");
                Ok(())
            }
        });

        if let Some(period) = self.periods.like_boost {
            let manager = self.manager.clone();
            self.spawn_job(JobKind::LikeBoost, period, move || {
                let manager = manager.clone();
                async move {
                    let synthetic = manager.synthetic();
                    engagement::boost_recent_likes(
                        manager.store().as_ref(),
                        &synthetic.like_boost,
                        &synthetic.initial_likes,
                    )
                    .await?;
                    Ok(())
                }
            });
        }

        if self.periods.per_community_jobs {
            for community in self.manager.store().communities(true).await? {
                self.schedule_community(&community);
            }
        }

        info!(jobs = self.jobs().len(), "scheduler initialized");
        Ok(())
    }

    /// Bulk-scrape `community` at its configured frequency. Replaces any job
    /// already scheduled for the same community.
    pub fn schedule_community(&self, community: &Community) -> JobHandle {
        let existing: Vec<JobHandle> = self
            .jobs()
            .iter()
            .filter(|(_, job)| matches!(&job.kind, JobKind::Community { id, .. } if *id == community.id))
            .map(|(handle, _)| *handle)
            .collect();
        for handle in existing {
            self.remove(handle);
        }

        let manager = self.manager.clone();
        let id = community.id;
        let kind = JobKind::Community {
            id,
            slug: community.slug.clone(),
        };
        self.spawn_job(kind, community.settings.frequency.period(), move || {
            let manager = manager.clone();
            async move {
                manager.scrape_community(id).await?;
                Ok(())
            }
        })
    }

    fn spawn_job<F, Fut>(&self, kind: JobKind, period: Duration, run: F) -> JobHandle
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = JobHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        let state = Arc::new(JobState::default());
        let period = period.max(Duration::from_millis(1));

        let task = tokio::spawn({
            let state = state.clone();
            let kind = kind.clone();
            async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    state.running.store(true, Ordering::SeqCst);
                    let cycle = tokio::spawn(run());
                    let _guard = AbortOnDrop(cycle.abort_handle());
                    match cycle.await {
                        Ok(Ok(())) => {
                            state.runs.fetch_add(1, Ordering::SeqCst);
                        }
                        Ok(Err(e)) => {
                            state.failures.fetch_add(1, Ordering::SeqCst);
                            error!(job = %kind, error = %e, "scheduled job failed");
                        }
                        Err(e) => {
                            state.failures.fetch_add(1, Ordering::SeqCst);
                            error!(job = %kind, error = %e, "scheduled job panicked");
                        }
                    }
                    state.running.store(false, Ordering::SeqCst);
                }
            }
        });

        info!(%handle, job = %kind, period_secs = period.as_secs_f64(), "job scheduled");
        self.jobs().insert(
            handle,
            Job {
                kind,
                period,
                state,
                task,
            },
        );
        handle
    }

    /// Stop and forget one job. Returns false for an unknown handle.
    pub fn remove(&self, handle: JobHandle) -> bool {
        match self.jobs().remove(&handle) {
            Some(job) => {
                job.task.abort();
                info!(%handle, job = %job.kind, "job removed");
                true
            }
            None => false,
        }
    }

    pub fn active_jobs(&self) -> Vec<JobInfo> {
        self.jobs()
            .iter()
            .map(|(handle, job)| JobInfo {
                handle: *handle,
                kind: job.kind.clone(),
                period_secs: job.period.as_secs_f64(),
                running: job.state.running.load(Ordering::SeqCst),
                scheduled: !job.task.is_finished(),
                runs: job.state.runs.load(Ordering::SeqCst),
                failures: job.state.failures.load(Ordering::SeqCst),
            })
            .collect()
    }

    /// Abort every job and clear the registry.
    pub fn stop_all(&self) {
        let jobs = std::mem::take(&mut *self.jobs());
        for job in jobs.values() {
            job.task.abort();
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!(stopped = jobs.len(), "all jobs stopped");
    }

    pub async fn restart_all(&self) -> Result<()> {
        info!("restarting all jobs");
        self.stop_all();
        self.initialize().await
    }

    /// Stop all jobs and wait for their tasks to wind down.
    pub async fn shutdown(&self) {
        let jobs = std::mem::take(&mut *self.jobs());
        for job in jobs.values() {
            job.task.abort();
        }
        for (handle, job) in jobs {
            if let Err(e) = job.task.await
                && !e.is_cancelled()
            {
                warn!(%handle, error = %e, "job ended abnormally");
            }
        }
        self.initialized.store(false, Ordering::SeqCst);
        info!("scheduler shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::ingest::processor::{ContentProcessor, QualityRules};
    use crate::ingest::validator::tests::item;
    use crate::ingest::validator::{ContentValidator, ValidationRules};
    use crate::sources::tests::FakeSource;
    use crate::sources::{ContentSource, SourceRegistry};
    use crate::store::{MemoryStore, Store};
    use crate::types::{Category, Platform, PlatformSource};

    const HOUR: Duration = Duration::from_secs(3600);

    fn periods(ingest: Duration) -> Periods {
        Periods {
            ingest,
            cleanup: HOUR,
            stats: HOUR,
            like_boost: None,
            per_community_jobs: false,
        }
    }

    async fn setup(source: Arc<dyn ContentSource>) -> (Arc<MemoryStore>, Arc<ScraperManager>, Community) {
        let store = Arc::new(MemoryStore::new());
        store.ensure_platform_user("curator").await.unwrap();
        let mut community = Community::new("Startups", "Founders", Category::Startups);
        community.platforms.push(PlatformSource {
            platform: source.platform(),
            source_url: "https://www.reddit.com/r/startups/".into(),
            keywords: Vec::new(),
            active: true,
        });
        let community = store.insert_community(community).await.unwrap();

        let mut registry = SourceRegistry::new();
        registry.register(source).unwrap();
        let manager = ScraperManager::new(
            store.clone(),
            registry,
            ContentValidator::new(ValidationRules::default()).unwrap(),
            ContentProcessor::new(QualityRules::default()),
            IngestConfig::default(),
        );
        (store, Arc::new(manager), community)
    }

    fn items(n: usize) -> Vec<crate::types::ScrapedItem> {
        (0..n)
            .map(|i| {
                let mut it = item(
                    &format!("Scheduled lesson {i}"),
                    "We spent six months talking to customers before writing code, and it changed our roadmap.",
                );
                it.id = format!("s{i}");
                it.url = format!("https://www.reddit.com/r/startups/comments/s{i}/");
                it
            })
            .collect()
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let (_, manager, _) = setup(Arc::new(FakeSource::new(Platform::Reddit, Vec::new()))).await;
        let scheduler = Scheduler::new(manager, periods(HOUR), CleanupOptions::default());
        scheduler.initialize().await.unwrap();
        scheduler.initialize().await.unwrap();

        let kinds: Vec<JobKind> = scheduler.active_jobs().into_iter().map(|j| j.kind).collect();
        assert_eq!(kinds, vec![JobKind::Ingest, JobKind::Cleanup, JobKind::Stats]);
        scheduler.shutdown().await;
        assert!(scheduler.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn ingest_job_runs_single_post_variant() {
        let (store, manager, community) =
            setup(Arc::new(FakeSource::new(Platform::Reddit, items(3)))).await;
        let scheduler = Scheduler::new(manager, periods(Duration::from_millis(20)), CleanupOptions::default());
        scheduler.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.shutdown().await;

        // Every tick reads only the first listing item; later ticks hit the duplicate.
        let posts = store.posts_for_community(community.id).await.unwrap();
        assert_eq!(posts.len(), 1);
        let stored = store.community(community.id).await.unwrap().unwrap();
        assert!(stored.last_scraped_at.is_some());
    }

    #[tokio::test]
    async fn failing_cycles_are_contained() {
        let (_, manager, _) = setup(Arc::new(FakeSource::new(Platform::Reddit, Vec::new()))).await;
        let scheduler = Scheduler::new(manager, periods(HOUR), CleanupOptions::default());

        let handle = scheduler.spawn_job(JobKind::Stats, Duration::from_millis(10), || async {
            Err(crate::error::Error::api("test", "boom"))
        });
        let panicky = scheduler.spawn_job(JobKind::Cleanup, Duration::from_millis(10), || async {
            let healthy = false;
            assert!(healthy, "cycle panicked");
            Ok(())
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let jobs = scheduler.active_jobs();
        for job in &jobs {
            assert!(job.scheduled, "{} should still be scheduled", job.handle);
            assert!(job.failures >= 2);
            assert_eq!(job.runs, 0);
        }
        assert!(scheduler.remove(handle));
        assert!(scheduler.remove(panicky));
        assert!(!scheduler.remove(handle));
    }

    #[tokio::test]
    async fn shutdown_cancels_the_running_cycle() {
        let (_, manager, _) = setup(Arc::new(FakeSource::new(Platform::Reddit, Vec::new()))).await;
        let scheduler = Scheduler::new(manager, periods(HOUR), CleanupOptions::default());
        let finished = Arc::new(AtomicU64::new(0));

        let counter = finished.clone();
        scheduler.spawn_job(JobKind::Stats, Duration::from_millis(10), move || {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(scheduler.active_jobs()[0].running);
        scheduler.shutdown().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn community_jobs_replace_and_restart() {
        let (_, manager, community) =
            setup(Arc::new(FakeSource::new(Platform::Reddit, Vec::new()))).await;
        let mut p = periods(HOUR);
        p.per_community_jobs = true;
        let scheduler = Scheduler::new(manager, p, CleanupOptions::default());
        scheduler.initialize().await.unwrap();
        assert_eq!(scheduler.active_jobs().len(), 4);

        let first = scheduler
            .active_jobs()
            .into_iter()
            .find(|j| matches!(j.kind, JobKind::Community { .. }))
            .unwrap();
        assert_eq!(first.period_secs, 24.0 * 3600.0);

        let replacement = scheduler.schedule_community(&community);
        assert_ne!(replacement, first.handle);
        let community_jobs = scheduler
            .active_jobs()
            .into_iter()
            .filter(|j| matches!(j.kind, JobKind::Community { .. }))
            .count();
        assert_eq!(community_jobs, 1);

        scheduler.restart_all().await.unwrap();
        let handles: Vec<JobHandle> = scheduler.active_jobs().iter().map(|j| j.handle).collect();
        assert_eq!(handles.len(), 4);
        assert!(!handles.contains(&replacement));

        scheduler.stop_all();
        assert!(scheduler.active_jobs().is_empty());
    }
}
