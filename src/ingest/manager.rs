//! Ingestion orchestration: community -> sources -> validate + score ->
//! dedup -> persist, with per-platform failure isolation.

use super::processor::{ContentProcessor, ProcessedContent};
use super::validator::{ContentValidator, Validation};
use crate::config::{CommunitySeed, IngestConfig};
use crate::engagement::{self, CommentSynthesizer, SyntheticConfig};
use crate::error::{Error, Result};
use crate::sources::{ContentSource, FetchRequest, SourceRegistry};
use crate::store::Store;
use crate::types::{
    Community, CommunityId, EngagementMetrics, LocalEngagement, Platform, PlatformSource, Post,
    PostId, PostStatus, ScrapedItem, ScrapingMetadata, User, UserId,
};
use chrono::{Duration, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Raw items read per wanted item when a keyword filter thins the listing.
const KEYWORD_OVERSAMPLE: usize = 3;
/// Candidates fetched per accepted post in authentic mode.
const AUTHENTIC_CANDIDATES: usize = 3;
const STATS_WINDOW_HOURS: i64 = 24;

/// How many items each platform of a community contributes per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeMode {
    /// Up to the community's `max_posts_per_scrape`.
    Bulk,
    /// Up to `ingest.single_post_limit`, the scheduler's light variant.
    Single,
    /// Fetch extra candidates and keep the first `per_platform` that pass.
    Authentic { per_platform: usize },
}

impl ScrapeMode {
    fn validation_method(&self) -> &'static str {
        match self {
            Self::Authentic { .. } => "enhanced_validation",
            Self::Bulk | Self::Single => "real_api_scraping",
        }
    }
}

impl std::fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bulk => write!(f, "bulk"),
            Self::Single => write!(f, "single"),
            Self::Authentic { per_platform } => write!(f, "authentic({per_platform})"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupOptions {
    pub older_than_days: u32,
    pub min_quality_score: f64,
    pub max_posts_per_community: usize,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            older_than_days: 30,
            min_quality_score: 0.3,
            max_posts_per_community: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformResult {
    pub platform: Platform,
    pub fetched: usize,
    pub posts_created: u64,
    pub rejected: usize,
    pub low_quality: usize,
    pub near_duplicates: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub error: Option<String>,
}

impl PlatformResult {
    fn new(platform: Platform) -> Self {
        Self {
            platform,
            fetched: 0,
            posts_created: 0,
            rejected: 0,
            low_quality: 0,
            near_duplicates: 0,
            duplicates: 0,
            failed: 0,
            error: None,
        }
    }

    fn skipped(&mut self, reason: Skip) {
        match reason {
            Skip::Invalid => self.rejected += 1,
            Skip::LowQuality => self.low_quality += 1,
            Skip::NearDuplicate => self.near_duplicates += 1,
            Skip::Duplicate => self.duplicates += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityScrapeResult {
    pub community_id: CommunityId,
    pub community: String,
    pub mode: String,
    pub posts_created: u64,
    pub platform_results: Vec<PlatformResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityError {
    pub community: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeSummary {
    pub total_communities: usize,
    pub successful_scrapes: usize,
    pub failed_scrapes: usize,
    pub total_posts_created: u64,
    pub errors: Vec<CommunityError>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupResult {
    pub hidden_low_quality: u64,
    pub hidden_excess: u64,
    pub total_cleaned: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlatformStats {
    pub platform: Platform,
    pub count: usize,
    pub avg_quality_score: f64,
    pub total_engagement: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionStats {
    pub window_hours: i64,
    pub last_24_hours: Vec<PlatformStats>,
    pub total_scraped_posts: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedSummary {
    pub communities: usize,
    pub platform_users: usize,
}

#[derive(Debug, Clone, Copy)]
enum Skip {
    Invalid,
    LowQuality,
    NearDuplicate,
    Duplicate,
}

enum Outcome {
    Created(Box<Post>),
    Skipped(Skip),
}

/// Validator verdict and processor score, computed together for each item.
struct Assessment {
    validation: Validation,
    quality: f64,
}

pub struct ScraperManager {
    store: Arc<dyn Store>,
    sources: SourceRegistry,
    validator: ContentValidator,
    processor: ContentProcessor,
    ingest: IngestConfig,
    synthetic: SyntheticConfig,
    comments: Option<CommentSynthesizer>,
}

impl ScraperManager {
    pub fn new(
        store: Arc<dyn Store>,
        sources: SourceRegistry,
        validator: ContentValidator,
        processor: ContentProcessor,
        ingest: IngestConfig,
    ) -> Self {
        Self {
            store,
            sources,
            validator,
            processor,
            ingest,
            synthetic: SyntheticConfig::default(),
            comments: None,
        }
    }

    pub fn with_engagement(
        mut self,
        synthetic: SyntheticConfig,
        comments: Option<CommentSynthesizer>,
    ) -> Self {
        self.synthetic = synthetic;
        self.comments = comments;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn synthetic(&self) -> &SyntheticConfig {
        &self.synthetic
    }

    /// Upsert communities by slug and make sure every platform user exists.
    pub async fn seed(&self, communities: &[CommunitySeed], platform_users: &[String]) -> Result<SeedSummary> {
        for seed in communities {
            let community = self.store.upsert_community(seed.to_community()).await?;
            debug!(community = %community.slug, "community seeded");
        }
        for username in platform_users {
            self.store.ensure_platform_user(username).await?;
        }
        let summary = SeedSummary {
            communities: communities.len(),
            platform_users: platform_users.len(),
        };
        info!(communities = summary.communities, users = summary.platform_users, "seed complete");
        Ok(summary)
    }

    /// Bulk ingestion for one community.
    pub async fn scrape_community(&self, id: CommunityId) -> Result<CommunityScrapeResult> {
        self.scrape_community_with(id, ScrapeMode::Bulk).await
    }

    pub async fn scrape_community_with(
        &self,
        id: CommunityId,
        mode: ScrapeMode,
    ) -> Result<CommunityScrapeResult> {
        let community = self
            .store
            .community(id)
            .await?
            .ok_or_else(|| Error::CommunityNotFound(id.to_string()))?;
        let owners = self.store.platform_users().await?;
        if owners.is_empty() {
            return Err(Error::NoPlatformUsers);
        }
        info!(community = %community.slug, %mode, "scraping community");

        let mut result = CommunityScrapeResult {
            community_id: community.id,
            community: community.slug.clone(),
            mode: mode.to_string(),
            posts_created: 0,
            platform_results: Vec::new(),
        };

        for source_cfg in community.platforms.iter().filter(|p| p.active) {
            let platform = source_cfg.platform;
            let source = match self.sources.get(platform) {
                Ok(source) => source,
                Err(e) => {
                    warn!(community = %community.slug, %platform, error = %e, "skipping platform");
                    let mut pr = PlatformResult::new(platform);
                    pr.error = Some(e.to_string());
                    result.platform_results.push(pr);
                    continue;
                }
            };
            let outcome = self
                .ingest_platform(&community, source_cfg, source.as_ref(), &owners, mode)
                .await;
            match outcome {
                Ok(pr) => {
                    info!(
                        community = %community.slug,
                        %platform,
                        fetched = pr.fetched,
                        posts_created = pr.posts_created,
                        rejected = pr.rejected,
                        low_quality = pr.low_quality,
                        duplicates = pr.duplicates + pr.near_duplicates,
                        "platform ingested"
                    );
                    result.posts_created += pr.posts_created;
                    result.platform_results.push(pr);
                }
                Err(e) => {
                    let failure = Error::ScrapeFailure {
                        platform,
                        message: e.to_string(),
                    };
                    warn!(community = %community.slug, error = %failure, "platform scrape failed");
                    let mut pr = PlatformResult::new(platform);
                    pr.error = Some(failure.to_string());
                    result.platform_results.push(pr);
                }
            }
        }

        self.store
            .record_scrape(community.id, Utc::now(), result.posts_created)
            .await?;
        info!(community = %community.slug, posts_created = result.posts_created, "community scraped");
        Ok(result)
    }

    /// Same as [`Self::scrape_community_with`] over every active community
    /// that has at least one active platform. Community failures are
    /// collected, never propagated.
    pub async fn scrape_all_communities(&self, mode: ScrapeMode) -> Result<ScrapeSummary> {
        let communities = self.store.communities(true).await?;
        let mut summary = ScrapeSummary {
            total_communities: communities.len(),
            ..ScrapeSummary::default()
        };
        info!(communities = communities.len(), %mode, "scraping all communities");

        for community in &communities {
            match self.scrape_community_with(community.id, mode).await {
                Ok(r) => {
                    summary.successful_scrapes += 1;
                    summary.total_posts_created += r.posts_created;
                }
                Err(e) => {
                    warn!(community = %community.slug, error = %e, "community scrape failed");
                    summary.failed_scrapes += 1;
                    summary.errors.push(CommunityError {
                        community: community.name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            successful = summary.successful_scrapes,
            failed = summary.failed_scrapes,
            posts_created = summary.total_posts_created,
            "scrape run complete"
        );
        Ok(summary)
    }

    async fn ingest_platform(
        &self,
        community: &Community,
        source_cfg: &PlatformSource,
        source: &dyn ContentSource,
        owners: &[User],
        mode: ScrapeMode,
    ) -> Result<PlatformResult> {
        let (max_items, accept_limit) = match mode {
            ScrapeMode::Bulk => (community.settings.max_posts_per_scrape, None),
            ScrapeMode::Single => (self.ingest.single_post_limit, None),
            ScrapeMode::Authentic { per_platform } => (
                per_platform.saturating_mul(AUTHENTIC_CANDIDATES),
                Some(per_platform),
            ),
        };
        let mut request = FetchRequest::new(&source_cfg.source_url, &source_cfg.keywords, max_items);
        if !request.keywords.is_empty() {
            request = request.oversample(KEYWORD_OVERSAMPLE);
        }

        let items = source.fetch(&request).await?;
        let mut pr = PlatformResult::new(source_cfg.platform);
        pr.fetched = items.len();
        let mut accepted: Vec<ScrapedItem> = Vec::new();

        for item in items {
            if accept_limit.is_some_and(|limit| pr.posts_created as usize >= limit) {
                break;
            }
            match self.ingest_item(community, &item, owners, mode, &accepted).await {
                Ok(Outcome::Created(post)) => {
                    pr.posts_created += 1;
                    accepted.push(item);
                    self.engage(&post).await;
                }
                Ok(Outcome::Skipped(reason)) => {
                    debug!(item = %item.id, ?reason, "item skipped");
                    pr.skipped(reason);
                }
                Err(e) => {
                    warn!(item = %item.id, error = %e, "failed to persist item");
                    pr.failed += 1;
                }
            }
        }
        Ok(pr)
    }

    fn assess(&self, item: &ScrapedItem) -> Assessment {
        Assessment {
            validation: self.validator.validate(item),
            quality: self.processor.quality_score(item),
        }
    }

    async fn ingest_item(
        &self,
        community: &Community,
        item: &ScrapedItem,
        owners: &[User],
        mode: ScrapeMode,
        accepted: &[ScrapedItem],
    ) -> Result<Outcome> {
        let assessment = self.assess(item);
        if !assessment.validation.valid {
            debug!(item = %item.id, reason = %assessment.validation.reason, "item failed validation");
            return Ok(Outcome::Skipped(Skip::Invalid));
        }
        if assessment.quality < community.settings.quality_threshold {
            return Ok(Outcome::Skipped(Skip::LowQuality));
        }
        if ContentProcessor::is_near_duplicate(item, accepted, self.ingest.near_duplicate_similarity) {
            return Ok(Outcome::Skipped(Skip::NearDuplicate));
        }
        // Advisory only: the store's unique constraints decide below.
        if self
            .store
            .find_duplicate(&item.url, item.platform, &item.id)
            .await?
            .is_some()
        {
            return Ok(Outcome::Skipped(Skip::Duplicate));
        }

        let processed = self.processor.process(item);
        let post = build_post(community.id, pick_owner(owners)?, item, processed, &assessment, mode);
        match self.store.insert_post(post).await {
            Ok(post) => Ok(Outcome::Created(Box::new(post))),
            Err(Error::Duplicate(what)) => {
                debug!(%what, "lost insert race, skipping");
                Ok(Outcome::Skipped(Skip::Duplicate))
            }
            Err(e) => Err(e),
        }
    }

    /// Synthetic likes and comments on a new post. Failures are logged only.
    async fn engage(&self, post: &Post) {
        if self.synthetic.initial_likes.enabled
            && let Err(e) =
                engagement::assign_initial_likes(self.store.as_ref(), post, &self.synthetic.initial_likes).await
        {
            warn!(post = %post.id, error = %e, "initial likes failed");
        }
        if self.synthetic.comments.enabled
            && let Some(synth) = &self.comments
            && let Err(e) = synth.comment_on(post).await
        {
            warn!(post = %post.id, error = %e, "comment synthesis failed");
        }
    }

    /// Hide stale low-quality posts, then cap each community at its newest
    /// `max_posts_per_community` active posts. Status changes only.
    pub async fn cleanup_posts(&self, opts: &CleanupOptions) -> Result<CleanupResult> {
        let cutoff = Utc::now() - Duration::days(i64::from(opts.older_than_days));
        let hidden_low_quality = self
            .store
            .hide_stale_posts(cutoff, opts.min_quality_score)
            .await?;
        info!(hidden = hidden_low_quality, "hid old low-quality posts");

        let mut hidden_excess = 0;
        for community in self.store.communities(false).await? {
            let excess: Vec<PostId> = self
                .store
                .posts_for_community(community.id)
                .await?
                .into_iter()
                .filter(|p| p.status == PostStatus::Active)
                .skip(opts.max_posts_per_community)
                .map(|p| p.id)
                .collect();
            if excess.is_empty() {
                continue;
            }
            let hidden = self.store.set_status(&excess, PostStatus::Hidden).await?;
            info!(community = %community.slug, hidden, "hid excess posts");
            hidden_excess += hidden;
        }

        Ok(CleanupResult {
            hidden_low_quality,
            hidden_excess,
            total_cleaned: hidden_low_quality + hidden_excess,
        })
    }

    /// Per-platform figures for posts scraped in the last 24 hours.
    pub async fn ingestion_stats(&self) -> Result<IngestionStats> {
        let since = Utc::now() - Duration::hours(STATS_WINDOW_HOURS);
        let posts = self.store.posts_scraped_since(since).await?;

        let mut groups: BTreeMap<&'static str, (Platform, Vec<&Post>)> = BTreeMap::new();
        for post in &posts {
            groups
                .entry(post.platform.as_str())
                .or_insert_with(|| (post.platform, Vec::new()))
                .1
                .push(post);
        }
        let last_24_hours = groups
            .into_values()
            .map(|(platform, posts)| PlatformStats {
                platform,
                count: posts.len(),
                avg_quality_score: posts.iter().map(|p| p.metadata.quality_score).sum::<f64>()
                    / posts.len() as f64,
                total_engagement: posts.iter().map(|p| p.engagement.total()).sum(),
            })
            .collect();

        Ok(IngestionStats {
            window_hours: STATS_WINDOW_HOURS,
            last_24_hours,
            total_scraped_posts: self.store.count_scraped_posts().await?,
        })
    }
}

fn pick_owner(owners: &[User]) -> Result<UserId> {
    owners
        .choose(&mut rand::rng())
        .map(|u| u.id)
        .ok_or(Error::NoPlatformUsers)
}

fn build_post(
    community_id: CommunityId,
    owner_id: UserId,
    item: &ScrapedItem,
    processed: ProcessedContent,
    assessment: &Assessment,
    mode: ScrapeMode,
) -> Post {
    let now = Utc::now();
    Post {
        id: Uuid::new_v4(),
        title: processed.title,
        content: processed.content,
        source_url: item.url.clone(),
        platform: item.platform,
        original_id: item.id.clone(),
        community_id,
        owner_id,
        engagement: EngagementMetrics {
            likes: item.likes,
            comments: item.comments,
            shares: item.shares,
            views: item.views,
        },
        metadata: ScrapingMetadata {
            scraped_at: now,
            original_author: item.author.clone(),
            original_created_at: item.created_at,
            quality_score: assessment.quality,
            authenticity_score: Some(assessment.validation.score),
            tags: processed.tags,
            content_type: processed.content_type,
            is_authentic: assessment.validation.valid,
            validation_method: mode.validation_method().to_string(),
            content_fingerprint: Some(processed.fingerprint),
        },
        status: PostStatus::Active,
        thumbnail: item.thumbnail.clone(),
        media_urls: processed.media_urls,
        local_engagement: LocalEngagement::default(),
        is_promoted: false,
        created_at: now,
        updated_at: now,
    }
}
