use crate::engagement::SyntheticConfig;
use crate::error::{Error, Result};
use crate::ingest::manager::CleanupOptions;
use crate::ingest::processor::QualityRules;
use crate::ingest::validator::ValidationRules;
use crate::llm::Provider;
use crate::types::{Category, Community, PlatformSource, ScrapeSettings};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub http: HttpConfig,
    pub reddit: RedditConfig,
    pub ingest: IngestConfig,
    pub validation: ValidationRules,
    pub quality: QualityRules,
    pub cleanup: CleanupOptions,
    pub scheduler: SchedulerConfig,
    pub synthetic: SyntheticConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub communities: Vec<CommunitySeed>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot file. Without it the store lives only as long as the process.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
    pub rotate_user_agent: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            user_agent: "community-scout/0.1.0".into(),
            rotate_user_agent: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedditConfig {
    pub base_url: String,
    pub user_agent: String,
    pub page_size: usize,
    pub page_delay_ms: u64,
    pub rate_limit_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".into(),
            user_agent: "CommunityBot/1.0 (by /u/CommunityBot)".into(),
            page_size: 25,
            page_delay_ms: 2000,
            rate_limit_backoff_ms: 5000,
            max_backoff_ms: 60_000,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Usernames of the pool that nominally owns ingested posts.
    pub platform_users: Vec<String>,
    pub single_post_limit: usize,
    /// Word similarity at which an item duplicates one accepted earlier in the same batch.
    pub near_duplicate_similarity: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            platform_users: vec!["community_curator".into()],
            single_post_limit: 1,
            near_duplicate_similarity: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub ingest_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub stats_interval_secs: u64,
    /// Also give every community its own job at its configured frequency.
    pub per_community_jobs: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: 5 * 60,
            cleanup_interval_secs: 24 * 60 * 60,
            stats_interval_secs: 6 * 60 * 60,
            per_community_jobs: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o-mini".into(),
            max_tokens: 800,
            temperature: 0.8,
            api_key_env: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            level: "info".into(),
        }
    }
}

/// A community declared in the config file, upserted by slug on startup.
#[derive(Debug, Clone, Deserialize)]
pub struct CommunitySeed {
    pub name: String,
    pub description: String,
    pub category: Category,
    #[serde(default)]
    pub scraping: ScrapeSettings,
    #[serde(default)]
    pub platforms: Vec<PlatformSource>,
    #[serde(default)]
    pub member_count: u64,
}

impl CommunitySeed {
    pub fn to_community(&self) -> Community {
        let mut community = Community::new(&self.name, &self.description, self.category);
        community.platforms = self.platforms.clone();
        community.settings = self.scraping.clone();
        community.member_count = self.member_count;
        community
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ingest.platform_users.is_empty() {
            return Err(Error::config("ingest.platform_users must not be empty"));
        }
        if self.reddit.page_size == 0 || self.reddit.page_size > 100 {
            return Err(Error::config("reddit.page_size must be within 1..=100"));
        }
        if !(0.0..=1.0).contains(&self.validation.min_score) {
            return Err(Error::config("validation.min_score must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.cleanup.min_quality_score) {
            return Err(Error::config("cleanup.min_quality_score must be within [0, 1]"));
        }
        if self.synthetic.initial_likes.min > self.synthetic.initial_likes.max
            || self.synthetic.comments.min > self.synthetic.comments.max
        {
            return Err(Error::config("synthetic ranges need min <= max"));
        }
        if self.scheduler.ingest_interval_secs == 0
            || self.scheduler.cleanup_interval_secs == 0
            || self.scheduler.stats_interval_secs == 0
        {
            return Err(Error::config("scheduler intervals must be non-zero"));
        }

        let mut slugs = HashSet::new();
        for seed in &self.communities {
            let community = seed.to_community();
            if community.slug.is_empty() {
                return Err(Error::config("community name must not be empty"));
            }
            if !slugs.insert(community.slug.clone()) {
                return Err(Error::config(format!(
                    "duplicate community slug '{}'",
                    community.slug
                )));
            }
            if !(0.0..=1.0).contains(&seed.scraping.quality_threshold) {
                return Err(Error::config(format!(
                    "community '{}': quality_threshold must be within [0, 1]",
                    seed.name
                )));
            }
            if seed.scraping.max_posts_per_scrape == 0 {
                return Err(Error::config(format!(
                    "community '{}': max_posts_per_scrape must be positive",
                    seed.name
                )));
            }
        }
        Ok(())
    }
}
