use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type CommunityId = Uuid;
pub type PostId = Uuid;
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    Twitter,
    LinkedIn,
    Medium,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reddit => "reddit",
            Self::Twitter => "twitter",
            Self::LinkedIn => "linkedin",
            Self::Medium => "medium",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Entrepreneurs,
    Startups,
    SmallBusiness,
    BusinessGeneral,
    Marketing,
    EntrepreneurialRide,
    BusinessIdeas,
    SaasOwners,
    PersonalFinance,
    LawAdvice,
    Sales,
    ECommerce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    pub fn period(&self) -> Duration {
        match self {
            Self::Hourly => Duration::from_secs(60 * 60),
            Self::Daily => Duration::from_secs(24 * 60 * 60),
            Self::Weekly => Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hourly => write!(f, "hourly"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
        }
    }
}

/// One external source feeding a community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSource {
    pub platform: Platform,
    pub source_url: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSettings {
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default = "default_max_posts")]
    pub max_posts_per_scrape: usize,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            frequency: Frequency::Daily,
            max_posts_per_scrape: default_max_posts(),
            quality_threshold: default_quality_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_posts() -> usize {
    50
}

fn default_quality_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub category: Category,
    pub platforms: Vec<PlatformSource>,
    pub settings: ScrapeSettings,
    pub member_count: u64,
    pub post_count: u64,
    pub last_scraped_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Community {
    pub fn new(name: &str, description: &str, category: Category) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            slug: slugify(name),
            description: description.trim().to_string(),
            category,
            platforms: Vec::new(),
            settings: ScrapeSettings::default(),
            member_count: 0,
            post_count: 0,
            last_scraped_at: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    pub fn has_active_platform(&self) -> bool {
        self.platforms.iter().any(|p| p.active)
    }
}

/// Lowercase the name and turn whitespace runs into single hyphens.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrl {
    pub kind: MediaKind,
    pub url: String,
}

/// Canonical shape of one fetched item before it becomes a [`Post`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub views: u64,
    pub thumbnail: Option<String>,
    pub media_urls: Vec<MediaUrl>,
    pub tags: Vec<String>,
    pub platform: Platform,
    /// Source-native scope, e.g. the subreddit.
    pub scope: Option<String>,
    pub score: i64,
    pub upvote_ratio: Option<f64>,
}

impl ScrapedItem {
    pub fn total_engagement(&self) -> u64 {
        self.likes + self.comments + self.shares
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Active,
    Hidden,
    Flagged,
    Deleted,
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Hidden => write!(f, "hidden"),
            Self::Flagged => write!(f, "flagged"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Educational,
    News,
    Discussion,
    Experience,
    Insights,
    General,
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Educational => write!(f, "educational"),
            Self::News => write!(f, "news"),
            Self::Discussion => write!(f, "discussion"),
            Self::Experience => write!(f, "experience"),
            Self::Insights => write!(f, "insights"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Engagement as reported by the source at scrape time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub views: u64,
}

impl EngagementMetrics {
    pub fn total(&self) -> u64 {
        self.likes + self.comments + self.shares
    }
}

/// Engagement accumulated by in-app actions, never mixed with scraped counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalEngagement {
    pub likes: u64,
    pub comments: u64,
    pub bookmarks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalCounter {
    Likes,
    Comments,
    Bookmarks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingMetadata {
    pub scraped_at: DateTime<Utc>,
    pub original_author: String,
    pub original_created_at: Option<DateTime<Utc>>,
    pub quality_score: f64,
    pub authenticity_score: Option<f64>,
    pub tags: Vec<String>,
    pub content_type: ContentType,
    pub is_authentic: bool,
    pub validation_method: String,
    /// Recorded for inspection only; dedup is keyed on url and original id.
    pub content_fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub content: String,
    pub source_url: String,
    pub platform: Platform,
    pub original_id: String,
    pub community_id: CommunityId,
    pub owner_id: UserId,
    pub engagement: EngagementMetrics,
    pub metadata: ScrapingMetadata,
    pub status: PostStatus,
    pub thumbnail: Option<String>,
    pub media_urls: Vec<MediaUrl>,
    pub local_engagement: LocalEngagement,
    pub is_promoted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    Platform,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub kind: UserKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Like {
    pub user_id: UserId,
    pub post_id: PostId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: PostId,
    pub author_id: UserId,
    pub body: String,
    pub generated: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_lowercase_and_hyphenated() {
        assert_eq!(slugify("SaaS  Owners Club"), "saas-owners-club");
        assert_eq!(slugify("  Startups "), "startups");
    }

    #[test]
    fn new_community_derives_slug() {
        let c = Community::new("Small Business", "Owners talking shop", Category::SmallBusiness);
        assert_eq!(c.slug, "small-business");
        assert!(c.active);
        assert!(!c.has_active_platform());
    }

    #[test]
    fn frequency_periods() {
        assert_eq!(Frequency::Hourly.period().as_secs(), 3600);
        assert_eq!(Frequency::Weekly.period().as_secs(), 604_800);
    }
}
