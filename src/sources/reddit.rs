use super::{Backoff, ContentSource, FetchRequest, Page, Reply, SourceInfo, paginate, retry_rate_limited};
use crate::config::RedditConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::ingest::text;
use crate::types::{MediaKind, MediaUrl, Platform, ScrapedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

const SERVICE: &str = "reddit";

static SUBREDDIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/r/([^/?#]+)").expect("static regex"));
static COMMENTS_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/r/([^/?#]+)/comments/([a-z0-9]+)").expect("static regex"));

const GONE_MARKERS: [&str; 2] = ["[deleted]", "[removed]"];

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Thing>,
    after: Option<String>,
}

/// Kept as raw JSON so one malformed child does not sink the whole page.
#[derive(Deserialize)]
struct Thing {
    #[serde(default)]
    kind: String,
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RawPost {
    id: String,
    name: Option<String>,
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: String,
    #[serde(default)]
    author: String,
    created_utc: Option<f64>,
    #[serde(default)]
    ups: i64,
    #[serde(default)]
    num_comments: u64,
    #[serde(default)]
    num_crossposts: u64,
    thumbnail: Option<String>,
    preview: Option<Preview>,
    url: Option<String>,
    #[serde(default)]
    is_video: bool,
    media: Option<Media>,
    #[serde(default)]
    is_gallery: bool,
    media_metadata: Option<BTreeMap<String, MediaMetadata>>,
    subreddit: Option<String>,
    link_flair_text: Option<String>,
    #[serde(default)]
    score: i64,
    upvote_ratio: Option<f64>,
}

#[derive(Deserialize)]
struct Preview {
    #[serde(default)]
    images: Vec<PreviewImage>,
}

#[derive(Deserialize)]
struct PreviewImage {
    source: Option<ImageSource>,
}

#[derive(Deserialize)]
struct ImageSource {
    url: Option<String>,
}

#[derive(Deserialize)]
struct Media {
    reddit_video: Option<RedditVideo>,
}

#[derive(Deserialize)]
struct RedditVideo {
    fallback_url: Option<String>,
}

#[derive(Deserialize)]
struct MediaMetadata {
    s: Option<GallerySource>,
}

#[derive(Deserialize)]
struct GallerySource {
    u: Option<String>,
}

#[derive(Deserialize)]
struct About {
    data: AboutData,
}

#[derive(Deserialize)]
struct AboutData {
    display_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    public_description: String,
    #[serde(default)]
    subscribers: u64,
    created_utc: Option<f64>,
    #[serde(default)]
    quarantine: bool,
    #[serde(default)]
    subreddit_type: String,
}

#[derive(Deserialize)]
struct RawComment {
    id: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    score: i64,
    created_utc: Option<f64>,
}

/// Reddit's public JSON listing API.
pub struct RedditSource {
    http: HttpClient,
    config: RedditConfig,
}

impl RedditSource {
    pub fn new(http: HttpClient, config: RedditConfig) -> Self {
        Self { http, config }
    }

    fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.config.rate_limit_backoff_ms),
            max: Duration::from_millis(self.config.max_backoff_ms),
            max_retries: self.config.max_retries,
        }
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let headers = [("User-Agent", self.config.user_agent.as_str())];
        retry_rate_limited(SERVICE, self.backoff(), || {
            self.http.get_json::<T>(SERVICE, url, query, &headers)
        })
        .await
    }

    async fn listing_page(&self, subreddit: &str, limit: usize, after: Option<String>) -> Result<Page> {
        let url = format!("{}/r/{subreddit}/hot.json", self.config.base_url);
        let mut query = vec![("limit", limit.to_string()), ("raw_json", "1".to_string())];
        if let Some(after) = after {
            query.push(("after", after));
        }
        let listing: Listing = self.get(&url, &query).await?;
        Ok(self.page_from_listing(listing))
    }

    fn page_from_listing(&self, listing: Listing) -> Page {
        let raw_count = listing.data.children.len();
        let mut last_name = None;
        let items: Vec<ScrapedItem> = listing
            .data
            .children
            .into_iter()
            .filter_map(|thing| serde_json::from_value::<RawPost>(thing.data).ok())
            .inspect(|post| last_name = post.name.clone().or(last_name.take()))
            .filter_map(|post| map_post(post, &self.config.base_url))
            .collect();
        let next = listing.data.after.or(last_name);
        Page {
            items,
            raw_count,
            next,
        }
    }
}

/// Subreddit name from a URL such as `https://www.reddit.com/r/SaaS/`.
pub fn subreddit_from_locator(locator: &str) -> Result<String> {
    SUBREDDIT
        .captures(locator)
        .map(|c| c[1].to_string())
        .ok_or_else(|| Error::InvalidSource(format!("no subreddit in '{locator}'")))
}

fn timestamp(secs: Option<f64>) -> Option<DateTime<Utc>> {
    secs.and_then(|s| DateTime::from_timestamp(s as i64, 0))
}

fn unescape(url: &str) -> String {
    url.replace("&amp;", "&")
}

fn is_gone(value: &str) -> bool {
    GONE_MARKERS.iter().any(|m| value.contains(m))
}

/// Canonical item from one listing entry; deleted or removed posts map to `None`.
fn map_post(post: RawPost, base_url: &str) -> Option<ScrapedItem> {
    if post.author == "[deleted]" || is_gone(&post.title) || GONE_MARKERS.contains(&post.selftext.as_str()) {
        return None;
    }
    let content = if post.selftext.trim().is_empty() {
        post.title.clone()
    } else {
        post.selftext.clone()
    };

    Some(ScrapedItem {
        thumbnail: thumbnail(&post),
        media_urls: media_urls(&post),
        tags: tags(&post),
        id: post.id,
        url: format!("{base_url}{}", post.permalink),
        author: post.author,
        created_at: timestamp(post.created_utc),
        likes: post.ups.max(0) as u64,
        comments: post.num_comments,
        shares: post.num_crossposts,
        views: 0,
        platform: Platform::Reddit,
        scope: post.subreddit,
        score: post.score,
        upvote_ratio: post.upvote_ratio,
        title: post.title,
        content,
    })
}

fn thumbnail(post: &RawPost) -> Option<String> {
    if let Some(thumb) = &post.thumbnail
        && thumb.starts_with("http")
    {
        return Some(thumb.clone());
    }
    post.preview
        .as_ref()?
        .images
        .first()?
        .source
        .as_ref()?
        .url
        .as_deref()
        .map(unescape)
}

fn media_urls(post: &RawPost) -> Vec<MediaUrl> {
    let mut media = Vec::new();
    if let Some(url) = &post.url
        && text::is_image_url(url)
    {
        media.push(MediaUrl {
            kind: MediaKind::Image,
            url: url.clone(),
        });
    }
    if post.is_video
        && let Some(url) = post
            .media
            .as_ref()
            .and_then(|m| m.reddit_video.as_ref())
            .and_then(|v| v.fallback_url.as_ref())
    {
        media.push(MediaUrl {
            kind: MediaKind::Video,
            url: url.clone(),
        });
    }
    if post.is_gallery
        && let Some(entries) = &post.media_metadata
    {
        media.extend(
            entries
                .values()
                .filter_map(|m| m.s.as_ref()?.u.as_deref())
                .map(|u| MediaUrl {
                    kind: MediaKind::Image,
                    url: unescape(u),
                }),
        );
    }
    media
}

fn tags(post: &RawPost) -> Vec<String> {
    let mut seen = HashSet::new();
    let hashtags = text::extract_hashtags(&format!("{} {}", post.title, post.selftext));
    post.subreddit
        .iter()
        .chain(post.link_flair_text.iter())
        .map(|t| t.to_lowercase())
        .chain(hashtags)
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[async_trait]
impl ContentSource for RedditSource {
    fn platform(&self) -> Platform {
        Platform::Reddit
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<ScrapedItem>> {
        let subreddit = subreddit_from_locator(&request.locator)?;
        let delay = Duration::from_millis(self.config.page_delay_ms);
        let items = paginate(request, self.config.page_size, delay, |limit, after| {
            self.listing_page(&subreddit, limit, after)
        })
        .await?;
        info!(%subreddit, items = items.len(), "reddit fetch complete");
        Ok(items)
    }

    async fn replies(&self, item_url: &str, max: usize) -> Result<Vec<Reply>> {
        let caps = COMMENTS_PATH
            .captures(item_url)
            .ok_or_else(|| Error::InvalidSource(format!("not a reddit post url: '{item_url}'")))?;
        let url = format!("{}/r/{}/comments/{}.json", self.config.base_url, &caps[1], &caps[2]);
        let query = [("limit", max.to_string()), ("raw_json", "1".to_string())];
        let listings: Vec<Listing> = self.get(&url, &query).await?;
        let replies = replies_from_listings(listings, max);
        debug!(url = %item_url, replies = replies.len(), "reddit replies fetched");
        Ok(replies)
    }

    async fn source_info(&self, locator: &str) -> Result<SourceInfo> {
        let subreddit = subreddit_from_locator(locator)?;
        let url = format!("{}/r/{subreddit}/about.json", self.config.base_url);
        let about: About = self.get(&url, &[]).await?;
        Ok(source_info_from_about(about.data))
    }
}

/// The comments endpoint returns `[post listing, comment listing]`.
fn replies_from_listings(listings: Vec<Listing>, max: usize) -> Vec<Reply> {
    listings
        .into_iter()
        .nth(1)
        .map(|l| l.data.children)
        .unwrap_or_default()
        .into_iter()
        .filter(|thing| thing.kind == "t1")
        .filter_map(|thing| serde_json::from_value::<RawComment>(thing.data).ok())
        .filter(|c| c.author != "[deleted]" && !GONE_MARKERS.contains(&c.body.as_str()))
        .take(max)
        .map(|c| Reply {
            id: c.id,
            author: c.author,
            body: c.body,
            score: c.score,
            created_at: timestamp(c.created_utc),
        })
        .collect()
}

fn source_info_from_about(data: AboutData) -> SourceInfo {
    SourceInfo {
        active: !data.quarantine && data.subreddit_type == "public",
        name: data.display_name,
        title: data.title,
        description: data.public_description,
        subscribers: data.subscribers,
        created_at: timestamp(data.created_utc),
    }
}
