//! Content sources: one adapter per external platform behind [`ContentSource`].

pub mod medium;
pub mod reddit;

use crate::error::{Error, Result};
use crate::ingest::text;
use crate::types::{Platform, ScrapedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What to pull from one source locator.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub locator: String,
    pub keywords: Vec<String>,
    /// Items returned after keyword filtering.
    pub max_items: usize,
    /// Raw items fetched before giving up, counted before filtering.
    pub max_raw: usize,
}

impl FetchRequest {
    pub fn new(locator: &str, keywords: &[String], max_items: usize) -> Self {
        Self {
            locator: locator.to_string(),
            keywords: keywords.to_vec(),
            max_items,
            max_raw: max_items,
        }
    }

    /// Allow fetching `factor` times more raw items than will be returned.
    pub fn oversample(mut self, factor: usize) -> Self {
        self.max_raw = self.max_items.saturating_mul(factor.max(1));
        self
    }
}

/// Metadata about a source collection, e.g. a subreddit.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub subscribers: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub active: bool,
}

/// One discussion reply under a fetched item.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    fn platform(&self) -> Platform;

    /// Fetch up to `request.max_items` items matching the keyword filter.
    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<ScrapedItem>>;

    /// Discussion replies of one item, at most `max`.
    async fn replies(&self, item_url: &str, max: usize) -> Result<Vec<Reply>>;

    async fn source_info(&self, locator: &str) -> Result<SourceInfo>;
}

/// Explicit platform to adapter map, filled once at startup.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    sources: HashMap<Platform, Arc<dyn ContentSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn ContentSource>) -> Result<()> {
        let platform = source.platform();
        if self.sources.contains_key(&platform) {
            return Err(Error::Duplicate(format!("source for platform {platform}")));
        }
        self.sources.insert(platform, source);
        Ok(())
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn ContentSource>> {
        self.sources
            .get(&platform)
            .cloned()
            .ok_or(Error::NoScraperForPlatform(platform))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.sources.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}

/// Guess the platform a locator URL belongs to from its host.
pub fn platform_for_locator(locator: &str) -> Option<Platform> {
    let host = text::extract_domain(locator)?.to_lowercase();
    let is = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
    if is("reddit.com") {
        Some(Platform::Reddit)
    } else if is("medium.com") {
        Some(Platform::Medium)
    } else if is("twitter.com") || is("x.com") {
        Some(Platform::Twitter)
    } else if is("linkedin.com") {
        Some(Platform::LinkedIn)
    } else {
        None
    }
}

/// Keep an item when any keyword occurs, case-insensitively, in its title,
/// body or tags. No keywords keeps everything.
pub fn matches_keywords(item: &ScrapedItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{} {} {}", item.title, item.content, item.tags.join(" ")).to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(&k.to_lowercase()))
}

/// One page of a paginated listing.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<ScrapedItem>,
    /// Raw entries on the page, including ones dropped while mapping.
    pub raw_count: usize,
    pub next: Option<String>,
}

/// Drive a cursor-paginated listing. `fetch_page` gets the page size to ask
/// for and the cursor from the previous page. Stops once `max_raw` raw items
/// were seen, `max_items` items passed the keyword filter, a page came back
/// empty, or no cursor was returned.
pub async fn paginate<F, Fut>(
    request: &FetchRequest,
    page_size: usize,
    page_delay: Duration,
    mut fetch_page: F,
) -> Result<Vec<ScrapedItem>>
where
    F: FnMut(usize, Option<String>) -> Fut,
    Fut: Future<Output = Result<Page>>,
{
    let mut kept = Vec::new();
    let mut raw = 0;
    let mut cursor = None;

    while raw < request.max_raw {
        let limit = page_size.min(request.max_raw - raw);
        let page = fetch_page(limit, cursor.take()).await?;
        if page.raw_count == 0 {
            break;
        }
        raw += page.raw_count;
        kept.extend(
            page.items
                .into_iter()
                .filter(|item| matches_keywords(item, &request.keywords)),
        );
        debug!(raw, kept = kept.len(), "page fetched");

        if kept.len() >= request.max_items {
            break;
        }
        match page.next {
            Some(next) => cursor = Some(next),
            None => break,
        }
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }

    kept.truncate(request.max_items);
    Ok(kept)
}

/// Exponential backoff applied when a source answers 429.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

/// Run `op`, retrying on [`Error::RateLimited`] with doubling delays until
/// `max_retries` retries are used up. Other errors return immediately.
pub async fn retry_rate_limited<T, F, Fut>(service: &str, backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(Error::RateLimited { .. }) if attempt < backoff.max_retries => {
                let delay = text::backoff_delay(attempt, backoff.base, backoff.max);
                attempt += 1;
                warn!(
                    service,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::validator::tests::item;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Canned source: serves `items` through `paginate` in pages of
    /// `page_size`, or fails every fetch when `fail` is set.
    pub(crate) struct FakeSource {
        pub platform: Platform,
        pub items: Vec<ScrapedItem>,
        pub page_size: usize,
        pub fail: bool,
        pub fetches: AtomicUsize,
        pub requests: Mutex<Vec<FetchRequest>>,
    }

    impl FakeSource {
        pub(crate) fn new(platform: Platform, items: Vec<ScrapedItem>) -> Self {
            Self {
                platform,
                items,
                page_size: 25,
                fail: false,
                fetches: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(platform: Platform) -> Self {
            Self {
                fail: true,
                ..Self::new(platform, Vec::new())
            }
        }
    }

    #[async_trait]
    impl ContentSource for FakeSource {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<Vec<ScrapedItem>> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(Error::api(self.platform.as_str(), "HTTP 503 Service Unavailable"));
            }
            paginate(request, self.page_size, Duration::ZERO, |limit, cursor| {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                let start: usize = cursor.map_or(0, |c| c.parse().unwrap());
                let end = (start + limit).min(self.items.len());
                let items = self.items[start.min(end)..end].to_vec();
                let next = (end < self.items.len()).then(|| end.to_string());
                async move {
                    Ok(Page {
                        raw_count: items.len(),
                        items,
                        next,
                    })
                }
            })
            .await
        }

        async fn replies(&self, _item_url: &str, _max: usize) -> Result<Vec<Reply>> {
            Ok(Vec::new())
        }

        async fn source_info(&self, locator: &str) -> Result<SourceInfo> {
            Ok(SourceInfo {
                name: locator.to_string(),
                title: locator.to_string(),
                description: String::new(),
                subscribers: 0,
                created_at: None,
                active: true,
            })
        }
    }

    fn numbered(n: usize) -> Vec<ScrapedItem> {
        (0..n)
            .map(|i| {
                let mut it = item(&format!("Item number {i} title"), "Some body text for the item here.");
                it.id = format!("t{i}");
                it
            })
            .collect()
    }

    #[test]
    fn keyword_filter_checks_title_body_and_tags() {
        let kw = vec!["SaaS".to_string()];
        let mut it = item("Monthly revenue update", "Nothing relevant in here at all.");
        assert!(!matches_keywords(&it, &kw));
        it.tags = vec!["saas".into()];
        assert!(matches_keywords(&it, &kw));
        it.tags.clear();
        it.content = "We run a small saas".into();
        assert!(matches_keywords(&it, &kw));
        assert!(matches_keywords(&it, &[]));
    }

    #[tokio::test]
    async fn pagination_stops_at_max_items() {
        let source = FakeSource::new(Platform::Reddit, numbered(100));
        let items = source
            .fetch(&FetchRequest::new("r/test", &[], 30))
            .await
            .unwrap();
        assert!(source.fetches.load(Ordering::SeqCst) >= 2);
        assert!(items.len() <= 30);
        assert_eq!(items.len(), 30);
    }

    #[tokio::test]
    async fn pagination_stops_on_exhausted_source() {
        let source = FakeSource::new(Platform::Reddit, numbered(7));
        let items = source
            .fetch(&FetchRequest::new("r/test", &[], 50))
            .await
            .unwrap();
        assert_eq!(items.len(), 7);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversampling_reads_past_filtered_pages() {
        let mut items = numbered(60);
        items[55].title = "A startup story".into();
        let source = FakeSource::new(Platform::Reddit, items);
        let kw = vec!["startup".to_string()];

        let plain = source.fetch(&FetchRequest::new("r/test", &kw, 20)).await.unwrap();
        assert!(plain.is_empty());

        let wide = source
            .fetch(&FetchRequest::new("r/test", &kw, 20).oversample(3))
            .await
            .unwrap();
        assert_eq!(wide.len(), 1);
    }

    #[test]
    fn registry_rejects_second_source_per_platform() {
        let mut registry = SourceRegistry::new();
        registry
            .register(Arc::new(FakeSource::new(Platform::Reddit, Vec::new())))
            .unwrap();
        let err = registry
            .register(Arc::new(FakeSource::new(Platform::Reddit, Vec::new())))
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
        assert!(matches!(
            registry.get(Platform::Medium),
            Err(Error::NoScraperForPlatform(Platform::Medium))
        ));
        assert_eq!(registry.platforms(), vec![Platform::Reddit]);
    }

    #[test]
    fn locator_platforms() {
        assert_eq!(platform_for_locator("https://www.reddit.com/r/SaaS/"), Some(Platform::Reddit));
        assert_eq!(platform_for_locator("https://old.reddit.com/r/x"), Some(Platform::Reddit));
        assert_eq!(platform_for_locator("https://medium.com/@someone"), Some(Platform::Medium));
        assert_eq!(platform_for_locator("https://notreddit.com/r/x"), None);
    }

    #[tokio::test]
    async fn rate_limit_retries_are_capped() {
        let backoff = Backoff {
            base: Duration::from_millis(1),
            max: Duration::from_millis(2),
            max_retries: 3,
        };
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_rate_limited("test", backoff, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::RateLimited {
                    service: "test".into(),
                })
            }
        })
        .await;
        assert!(matches!(result, Err(Error::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let calls = AtomicUsize::new(0);
        let result = retry_rate_limited("test", backoff, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::RateLimited {
                        service: "test".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }
}
