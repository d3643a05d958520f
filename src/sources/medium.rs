use super::{ContentSource, FetchRequest, Page, Reply, SourceInfo, paginate};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::ingest::text;
use crate::types::{Platform, ScrapedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info};

const BASE_URL: &str = "https://medium.com";

static SCOPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:[a-z0-9-]+\.)?medium\.com/((?:tag/)?@?[^/?#]+)").expect("static regex")
});
/// Medium article slugs end in a hex post id: `/how-we-grew-3f2a1b9c0d1e`.
static POST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-([0-9a-f]{8,16})/?$").expect("static regex"));

// Medium has shipped several listing layouts; the first selector that matches wins.
const CARD_SELECTORS: [&str; 3] = ["article", "div.postArticle", "div[data-testid='post-preview']"];

/// Scrapes the server-rendered listing of a Medium tag, publication or author page.
/// Medium shows no engagement counts without JavaScript, so those stay zero.
pub struct MediumSource {
    http: HttpClient,
}

impl MediumSource {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

/// Tag, publication or `@author` segment of a Medium URL.
pub fn scope_from_locator(locator: &str) -> Result<String> {
    SCOPE
        .captures(locator)
        .map(|c| c[1].to_string())
        .ok_or_else(|| Error::InvalidSource(format!("no medium tag, publication or author in '{locator}'")))
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| Error::parse(format!("selector '{css}': {e}")))
}

fn element_text(el: ElementRef<'_>) -> String {
    text::clean_text(&el.text().collect::<String>())
}

fn absolute(href: &str) -> String {
    let href = href.split('?').next().unwrap_or(href);
    if href.starts_with('/') {
        format!("{BASE_URL}{href}")
    } else {
        href.to_string()
    }
}

struct CardSelectors {
    heading: Selector,
    link: Selector,
    excerpt: Selector,
    author: Selector,
    time: Selector,
    image: Selector,
}

impl CardSelectors {
    fn new() -> Result<Self> {
        Ok(Self {
            heading: selector("h2, h3")?,
            link: selector("a[href]")?,
            excerpt: selector("h3, p")?,
            author: selector("a[href*='/@']")?,
            time: selector("time[datetime]")?,
            image: selector("img[src]")?,
        })
    }
}

/// Map one listing page. Cards without a heading or link are dropped.
fn parse_listing(html: &str, scope: &str) -> Result<Page> {
    let document = Html::parse_document(html);
    let sel = CardSelectors::new()?;

    let mut cards = Vec::new();
    for css in CARD_SELECTORS {
        cards = document.select(&selector(css)?).collect();
        if !cards.is_empty() {
            break;
        }
    }

    let mut seen = HashSet::new();
    let items: Vec<ScrapedItem> = cards
        .iter()
        .filter_map(|card| map_card(*card, &sel, scope))
        .filter(|item| seen.insert(item.url.clone()))
        .collect();
    Ok(Page {
        items,
        raw_count: cards.len(),
        next: None,
    })
}

fn map_card(card: ElementRef<'_>, sel: &CardSelectors, scope: &str) -> Option<ScrapedItem> {
    let heading = card.select(&sel.heading).next()?;
    let title = element_text(heading);
    if title.chars().count() <= 5 {
        return None;
    }

    // Prefer the anchor wrapping the heading; fall back to the card's first link.
    let href = card
        .select(&sel.link)
        .find(|a| a.select(&sel.heading).next().is_some())
        .or_else(|| card.select(&sel.link).next())?
        .value()
        .attr("href")?;
    let url = absolute(href);

    let author = card
        .select(&sel.author)
        .filter(|a| a.select(&sel.heading).next().is_none())
        .map(element_text)
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    let excerpt = card
        .select(&sel.excerpt)
        .filter(|el| el.id() != heading.id())
        .map(element_text)
        .find(|t| !t.is_empty() && *t != title && *t != author);
    let created_at = card
        .select(&sel.time)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
        .map(|d| d.with_timezone(&Utc));
    let thumbnail = card
        .select(&sel.image)
        .filter_map(|img| img.value().attr("src"))
        .find(|src| src.starts_with("http"))
        .map(str::to_string);
    let id = POST_ID
        .captures(&url)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| url.clone());

    let scope_tag = scope.trim_start_matches("tag/").trim_start_matches('@').to_lowercase();
    let mut tags = vec![scope_tag];
    tags.extend(text::extract_hashtags(&title));
    tags.dedup();

    Some(ScrapedItem {
        id,
        content: excerpt.unwrap_or_else(|| title.clone()),
        title,
        url,
        author,
        created_at,
        likes: 0,
        comments: 0,
        shares: 0,
        views: 0,
        thumbnail,
        media_urls: Vec::new(),
        tags,
        platform: Platform::Medium,
        scope: Some(scope.to_string()),
        score: 0,
        upvote_ratio: None,
    })
}

fn parse_source_info(html: &str, scope: &str) -> Result<SourceInfo> {
    let document = Html::parse_document(html);
    let meta = |css: &str| -> Result<Option<String>> {
        Ok(document
            .select(&selector(css)?)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(text::clean_text))
    };
    let title = match meta("meta[property='og:title']")? {
        Some(t) => t,
        None => document
            .select(&selector("title")?)
            .next()
            .map(element_text)
            .unwrap_or_else(|| scope.to_string()),
    };
    let description = meta("meta[name='description']")?.unwrap_or_default();
    Ok(SourceInfo {
        name: scope.to_string(),
        title,
        description,
        subscribers: 0,
        created_at: None,
        active: true,
    })
}

#[async_trait]
impl ContentSource for MediumSource {
    fn platform(&self) -> Platform {
        Platform::Medium
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<ScrapedItem>> {
        let scope = scope_from_locator(&request.locator)?;
        let (http, locator, scope_ref) = (&self.http, request.locator.as_str(), scope.as_str());
        // Listing pages carry no cursor, so this is always a single page.
        let items = paginate(request, request.max_raw.max(1), Duration::ZERO, move |_, _| async move {
            let html = http.get_text(locator).await?;
            parse_listing(&html, scope_ref)
        })
        .await?;
        info!(%scope, items = items.len(), "medium fetch complete");
        Ok(items)
    }

    async fn replies(&self, item_url: &str, _max: usize) -> Result<Vec<Reply>> {
        // Responses are rendered client-side only.
        debug!(url = %item_url, "medium replies unavailable");
        Ok(Vec::new())
    }

    async fn source_info(&self, locator: &str) -> Result<SourceInfo> {
        let scope = scope_from_locator(locator)?;
        let html = self.http.get_text(locator).await?;
        parse_source_info(&html, &scope)
    }
}
