use super::text;
use crate::types::{ContentType, MediaKind, MediaUrl, ScrapedItem};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;

static EXCESS_MARKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!?]{3,}").expect("static regex"));
static ELLIPSIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{3,}").expect("static regex"));

const UNTITLED: &str = "Untitled Post";
const MAX_TAGS: usize = 10;
const MAX_MEDIA: usize = 5;

/// Business topics tagged when any of their words appears in the text.
const TOPICS: &[(&str, &[&str])] = &[
    ("startup", &["startup", "startups", "entrepreneur", "entrepreneurship", "founder"]),
    ("business", &["business", "company", "corporate", "enterprise"]),
    ("marketing", &["marketing", "advertising", "promotion", "branding", "seo"]),
    ("sales", &["sales", "selling", "revenue", "profit", "customer"]),
    ("technology", &["tech", "technology", "software", "digital", "innovation"]),
    ("finance", &["finance", "financial", "money", "investment", "funding"]),
    ("leadership", &["leadership", "management", "ceo", "executive", "leader"]),
    ("growth", &["growth", "scaling", "expansion", "development"]),
    ("productivity", &["productivity", "efficiency", "optimization", "automation"]),
    ("strategy", &["strategy", "strategic", "planning", "vision"]),
];

/// First matching class wins.
const CONTENT_CLASSES: &[(ContentType, &[&str])] = &[
    (ContentType::Educational, &["how to", "tutorial", "learn", "guide"]),
    (ContentType::News, &["breaking", "announced", "reports", "according to"]),
    (ContentType::Discussion, &["what do you think", "thoughts?", "discuss", "question"]),
    (ContentType::Experience, &["my experience", "i learned", "personal story", "journey"]),
    (ContentType::Insights, &["industry", "market", "trends", "analysis"]),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QualityRules {
    pub base: f64,
    pub min_content_len: usize,
    pub max_content_len: usize,
    pub content_in_band: f64,
    pub content_too_short: f64,
    pub min_title_len: usize,
    pub max_title_len: usize,
    pub title_in_band: f64,
    pub title_out_of_band: f64,
    pub high_engagement: u64,
    pub high_engagement_bonus: f64,
    pub medium_engagement: u64,
    pub medium_engagement_bonus: f64,
    pub spam_phrases: Vec<String>,
    /// Distinct spam phrases needed in the title or the body to count as spam.
    pub spam_min_hits: usize,
    pub spam_penalty: f64,
    pub fresh_day_bonus: f64,
    pub fresh_week_bonus: f64,
    pub media_bonus: f64,
    pub author_bonus: f64,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            base: 0.5,
            min_content_len: 50,
            max_content_len: 5000,
            content_in_band: 0.2,
            content_too_short: -0.3,
            min_title_len: 10,
            max_title_len: 200,
            title_in_band: 0.1,
            title_out_of_band: -0.2,
            high_engagement: 50,
            high_engagement_bonus: 0.2,
            medium_engagement: 10,
            medium_engagement_bonus: 0.1,
            spam_phrases: [
                "buy now",
                "click here",
                "free money",
                "guaranteed",
                "limited time",
                "act now",
                "urgent",
                "winner",
                "congratulations",
                "$$$",
                "!!!!!",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            spam_min_hits: 2,
            spam_penalty: -0.4,
            fresh_day_bonus: 0.1,
            fresh_week_bonus: 0.05,
            media_bonus: 0.1,
            author_bonus: 0.05,
        }
    }
}

/// Cleaned, tagged and classified form of a [`ScrapedItem`], ready to persist.
#[derive(Debug, Clone)]
pub struct ProcessedContent {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub media_urls: Vec<MediaUrl>,
    pub content_type: ContentType,
    pub fingerprint: String,
}

pub struct ContentProcessor {
    rules: QualityRules,
}

impl ContentProcessor {
    pub fn new(rules: QualityRules) -> Self {
        Self { rules }
    }

    pub fn quality_score(&self, item: &ScrapedItem) -> f64 {
        self.quality_score_at(item, Utc::now())
    }

    pub fn quality_score_at(&self, item: &ScrapedItem, now: DateTime<Utc>) -> f64 {
        let r = &self.rules;
        let mut score = r.base;

        let body = item.content.chars().count();
        if (r.min_content_len..=r.max_content_len).contains(&body) {
            score += r.content_in_band;
        } else if body < r.min_content_len {
            score += r.content_too_short;
        }

        let title = item.title.chars().count();
        if (r.min_title_len..=r.max_title_len).contains(&title) {
            score += r.title_in_band;
        } else {
            score += r.title_out_of_band;
        }

        let engagement = item.total_engagement();
        if engagement > r.high_engagement {
            score += r.high_engagement_bonus;
        } else if engagement > r.medium_engagement {
            score += r.medium_engagement_bonus;
        }

        if self.is_spam(&item.content) || self.is_spam(&item.title) {
            score += r.spam_penalty;
        }

        if let Some(created) = item.created_at {
            let age_days = (now - created).num_seconds() as f64 / 86_400.0;
            if age_days <= 1.0 {
                score += r.fresh_day_bonus;
            } else if age_days <= 7.0 {
                score += r.fresh_week_bonus;
            }
        }

        if !item.media_urls.is_empty() {
            score += r.media_bonus;
        }

        let author = item.author.trim();
        if !author.eq_ignore_ascii_case("unknown") && author.chars().count() > 3 {
            score += r.author_bonus;
        }

        score.clamp(0.0, 1.0)
    }

    fn is_spam(&self, text: &str) -> bool {
        text::matched_phrases(text, &self.rules.spam_phrases).len() >= self.rules.spam_min_hits
    }

    pub fn process(&self, item: &ScrapedItem) -> ProcessedContent {
        ProcessedContent {
            title: self.process_title(&item.title),
            content: self.process_body(&item.content),
            tags: derive_tags(item),
            media_urls: normalize_media(item),
            content_type: classify_content_type(&item.title, &item.content),
            fingerprint: text::fingerprint(&item.title, &item.content),
        }
    }

    pub fn process_title(&self, title: &str) -> String {
        let cleaned = text::clean_text(title);
        if cleaned.is_empty() {
            return UNTITLED.to_string();
        }
        let cleaned = EXCESS_MARKS.replace_all(&cleaned, "!");
        let cleaned = ELLIPSIS.replace_all(&cleaned, "...");

        let mut chars = cleaned.chars();
        let capitalized: String = match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        };
        text::truncate(&capitalized, self.rules.max_title_len)
    }

    /// Plain text with markup and links removed, whitespace collapsed.
    pub fn process_body(&self, body: &str) -> String {
        let plain = text::strip_html(body);
        let without_urls = text::strip_urls(&plain);
        let cleaned = text::clean_text(&without_urls);
        text::truncate(&cleaned, self.rules.max_content_len)
    }

    /// True when `item` reads like one of `accepted`: title or body word
    /// similarity above `threshold`.
    pub fn is_near_duplicate(item: &ScrapedItem, accepted: &[ScrapedItem], threshold: f64) -> bool {
        accepted.iter().any(|prev| {
            text::similarity(&item.title, &prev.title) > threshold
                || text::similarity(&item.content, &prev.content) > threshold
        })
    }
}

/// Lowercase, keep `[a-z0-9_-]`, trim separators; `None` outside 2..=30 chars.
pub fn clean_tag(tag: &str) -> Option<String> {
    let kept: String = tag
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_')
        .collect();
    let trimmed = kept.trim_matches(|c| c == '-' || c == '_');
    (2..=30).contains(&trimmed.len()).then(|| trimmed.to_string())
}

fn derive_tags(item: &ScrapedItem) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    let mut push = |tag: Option<String>| {
        if let Some(tag) = tag
            && seen.insert(tag.clone())
        {
            tags.push(tag);
        }
    };

    for tag in &item.tags {
        push(clean_tag(tag));
    }
    for tag in text::extract_hashtags(&item.title)
        .into_iter()
        .chain(text::extract_hashtags(&item.content))
    {
        push(clean_tag(&tag));
    }
    push(Some(item.platform.as_str().to_string()));
    for topic in topic_tags(&item.title, &item.content) {
        push(Some(topic.to_string()));
    }

    tags.truncate(MAX_TAGS);
    tags
}

fn topic_tags(title: &str, body: &str) -> Vec<&'static str> {
    let text = format!("{title} {body}").to_lowercase();
    TOPICS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| text.contains(w)))
        .map(|(topic, _)| *topic)
        .collect()
}

pub fn classify_content_type(title: &str, body: &str) -> ContentType {
    let text = format!("{title} {body}").to_lowercase();
    CONTENT_CLASSES
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|p| text.contains(p)))
        .map_or(ContentType::General, |(kind, _)| *kind)
}

fn media_kind(url: &str) -> MediaKind {
    if text::is_image_url(url) {
        MediaKind::Image
    } else if text::is_video_url(url) {
        MediaKind::Video
    } else {
        MediaKind::Link
    }
}

/// Item media plus links found in the body: valid http(s) only, typed,
/// deduplicated by url, at most five.
fn normalize_media(item: &ScrapedItem) -> Vec<MediaUrl> {
    let body_links = text::extract_urls(&item.content)
        .into_iter()
        .map(|url| MediaUrl { kind: media_kind(&url), url });

    let mut seen = HashSet::new();
    item.media_urls
        .iter()
        .cloned()
        .chain(body_links)
        .filter(|m| text::is_valid_url(&m.url) && seen.insert(m.url.clone()))
        .take(MAX_MEDIA)
        .collect()
}
