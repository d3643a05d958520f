use crate::error::{Error, Result};
use crate::ingest::manager::IngestionStats;
use crate::types::{Community, Post};
use askama::Template;
use chrono::Utc;
use std::path::Path;

#[derive(Template)]
#[template(path = "stats.html")]
pub struct StatsTemplate {
    pub generated_at: String,
    pub window_hours: i64,
    pub total_scraped_posts: u64,
    pub platforms: Vec<PlatformView>,
    pub communities: Vec<CommunityView>,
    pub recent_posts: Vec<PostView>,
}

pub struct PlatformView {
    pub platform: String,
    pub count: usize,
    pub avg_quality: String,
    pub total_engagement: u64,
}

pub struct CommunityView {
    pub name: String,
    pub slug: String,
    pub category: String,
    pub frequency: String,
    pub post_count: u64,
    pub last_scraped: String,
    pub sources: Vec<String>,
}

pub struct PostView {
    pub title: String,
    pub url: String,
    pub platform: String,
    pub quality: String,
    pub quality_class: &'static str,
    pub content_type: String,
    pub tags: String,
}

fn quality_class(score: f64) -> &'static str {
    if score >= 0.8 {
        "high"
    } else if score >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

pub fn render(stats: &IngestionStats, communities: &[Community], recent: &[Post]) -> Result<String> {
    let platforms = stats
        .last_24_hours
        .iter()
        .map(|p| PlatformView {
            platform: p.platform.to_string(),
            count: p.count,
            avg_quality: format!("{:.2}", p.avg_quality_score),
            total_engagement: p.total_engagement,
        })
        .collect();

    let community_views = communities
        .iter()
        .map(|c| CommunityView {
            name: c.name.clone(),
            slug: c.slug.clone(),
            category: serde_json::to_value(c.category)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            frequency: c.settings.frequency.to_string(),
            post_count: c.post_count,
            last_scraped: c
                .last_scraped_at
                .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_else(|| "never".into()),
            sources: c
                .platforms
                .iter()
                .filter(|p| p.active)
                .map(|p| format!("{}: {}", p.platform, p.source_url))
                .collect(),
        })
        .collect();

    let recent_posts = recent
        .iter()
        .map(|p| PostView {
            title: p.title.clone(),
            url: p.source_url.clone(),
            platform: p.platform.to_string(),
            quality: format!("{:.2}", p.metadata.quality_score),
            quality_class: quality_class(p.metadata.quality_score),
            content_type: p.metadata.content_type.to_string(),
            tags: p.metadata.tags.join(", "),
        })
        .collect();

    let template = StatsTemplate {
        generated_at: Utc::now().format("%Y-%m-%d %H:%M UTC").to_string(),
        window_hours: stats.window_hours,
        total_scraped_posts: stats.total_scraped_posts,
        platforms,
        communities: community_views,
        recent_posts,
    };

    template
        .render()
        .map_err(|e| Error::Template(e.to_string()))
}

pub fn write_report(path: &Path, html: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)?;
    Ok(())
}
