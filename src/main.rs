mod config;
mod engagement;
mod error;
mod http;
mod ingest;
mod llm;
mod output;
mod scheduler;
mod sources;
mod store;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, LogFormat};
use engagement::CommentSynthesizer;
use ingest::manager::{CleanupOptions, ScrapeMode, ScraperManager};
use ingest::processor::ContentProcessor;
use ingest::validator::ContentValidator;
use scheduler::{Periods, Scheduler};
use sources::{ContentSource, SourceRegistry};
use sources::medium::MediumSource;
use sources::reddit::RedditSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{MemoryStore, Store};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::PostStatus;

const REPORT_RECENT_POSTS: usize = 25;

#[derive(Parser)]
#[command(
    name = "community-scout",
    about = "Ingests posts from Reddit and Medium into curated business communities"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// LLM provider override: anthropic, openrouter, openai
    #[arg(long, global = true)]
    provider: Option<String>,

    /// LLM model override
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Seed from config, then run the scheduled jobs until Ctrl-C
    Run,

    /// Scrape one community or all of them once, printing the result as JSON
    Scrape {
        /// Slug of the community to scrape
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        community: Option<String>,

        /// Scrape every active community
        #[arg(long)]
        all: bool,

        /// Take at most `ingest.single_post_limit` posts per platform
        #[arg(long, conflicts_with = "authentic")]
        single: bool,

        /// Accept N posts per platform, chosen from 3N candidates
        #[arg(long, value_name = "N")]
        authentic: Option<usize>,
    },

    /// Hide stale low-quality posts and trim oversized communities
    Cleanup {
        #[arg(long)]
        older_than_days: Option<u32>,

        #[arg(long)]
        min_quality: Option<f64>,

        #[arg(long)]
        max_per_community: Option<usize>,
    },

    /// Ingestion stats for the last 24 hours, as JSON or an HTML report
    Stats {
        /// Write an HTML report here instead of printing JSON
        #[arg(long)]
        html: Option<PathBuf>,
    },

    /// Upsert communities and platform users declared in config
    Seed,

    /// Show metadata of a source collection, e.g. a subreddit
    SourceInfo {
        url: String,
    },

    /// Fetch the discussion replies of one item
    Replies {
        url: String,

        #[arg(long, default_value_t = 20)]
        max: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::from_path("../.env").ok();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)
        .context(format!("loading config from {}", cli.config.display()))?;
    cfg.validate()?;

    // Apply CLI overrides
    if let Some(p) = &cli.provider {
        cfg.llm.provider = p.parse()?;
    }
    if let Some(m) = cli.model.clone() {
        cfg.llm.model = m;
    }
    init_tracing(&cfg);

    let services = Services::build(&cfg).await?;

    match cli.command {
        Command::Run => run(&cfg, services).await,
        Command::Scrape {
            community,
            all: _,
            single,
            authentic,
        } => {
            let mode = match (single, authentic) {
                (_, Some(n)) => ScrapeMode::Authentic { per_platform: n },
                (true, None) => ScrapeMode::Single,
                (false, None) => ScrapeMode::Bulk,
            };
            scrape(&services, community.as_deref(), mode).await
        }
        Command::Cleanup {
            older_than_days,
            min_quality,
            max_per_community,
        } => {
            let mut opts = cfg.cleanup.clone();
            if let Some(days) = older_than_days {
                opts.older_than_days = days;
            }
            if let Some(q) = min_quality {
                opts.min_quality_score = q;
            }
            if let Some(m) = max_per_community {
                opts.max_posts_per_community = m;
            }
            cleanup(&services, &opts).await
        }
        Command::Stats { html } => stats(&services, html.as_deref()).await,
        Command::Seed => {
            let summary = services.manager.seed(&cfg.communities, &cfg.ingest.platform_users).await?;
            print_json(&summary)
        }
        Command::SourceInfo { url } => {
            let source = source_for(&services.sources, &url)?;
            let info = source.source_info(&url).await?;
            print_json(&info)
        }
        Command::Replies { url, max } => {
            let source = source_for(&services.sources, &url)?;
            let replies = source.replies(&url, max).await?;
            print_json(&replies)
        }
    }
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("community_scout={}", cfg.logging.level)));
    match cfg.logging.format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

/// Everything the commands share, wired once from config.
struct Services {
    manager: Arc<ScraperManager>,
    sources: SourceRegistry,
}

impl Services {
    async fn build(cfg: &Config) -> Result<Self> {
        let store: Arc<dyn Store> = match &cfg.store.path {
            Some(path) => Arc::new(
                MemoryStore::open(path)
                    .await
                    .context(format!("opening store at {}", path.display()))?,
            ),
            None => Arc::new(MemoryStore::new()),
        };

        let http = http::HttpClient::with_timeout(
            &cfg.http.user_agent,
            Duration::from_secs(cfg.http.timeout_secs),
        )?
        .rotating_user_agent(cfg.http.rotate_user_agent);

        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(RedditSource::new(http.clone(), cfg.reddit.clone())))?;
        sources.register(Arc::new(MediumSource::new(http.clone())))?;
        info!(platforms = ?sources.platforms(), "sources registered");

        let comments = if cfg.synthetic.comments.enabled {
            match llm::LlmClient::from_config(&cfg.llm, http.clone())? {
                Some(client) => Some(CommentSynthesizer::new(
                    Arc::new(client),
                    store.clone(),
                    cfg.synthetic.comments.clone(),
                )),
                None => {
                    info!(provider = %cfg.llm.provider, "no llm credentials, comment synthesis disabled");
                    None
                }
            }
        } else {
            None
        };

        let manager = ScraperManager::new(
            store,
            sources.clone(),
            ContentValidator::new(cfg.validation.clone())?,
            ContentProcessor::new(cfg.quality.clone()),
            cfg.ingest.clone(),
        )
        .with_engagement(cfg.synthetic.clone(), comments);

        Ok(Self {
            manager: Arc::new(manager),
            sources,
        })
    }
}

async fn run(cfg: &Config, services: Services) -> Result<()> {
    let seeded = services
        .manager
        .seed(&cfg.communities, &cfg.ingest.platform_users)
        .await?;
    info!(communities = seeded.communities, "starting scheduler");

    let scheduler = Scheduler::new(
        services.manager.clone(),
        Periods::from_config(&cfg.scheduler, &cfg.synthetic.like_boost),
        cfg.cleanup.clone(),
    );
    scheduler.initialize().await?;
    for job in scheduler.active_jobs() {
        info!(handle = %job.handle, kind = %job.kind, period_secs = job.period_secs, "job scheduled");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    info!("scheduler stopped");
    Ok(())
}

async fn scrape(services: &Services, community: Option<&str>, mode: ScrapeMode) -> Result<()> {
    let manager = &services.manager;
    match community {
        Some(slug) => {
            let found = manager
                .store()
                .community_by_slug(slug)
                .await?
                .ok_or_else(|| error::Error::CommunityNotFound(slug.to_string()))?;
            let result = manager.scrape_community_with(found.id, mode).await?;
            print_json(&result)
        }
        None => {
            let summary = manager.scrape_all_communities(mode).await?;
            if summary.failed_scrapes > 0 {
                warn!(failed = summary.failed_scrapes, "some communities failed to scrape");
            }
            print_json(&summary)
        }
    }
}

async fn cleanup(services: &Services, opts: &CleanupOptions) -> Result<()> {
    if !(0.0..=1.0).contains(&opts.min_quality_score) {
        anyhow::bail!("--min-quality must be within [0, 1]");
    }
    let result = services.manager.cleanup_posts(opts).await?;
    print_json(&result)
}

async fn stats(services: &Services, html: Option<&Path>) -> Result<()> {
    let stats = services.manager.ingestion_stats().await?;
    let Some(path) = html else {
        return print_json(&stats);
    };

    let store = services.manager.store();
    let communities = store.communities(false).await?;
    let recent = store.recent_posts(PostStatus::Active, REPORT_RECENT_POSTS).await?;
    let page = output::report::render(&stats, &communities, &recent)?;
    output::report::write_report(path, &page)?;

    info!(path = %path.display(), "report written");
    println!("Report generated: {}", path.display());
    Ok(())
}

fn source_for(registry: &SourceRegistry, url: &str) -> Result<Arc<dyn ContentSource>> {
    let platform = sources::platform_for_locator(url)
        .ok_or_else(|| error::Error::InvalidSource(url.to_string()))?;
    Ok(registry.get(platform)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
