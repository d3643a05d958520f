//! Optional synthetic engagement: seeded likes and generated comments on
//! ingested posts. Everything here is off unless enabled in `[synthetic]`.

use crate::error::{Error, Result};
use crate::ingest::text;
use crate::llm::TextGenerator;
use crate::store::Store;
use crate::types::{Comment, LocalCounter, Post, PostId, PostStatus, User, UserId};
use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

static NUMBERED_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.)]\s*(.+)$").expect("static regex"));

const MAX_PARSED_COMMENTS: usize = 15;
const PROMPT_CONTENT_CHARS: usize = 300;

const SYSTEM_PROMPT: &str = "You generate realistic, diverse comments for posts in business \
communities. Comments should feel authentic and vary in tone, length and perspective.";

pub const FALLBACK_COMMENTS: [&str; 15] = [
    "Thanks for sharing this!",
    "Really interesting perspective.",
    "I've had similar experiences.",
    "Great insights here.",
    "This is really helpful.",
    "Couldn't agree more.",
    "Thanks for the detailed explanation.",
    "This makes a lot of sense.",
    "Appreciate you sharing your thoughts.",
    "Really valuable information.",
    "I learned something new today.",
    "This is exactly what I needed to read.",
    "Well said!",
    "Thanks for the reminder.",
    "This resonates with me.",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub initial_likes: LikePolicy,
    pub comments: CommentPolicy,
    pub like_boost: LikeBoostPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LikePolicy {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
}

impl Default for LikePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 5,
            max: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommentPolicy {
    pub enabled: bool,
    pub min: usize,
    pub max: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for CommentPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            min: 3,
            max: 10,
            batch_size: 5,
            batch_delay_ms: 2000,
        }
    }
}

/// Periodic top-up of likes on the most recent active posts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LikeBoostPolicy {
    pub enabled: bool,
    pub interval_secs: u64,
    pub recent_posts: usize,
}

impl Default for LikeBoostPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 60 * 60,
            recent_posts: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BoostSummary {
    pub posts_seen: usize,
    pub posts_updated: usize,
    pub likes_added: u64,
}

fn random_count(min: usize, max: usize) -> usize {
    if min >= max {
        return min;
    }
    rand::rng().random_range(min..=max)
}

/// Up to `count` distinct users, never `exclude`. The rng is dropped before
/// returning so callers may await afterwards.
fn sample_users(users: &[User], count: usize, exclude: Option<UserId>) -> Vec<UserId> {
    let candidates: Vec<UserId> = users
        .iter()
        .map(|u| u.id)
        .filter(|id| Some(*id) != exclude)
        .collect();
    candidates
        .choose_multiple(&mut rand::rng(), count)
        .copied()
        .collect()
}

/// Insert likes by the given users; duplicates are skipped.
async fn add_likes(store: &dyn Store, post: PostId, users: &[UserId]) -> Result<u64> {
    let created = store.insert_likes(post, users).await?;
    if created < users.len() as u64 {
        debug!(%post, skipped = users.len() as u64 - created, "likes already present");
    }
    Ok(created)
}

/// Seed a freshly ingested post with `min..=max` likes from random users.
pub async fn assign_initial_likes(store: &dyn Store, post: &Post, policy: &LikePolicy) -> Result<u64> {
    let users = store.users().await?;
    if users.is_empty() {
        return Err(Error::NoPlatformUsers);
    }
    let picked = sample_users(&users, random_count(policy.min, policy.max), None);
    let created = add_likes(store, post.id, &picked).await?;
    debug!(post = %post.id, likes = created, "initial likes assigned");
    Ok(created)
}

/// Add another round of random likes to the most recent active posts.
pub async fn boost_recent_likes(
    store: &dyn Store,
    boost: &LikeBoostPolicy,
    likes: &LikePolicy,
) -> Result<BoostSummary> {
    let posts = store.recent_posts(PostStatus::Active, boost.recent_posts).await?;
    let mut summary = BoostSummary {
        posts_seen: posts.len(),
        ..BoostSummary::default()
    };
    if posts.is_empty() {
        info!("no recent posts to boost");
        return Ok(summary);
    }
    let users = store.users().await?;
    if users.is_empty() {
        return Err(Error::NoPlatformUsers);
    }

    for post in &posts {
        let picked = sample_users(&users, random_count(likes.min, likes.max), None);
        match add_likes(store, post.id, &picked).await {
            Ok(0) => {}
            Ok(n) => {
                summary.posts_updated += 1;
                summary.likes_added += n;
            }
            Err(e) => warn!(post = %post.id, error = %e, "like boost failed for post"),
        }
    }
    info!(
        posts = summary.posts_seen,
        updated = summary.posts_updated,
        likes = summary.likes_added,
        "like boost complete"
    );
    Ok(summary)
}

/// Numbered list lines (`1. text` or `1) text`) of plausible length, at most 15.
pub fn parse_comments(generated: &str) -> Vec<String> {
    generated
        .lines()
        .filter_map(|line| NUMBERED_LINE.captures(line.trim()))
        .map(|c| c[1].trim().to_string())
        .filter(|c| (11..500).contains(&c.chars().count()))
        .take(MAX_PARSED_COMMENTS)
        .collect()
}

pub fn fallback_comments(count: usize) -> Vec<String> {
    FALLBACK_COMMENTS
        .choose_multiple(&mut rand::rng(), count)
        .map(|c| c.to_string())
        .collect()
}

fn comment_prompt(post: &Post, count: usize) -> String {
    format!(
        "Generate {count} realistic, diverse comments for this post:\n\n\
         Title: \"{}\"\nContent: \"{}\"\n\n\
         Requirements:\n\
         - Mix of short (5-15 words) and medium (15-40 words) comments\n\
         - Varied perspectives: supportive, questioning, sharing experiences\n\
         - Natural language, no formal tone\n\
         - No promotional content or spam\n\
         - Format as a numbered list (1. Comment text)\n\n\
         Generate {count} comments:",
        post.title,
        text::truncate(&post.content, PROMPT_CONTENT_CHARS),
    )
}

/// Writes generated comments under random users other than the post owner.
pub struct CommentSynthesizer {
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn Store>,
    policy: CommentPolicy,
}

impl CommentSynthesizer {
    pub fn new(generator: Arc<dyn TextGenerator>, store: Arc<dyn Store>, policy: CommentPolicy) -> Self {
        Self {
            generator,
            store,
            policy,
        }
    }

    async fn generate_batch(&self, post: &Post, count: usize) -> Vec<String> {
        match self.generator.generate(SYSTEM_PROMPT, &comment_prompt(post, count)).await {
            Ok(text) => {
                let parsed = parse_comments(&text);
                if parsed.is_empty() {
                    warn!(post = %post.id, "generation returned no usable comments, using fallback");
                    fallback_comments(count)
                } else {
                    parsed.into_iter().take(count).collect()
                }
            }
            Err(e) => {
                warn!(post = %post.id, error = %e, "comment generation failed, using fallback");
                fallback_comments(count)
            }
        }
    }

    /// Generate and store `min..=max` comments. Returns how many were stored.
    pub async fn comment_on(&self, post: &Post) -> Result<usize> {
        let users = self.store.users().await?;
        let target = random_count(self.policy.min, self.policy.max);
        let authors = sample_users(&users, target, Some(post.owner_id));
        if authors.is_empty() {
            warn!(post = %post.id, "no users available to author comments");
            return Ok(0);
        }

        let batch_size = self.policy.batch_size.max(1);
        let delay = Duration::from_millis(self.policy.batch_delay_ms);
        let mut bodies = Vec::with_capacity(authors.len());
        while bodies.len() < authors.len() {
            if !bodies.is_empty() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let want = batch_size.min(authors.len() - bodies.len());
            let batch = self.generate_batch(post, want).await;
            if batch.is_empty() {
                break;
            }
            bodies.extend(batch);
        }

        let mut stored = 0;
        for (author, body) in authors.iter().zip(bodies) {
            let comment = Comment {
                id: Uuid::new_v4(),
                post_id: post.id,
                author_id: *author,
                body,
                generated: true,
                created_at: Utc::now(),
            };
            match self.store.insert_comment(comment).await {
                Ok(()) => stored += 1,
                Err(e) => warn!(post = %post.id, error = %e, "failed to store comment"),
            }
        }
        if stored > 0 {
            self.store
                .increment_local_engagement(post.id, LocalCounter::Comments, stored as u64)
                .await?;
        }
        info!(post = %post.id, comments = stored, "synthetic comments added");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, sample_post};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGenerator {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl TextGenerator for FakeGenerator {
        async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .clone()
                .ok_or_else(|| Error::api("llm", "unavailable"))
        }
    }

    async fn store_with_users(n: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store.ensure_platform_user(&format!("user_{i}")).await.unwrap();
        }
        store
    }

    #[test]
    fn parses_numbered_lines() {
        let text = "Here you go:\n1. This is a thoughtful comment\n2) Another genuine reply here\n3. short\n- 4. not numbered first\n";
        assert_eq!(
            parse_comments(text),
            vec!["This is a thoughtful comment", "Another genuine reply here"]
        );
    }

    #[test]
    fn fallback_is_distinct_and_capped() {
        let picked = fallback_comments(40);
        assert_eq!(picked.len(), FALLBACK_COMMENTS.len());
        let unique: std::collections::HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), picked.len());
    }

    #[tokio::test]
    async fn initial_likes_within_range_and_unique() {
        let store = store_with_users(20).await;
        let post = store.insert_post(sample_post(Uuid::new_v4(), "p1")).await.unwrap();
        let policy = LikePolicy {
            enabled: true,
            min: 5,
            max: 15,
        };
        let created = assign_initial_likes(store.as_ref(), &post, &policy).await.unwrap();
        assert!((5..=15).contains(&created));
        assert_eq!(store.count_likes(post.id).await.unwrap(), created);
        let stored = store.post(post.id).await.unwrap().unwrap();
        assert_eq!(stored.local_engagement.likes, created);
    }

    #[tokio::test]
    async fn boost_skips_existing_likes() {
        let store = store_with_users(3).await;
        let post = store.insert_post(sample_post(Uuid::new_v4(), "p1")).await.unwrap();
        let likes = LikePolicy {
            enabled: true,
            min: 3,
            max: 3,
        };
        let boost = LikeBoostPolicy {
            enabled: true,
            interval_secs: 1,
            recent_posts: 100,
        };
        let first = boost_recent_likes(store.as_ref(), &boost, &likes).await.unwrap();
        assert_eq!((first.posts_seen, first.likes_added), (1, 3));

        // Every user has already liked the only post.
        let second = boost_recent_likes(store.as_ref(), &boost, &likes).await.unwrap();
        assert_eq!((second.posts_updated, second.likes_added), (0, 0));
        assert_eq!(store.count_likes(post.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn likes_need_users() {
        let store = MemoryStore::new();
        let post = store.insert_post(sample_post(Uuid::new_v4(), "p1")).await.unwrap();
        let err = assign_initial_likes(&store, &post, &LikePolicy::default()).await;
        assert!(matches!(err, Err(Error::NoPlatformUsers)));
    }

    #[tokio::test]
    async fn comments_are_batched_and_exclude_owner() {
        let store = store_with_users(12).await;
        let owner = store.ensure_platform_user("owner").await.unwrap();
        let mut post = sample_post(Uuid::new_v4(), "p1");
        post.owner_id = owner.id;
        let post = store.insert_post(post).await.unwrap();

        let reply = (1..=5)
            .map(|i| format!("{i}. Generated comment number {i} here"))
            .collect::<Vec<_>>()
            .join("\n");
        let generator = Arc::new(FakeGenerator {
            reply: Some(reply),
            calls: AtomicUsize::new(0),
        });
        let policy = CommentPolicy {
            enabled: true,
            min: 7,
            max: 7,
            batch_size: 5,
            batch_delay_ms: 0,
        };
        let synth = CommentSynthesizer::new(generator.clone(), store.clone(), policy);

        assert_eq!(synth.comment_on(&post).await.unwrap(), 7);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        let comments = store.comments_for_post(post.id).await.unwrap();
        assert_eq!(comments.len(), 7);
        assert!(comments.iter().all(|c| c.author_id != owner.id && c.generated));
        let stored = store.post(post.id).await.unwrap().unwrap();
        assert_eq!(stored.local_engagement.comments, 7);
    }

    #[tokio::test]
    async fn failed_generation_falls_back() {
        let store = store_with_users(5).await;
        let post = store.insert_post(sample_post(Uuid::new_v4(), "p1")).await.unwrap();
        let generator = Arc::new(FakeGenerator {
            reply: None,
            calls: AtomicUsize::new(0),
        });
        let policy = CommentPolicy {
            enabled: true,
            min: 3,
            max: 3,
            batch_size: 5,
            batch_delay_ms: 0,
        };
        let synth = CommentSynthesizer::new(generator, store.clone(), policy);
        assert_eq!(synth.comment_on(&post).await.unwrap(), 3);
        let comments = store.comments_for_post(post.id).await.unwrap();
        assert!(comments.iter().all(|c| FALLBACK_COMMENTS.contains(&c.body.as_str())));
    }
}
