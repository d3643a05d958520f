//! Persistence contract for communities, posts, users and social records.
//!
//! Uniqueness (community slug, post source url, post platform + original id,
//! one like per user and post) is enforced here, not by callers. A violated
//! constraint comes back as [`Error::Duplicate`](crate::error::Error::Duplicate).

mod memory;

pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use memory::tests::sample_post;

use crate::error::Result;
use crate::types::{
    Comment, Community, CommunityId, LocalCounter, Like, Platform, Post, PostId, PostStatus, User,
    UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    // Communities
    async fn insert_community(&self, community: Community) -> Result<Community>;
    /// Insert by slug, or replace the configuration of the existing community
    /// while keeping its id, counters and scrape timestamp.
    async fn upsert_community(&self, community: Community) -> Result<Community>;
    async fn community(&self, id: CommunityId) -> Result<Option<Community>>;
    async fn community_by_slug(&self, slug: &str) -> Result<Option<Community>>;
    /// Active communities, all of them or only those with an active platform.
    async fn communities(&self, with_active_platform: bool) -> Result<Vec<Community>>;
    /// Set `last_scraped_at` and add `posts_created` to `post_count` in one step.
    async fn record_scrape(
        &self,
        id: CommunityId,
        at: DateTime<Utc>,
        posts_created: u64,
    ) -> Result<()>;

    // Users
    async fn ensure_platform_user(&self, username: &str) -> Result<User>;
    async fn platform_users(&self) -> Result<Vec<User>>;
    async fn users(&self) -> Result<Vec<User>>;

    // Posts
    /// Id of a post that already holds `source_url` or `(platform, original_id)`.
    async fn find_duplicate(
        &self,
        source_url: &str,
        platform: Platform,
        original_id: &str,
    ) -> Result<Option<PostId>>;
    async fn insert_post(&self, post: Post) -> Result<Post>;
    async fn post(&self, id: PostId) -> Result<Option<Post>>;
    async fn posts_for_community(&self, id: CommunityId) -> Result<Vec<Post>>;
    /// Newest first by creation time.
    async fn recent_posts(&self, status: PostStatus, limit: usize) -> Result<Vec<Post>>;
    /// Active posts created before `cutoff` with quality below `min_quality`
    /// become hidden. Returns how many changed.
    async fn hide_stale_posts(&self, cutoff: DateTime<Utc>, min_quality: f64) -> Result<u64>;
    /// Returns how many posts actually changed status.
    async fn set_status(&self, ids: &[PostId], status: PostStatus) -> Result<u64>;
    async fn posts_scraped_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Post>>;
    async fn count_scraped_posts(&self) -> Result<u64>;
    async fn increment_local_engagement(
        &self,
        id: PostId,
        counter: LocalCounter,
        by: u64,
    ) -> Result<()>;

    // Social records
    async fn insert_like(&self, like: Like) -> Result<()>;
    /// Likes on `post` by each of `users` plus the matching local like count,
    /// in one step. Users who already liked the post are skipped. Returns how
    /// many likes were created.
    async fn insert_likes(&self, post: PostId, users: &[UserId]) -> Result<u64>;
    async fn count_likes(&self, post: PostId) -> Result<u64>;
    async fn insert_comment(&self, comment: Comment) -> Result<()>;
    async fn comments_for_post(&self, post: PostId) -> Result<Vec<Comment>>;
}
