use super::Store;
use crate::error::{Error, Result};
use crate::types::{
    Comment, Community, CommunityId, LocalCounter, Like, Platform, Post, PostId, PostStatus, User,
    UserId, UserKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default, Clone, Serialize, Deserialize)]
struct State {
    communities: HashMap<CommunityId, Community>,
    posts: HashMap<PostId, Post>,
    users: HashMap<UserId, User>,
    likes: Vec<Like>,
    comments: Vec<Comment>,
    #[serde(skip)]
    index: Index,
}

/// Unique keys, rebuilt from the tables after loading a snapshot.
#[derive(Default, Clone)]
struct Index {
    slugs: HashMap<String, CommunityId>,
    urls: HashMap<String, PostId>,
    originals: HashMap<(Platform, String), PostId>,
    likes: HashSet<(UserId, PostId)>,
}

impl State {
    fn reindex(&mut self) {
        let mut index = Index::default();
        for c in self.communities.values() {
            index.slugs.insert(c.slug.clone(), c.id);
        }
        for p in self.posts.values() {
            index.urls.insert(p.source_url.clone(), p.id);
            index.originals.insert((p.platform, p.original_id.clone()), p.id);
        }
        for l in &self.likes {
            index.likes.insert((l.user_id, l.post_id));
        }
        self.index = index;
    }

    fn post_mut(&mut self, id: PostId) -> Result<&mut Post> {
        self.posts
            .get_mut(&id)
            .ok_or_else(|| Error::persistence(format!("post {id} not found")))
    }
}

/// In-process store. With a path, every mutation rewrites a JSON snapshot
/// (temp file, then rename) so the data survives restarts.
pub struct MemoryStore {
    state: RwLock<State>,
    path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            path: None,
        }
    }

    /// Load the snapshot at `path` if it exists; later mutations write back to it.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut state = if tokio::fs::try_exists(&path).await? {
            let bytes = tokio::fs::read(&path).await?;
            serde_json::from_slice::<State>(&bytes)
                .map_err(|e| Error::persistence(format!("{}: {e}", path.display())))?
        } else {
            State::default()
        };
        state.reindex();
        info!(
            path = %path.display(),
            communities = state.communities.len(),
            posts = state.posts.len(),
            "opened store"
        );
        Ok(Self {
            state: RwLock::new(state),
            path: Some(path),
        })
    }

    /// Apply `change` to a copy of the state and swap it in only after the
    /// snapshot is on disk. A failed change or write leaves memory untouched.
    async fn apply<T>(&self, change: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.write().await;
        let Some(path) = &self.path else {
            return change(&mut *state);
        };
        let mut candidate = state.clone();
        let out = change(&mut candidate)?;
        write_snapshot(path, &candidate).await?;
        *state = candidate;
        Ok(out)
    }
}

async fn write_snapshot(path: &Path, state: &State) -> Result<()> {
    let encoded = serde_json::to_vec(state)?;
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, &encoded).await?;
    tokio::fs::rename(&temp, path).await?;
    debug!(path = %path.display(), bytes = encoded.len(), "snapshot written");
    Ok(())
}

fn newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn insert_community(state: &mut State, community: Community) -> Community {
    state.index.slugs.insert(community.slug.clone(), community.id);
    state.communities.insert(community.id, community.clone());
    community
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_community(&self, community: Community) -> Result<Community> {
        self.apply(|state| {
            if state.index.slugs.contains_key(&community.slug) {
                return Err(Error::Duplicate(format!("community slug '{}'", community.slug)));
            }
            Ok(insert_community(state, community))
        })
        .await
    }

    async fn upsert_community(&self, community: Community) -> Result<Community> {
        self.apply(|state| {
            let Some(id) = state.index.slugs.get(&community.slug).copied() else {
                return Ok(insert_community(state, community));
            };
            let current = state
                .communities
                .get_mut(&id)
                .ok_or_else(|| Error::persistence(format!("slug index points at missing {id}")))?;
            current.name = community.name;
            current.description = community.description;
            current.category = community.category;
            current.platforms = community.platforms;
            current.settings = community.settings;
            current.member_count = community.member_count;
            current.active = community.active;
            Ok(current.clone())
        })
        .await
    }

    async fn community(&self, id: CommunityId) -> Result<Option<Community>> {
        Ok(self.state.read().await.communities.get(&id).cloned())
    }

    async fn community_by_slug(&self, slug: &str) -> Result<Option<Community>> {
        let state = self.state.read().await;
        Ok(state
            .index
            .slugs
            .get(slug)
            .and_then(|id| state.communities.get(id))
            .cloned())
    }

    async fn communities(&self, with_active_platform: bool) -> Result<Vec<Community>> {
        let state = self.state.read().await;
        let mut out: Vec<Community> = state
            .communities
            .values()
            .filter(|c| c.active && (!with_active_platform || c.has_active_platform()))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.slug.cmp(&b.slug)));
        Ok(out)
    }

    async fn record_scrape(
        &self,
        id: CommunityId,
        at: DateTime<Utc>,
        posts_created: u64,
    ) -> Result<()> {
        self.apply(|state| {
            let community = state
                .communities
                .get_mut(&id)
                .ok_or_else(|| Error::CommunityNotFound(id.to_string()))?;
            community.last_scraped_at = Some(at);
            community.post_count += posts_created;
            Ok(())
        })
        .await
    }

    async fn ensure_platform_user(&self, username: &str) -> Result<User> {
        let find = |state: &State| state.users.values().find(|u| u.username == username).cloned();
        if let Some(user) = find(&*self.state.read().await) {
            return Ok(user);
        }
        self.apply(|state| {
            if let Some(user) = find(state) {
                return Ok(user);
            }
            let user = User {
                id: Uuid::new_v4(),
                username: username.to_string(),
                kind: UserKind::Platform,
                created_at: Utc::now(),
            };
            state.users.insert(user.id, user.clone());
            Ok(user)
        })
        .await
    }

    async fn platform_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .filter(|u| u.kind == UserKind::Platform)
            .cloned()
            .collect())
    }

    async fn users(&self) -> Result<Vec<User>> {
        Ok(self.state.read().await.users.values().cloned().collect())
    }

    async fn find_duplicate(
        &self,
        source_url: &str,
        platform: Platform,
        original_id: &str,
    ) -> Result<Option<PostId>> {
        let state = self.state.read().await;
        Ok(state.index.urls.get(source_url).copied().or_else(|| {
            state
                .index
                .originals
                .get(&(platform, original_id.to_string()))
                .copied()
        }))
    }

    async fn insert_post(&self, post: Post) -> Result<Post> {
        self.apply(|state| {
            if state.index.urls.contains_key(&post.source_url) {
                return Err(Error::Duplicate(format!("post source url {}", post.source_url)));
            }
            let original = (post.platform, post.original_id.clone());
            if state.index.originals.contains_key(&original) {
                return Err(Error::Duplicate(format!(
                    "{} post {}",
                    post.platform, post.original_id
                )));
            }
            state.index.urls.insert(post.source_url.clone(), post.id);
            state.index.originals.insert(original, post.id);
            state.posts.insert(post.id, post.clone());
            Ok(post)
        })
        .await
    }

    async fn post(&self, id: PostId) -> Result<Option<Post>> {
        Ok(self.state.read().await.posts.get(&id).cloned())
    }

    async fn posts_for_community(&self, id: CommunityId) -> Result<Vec<Post>> {
        let state = self.state.read().await;
        let mut out: Vec<Post> = state
            .posts
            .values()
            .filter(|p| p.community_id == id)
            .cloned()
            .collect();
        newest_first(&mut out);
        Ok(out)
    }

    async fn recent_posts(&self, status: PostStatus, limit: usize) -> Result<Vec<Post>> {
        let state = self.state.read().await;
        let mut out: Vec<Post> = state
            .posts
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        newest_first(&mut out);
        out.truncate(limit);
        Ok(out)
    }

    async fn hide_stale_posts(&self, cutoff: DateTime<Utc>, min_quality: f64) -> Result<u64> {
        let stale: Vec<PostId> = self
            .state
            .read()
            .await
            .posts
            .values()
            .filter(|p| {
                p.status == PostStatus::Active
                    && p.created_at < cutoff
                    && p.metadata.quality_score < min_quality
            })
            .map(|p| p.id)
            .collect();
        self.set_status(&stale, PostStatus::Hidden).await
    }

    async fn set_status(&self, ids: &[PostId], status: PostStatus) -> Result<u64> {
        let pending = {
            let state = self.state.read().await;
            ids.iter()
                .any(|id| state.posts.get(id).is_some_and(|p| p.status != status))
        };
        if !pending {
            return Ok(0);
        }
        self.apply(|state| {
            let now = Utc::now();
            let mut changed = 0;
            for id in ids {
                if let Some(post) = state.posts.get_mut(id)
                    && post.status != status
                {
                    post.status = status;
                    post.updated_at = now;
                    changed += 1;
                }
            }
            Ok(changed)
        })
        .await
    }

    async fn posts_scraped_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Post>> {
        let state = self.state.read().await;
        Ok(state
            .posts
            .values()
            .filter(|p| p.metadata.scraped_at >= cutoff)
            .cloned()
            .collect())
    }

    async fn count_scraped_posts(&self) -> Result<u64> {
        Ok(self.state.read().await.posts.len() as u64)
    }

    async fn increment_local_engagement(
        &self,
        id: PostId,
        counter: LocalCounter,
        by: u64,
    ) -> Result<()> {
        self.apply(|state| {
            let post = state.post_mut(id)?;
            let field = match counter {
                LocalCounter::Likes => &mut post.local_engagement.likes,
                LocalCounter::Comments => &mut post.local_engagement.comments,
                LocalCounter::Bookmarks => &mut post.local_engagement.bookmarks,
            };
            *field += by;
            post.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn insert_like(&self, like: Like) -> Result<()> {
        self.apply(|state| {
            state.post_mut(like.post_id)?;
            if !state.index.likes.insert((like.user_id, like.post_id)) {
                return Err(Error::Duplicate(format!(
                    "like by {} on post {}",
                    like.user_id, like.post_id
                )));
            }
            state.likes.push(like);
            Ok(())
        })
        .await
    }

    async fn insert_likes(&self, post: PostId, users: &[UserId]) -> Result<u64> {
        self.apply(|state| {
            state.post_mut(post)?;
            let now = Utc::now();
            let mut created = 0;
            for user in users {
                if !state.index.likes.insert((*user, post)) {
                    continue;
                }
                state.likes.push(Like {
                    user_id: *user,
                    post_id: post,
                    created_at: now,
                });
                created += 1;
            }
            if created > 0 {
                let target = state.post_mut(post)?;
                target.local_engagement.likes += created;
                target.updated_at = now;
            }
            Ok(created)
        })
        .await
    }

    async fn count_likes(&self, post: PostId) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.likes.iter().filter(|l| l.post_id == post).count() as u64)
    }

    async fn insert_comment(&self, comment: Comment) -> Result<()> {
        self.apply(|state| {
            state.post_mut(comment.post_id)?;
            state.comments.push(comment);
            Ok(())
        })
        .await
    }

    async fn comments_for_post(&self, post: PostId) -> Result<Vec<Comment>> {
        let state = self.state.read().await;
        Ok(state
            .comments
            .iter()
            .filter(|c| c.post_id == post)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{
        Category, ContentType, EngagementMetrics, LocalEngagement, ScrapingMetadata,
    };
    use chrono::Duration;

    pub(crate) fn sample_post(community: CommunityId, original_id: &str) -> Post {
        let now = Utc::now();
        Post {
            id: Uuid::new_v4(),
            title: format!("Post {original_id}"),
            content: "Body text long enough to be a real post.".into(),
            source_url: format!("https://www.reddit.com/r/test/comments/{original_id}/"),
            platform: Platform::Reddit,
            original_id: original_id.into(),
            community_id: community,
            owner_id: Uuid::new_v4(),
            engagement: EngagementMetrics::default(),
            metadata: ScrapingMetadata {
                scraped_at: now,
                original_author: "someone".into(),
                original_created_at: None,
                quality_score: 0.8,
                authenticity_score: Some(1.0),
                tags: Vec::new(),
                content_type: ContentType::General,
                is_authentic: true,
                validation_method: "real_api_scraping".into(),
                content_fingerprint: None,
            },
            status: PostStatus::Active,
            thumbnail: None,
            media_urls: Vec::new(),
            local_engagement: LocalEngagement::default(),
            is_promoted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn community(name: &str) -> Community {
        Community::new(name, "test community", Category::Startups)
    }

    #[tokio::test]
    async fn slug_is_unique() {
        let store = MemoryStore::new();
        store.insert_community(community("Startups")).await.unwrap();
        let err = store.insert_community(community("startups")).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }

    #[tokio::test]
    async fn upsert_keeps_identity_and_counters() {
        let store = MemoryStore::new();
        let first = store.upsert_community(community("Sales")).await.unwrap();
        store.record_scrape(first.id, Utc::now(), 4).await.unwrap();

        let mut again = community("Sales");
        again.description = "updated".into();
        let second = store.upsert_community(again).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.post_count, 4);
        assert_eq!(second.description, "updated");
        assert!(second.last_scraped_at.is_some());
    }

    #[tokio::test]
    async fn post_dedup_keys() {
        let store = MemoryStore::new();
        let c = store.insert_community(community("SaaS")).await.unwrap();
        let post = store.insert_post(sample_post(c.id, "a1")).await.unwrap();

        let found = store
            .find_duplicate(&post.source_url, Platform::Reddit, "other")
            .await
            .unwrap();
        assert_eq!(found, Some(post.id));
        let found = store
            .find_duplicate("https://elsewhere", Platform::Reddit, "a1")
            .await
            .unwrap();
        assert_eq!(found, Some(post.id));
        assert!(store
            .find_duplicate("https://elsewhere", Platform::Medium, "a1")
            .await
            .unwrap()
            .is_none());

        let mut same_original = sample_post(c.id, "a1");
        same_original.source_url = "https://elsewhere".into();
        assert!(matches!(
            store.insert_post(same_original).await,
            Err(Error::Duplicate(_))
        ));
        assert!(matches!(
            store.insert_post(sample_post(c.id, "a1")).await,
            Err(Error::Duplicate(_))
        ));
        assert_eq!(store.count_scraped_posts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_posts_are_hidden_once() {
        let store = MemoryStore::new();
        let c = store.insert_community(community("Marketing")).await.unwrap();
        let mut old_low = sample_post(c.id, "old-low");
        old_low.created_at = Utc::now() - Duration::days(40);
        old_low.metadata.quality_score = 0.2;
        let mut old_good = sample_post(c.id, "old-good");
        old_good.created_at = Utc::now() - Duration::days(40);
        let fresh_low = {
            let mut p = sample_post(c.id, "fresh-low");
            p.metadata.quality_score = 0.1;
            p
        };
        for p in [old_low.clone(), old_good, fresh_low] {
            store.insert_post(p).await.unwrap();
        }

        let cutoff = Utc::now() - Duration::days(30);
        assert_eq!(store.hide_stale_posts(cutoff, 0.3).await.unwrap(), 1);
        assert_eq!(store.hide_stale_posts(cutoff, 0.3).await.unwrap(), 0);
        let hidden = store.post(old_low.id).await.unwrap().unwrap();
        assert_eq!(hidden.status, PostStatus::Hidden);
    }

    #[tokio::test]
    async fn likes_are_unique_per_user() {
        let store = MemoryStore::new();
        let c = store.insert_community(community("Finance")).await.unwrap();
        let post = store.insert_post(sample_post(c.id, "p")).await.unwrap();
        let user = store.ensure_platform_user("curator").await.unwrap();
        let like = Like {
            user_id: user.id,
            post_id: post.id,
            created_at: Utc::now(),
        };
        store.insert_like(like.clone()).await.unwrap();
        assert!(matches!(store.insert_like(like).await, Err(Error::Duplicate(_))));
        assert_eq!(store.count_likes(post.id).await.unwrap(), 1);

        store
            .increment_local_engagement(post.id, LocalCounter::Likes, 1)
            .await
            .unwrap();
        let post = store.post(post.id).await.unwrap().unwrap();
        assert_eq!(post.local_engagement.likes, 1);
    }

    #[tokio::test]
    async fn batched_likes_skip_existing_and_count_once() {
        let store = MemoryStore::new();
        let c = store.insert_community(community("Sales")).await.unwrap();
        let post = store.insert_post(sample_post(c.id, "p")).await.unwrap();
        let a = store.ensure_platform_user("alice").await.unwrap().id;
        let b = store.ensure_platform_user("bob").await.unwrap().id;

        assert_eq!(store.insert_likes(post.id, &[a]).await.unwrap(), 1);
        assert_eq!(store.insert_likes(post.id, &[a, b, b]).await.unwrap(), 1);
        assert_eq!(store.count_likes(post.id).await.unwrap(), 2);
        let stored = store.post(post.id).await.unwrap().unwrap();
        assert_eq!(stored.local_engagement.likes, 2);

        let missing = store.insert_likes(Uuid::new_v4(), &[a]).await;
        assert!(matches!(missing, Err(Error::Persistence(_))));
    }

    #[tokio::test]
    async fn opening_creates_the_snapshot_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("store.json");

        let store = MemoryStore::open(&path).await.unwrap();
        store.insert_community(community("Startups")).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn failed_snapshot_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let path = data.join("store.json");
        let store = MemoryStore::open(&path).await.unwrap();
        let c = store.insert_community(community("Startups")).await.unwrap();

        std::fs::remove_dir_all(&data).unwrap();
        assert!(matches!(
            store.insert_post(sample_post(c.id, "lost")).await,
            Err(Error::Io(_))
        ));
        assert!(store.insert_community(community("Sales")).await.is_err());
        assert_eq!(store.count_scraped_posts().await.unwrap(), 0);
        assert!(store.community_by_slug("sales").await.unwrap().is_none());
        assert!(store
            .find_duplicate("https://www.reddit.com/r/test/comments/lost/", Platform::Reddit, "lost")
            .await
            .unwrap()
            .is_none());

        std::fs::create_dir_all(&data).unwrap();
        store.insert_post(sample_post(c.id, "lost")).await.unwrap();
        assert_eq!(store.count_scraped_posts().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn platform_users_are_idempotent() {
        let store = MemoryStore::new();
        let a = store.ensure_platform_user("curator").await.unwrap();
        let b = store.ensure_platform_user("curator").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.platform_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = MemoryStore::open(&path).await.unwrap();
        let c = store.insert_community(community("E-Commerce")).await.unwrap();
        let post = store.insert_post(sample_post(c.id, "keep")).await.unwrap();
        drop(store);

        let reopened = MemoryStore::open(&path).await.unwrap();
        let loaded = reopened.community_by_slug("e-commerce").await.unwrap().unwrap();
        assert_eq!(loaded.id, c.id);
        assert_eq!(
            reopened
                .find_duplicate(&post.source_url, Platform::Reddit, "keep")
                .await
                .unwrap(),
            Some(post.id)
        );
        assert!(!path.with_extension("tmp").exists());
    }
}
