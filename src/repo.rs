use async_trait::async_trait;

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("topic does not accept replies")] Locked,
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait BranchRepo: Send + Sync {
    async fn list_branches(&self) -> RepoResult<Vec<Branch>>;
    async fn get_branch(&self, id: Id) -> RepoResult<Branch>;
    async fn create_branch(&self, new: NewBranch) -> RepoResult<Branch>;
}

#[async_trait]
pub trait TopicRepo: Send + Sync {
    async fn list_topics(&self, branch_id: Id) -> RepoResult<Vec<Topic>>;
    async fn get_topic(&self, id: Id) -> RepoResult<Topic>;
    /// Creates the topic together with its first post.
    async fn create_topic(&self, new: NewTopic, author: &Author) -> RepoResult<(Topic, Post)>;
    async fn set_closed(&self, id: Id, closed: bool) -> RepoResult<Topic>;
    async fn subscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()>;
    async fn unsubscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()>;
    async fn subscribers(&self, topic_id: Id) -> RepoResult<Vec<Id>>;
}

/// Read side of a topic's post sequence.
///
/// Both listings sort by [`Post::sequence_cmp`].
#[async_trait]
pub trait PostReader: Send + Sync {
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn ordered_post_ids(&self, topic_id: Id) -> RepoResult<Vec<Id>>;
    async fn list_posts(&self, topic_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>>;
    async fn count_posts(&self, topic_id: Id) -> RepoResult<usize>;
}

#[async_trait]
pub trait PostWriter: Send + Sync {
    /// Appends a reply. The topic's reply gate is checked atomically with the
    /// insert and fails with [`RepoError::Locked`]; see [`Topic::accepts_reply`].
    async fn reply_to_topic(&self, new: NewPost, author: &Author, override_closed: bool) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, body: String) -> RepoResult<Post>;
    /// Removes a post; removing the last post of a topic removes the topic as well.
    async fn delete_post(&self, id: Id) -> RepoResult<PostDeletion>;
}

/// Per user read position inside a topic.
///
/// A mark always names a live post of its topic: deleting the marked post moves
/// the mark to the post before it, or drops it when there is none.
#[async_trait]
pub trait ReadMarkRepo: Send + Sync {
    async fn last_read(&self, topic_id: Id, user_id: Id) -> RepoResult<Option<Id>>;
    /// Moves the mark forward to `post_id`. A post that sorts before the
    /// current mark leaves it unchanged.
    async fn mark_read(&self, topic_id: Id, user_id: Id, post_id: Id) -> RepoResult<()>;
}

pub trait Repo: BranchRepo + TopicRepo + PostReader + PostWriter + ReadMarkRepo {}

impl<T> Repo for T where T: BranchRepo + TopicRepo + PostReader + PostWriter + ReadMarkRepo {}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeSet, HashMap};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
    use tracing::{info, warn};

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        branches: HashMap<Id, Branch>,
        topics: HashMap<Id, Topic>,
        posts: HashMap<Id, Post>,
        subscriptions: HashMap<Id, BTreeSet<Id>>, // topic id -> user ids
        #[serde(default)]
        reads: HashMap<Id, HashMap<Id, Id>>, // topic id -> user id -> post id
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        fn topic_posts(&self, topic_id: Id) -> Vec<&Post> {
            let mut v: Vec<_> = self.posts.values().filter(|p| p.topic_id == topic_id).collect();
            v.sort_by(|a, b| a.sequence_cmp(b));
            v
        }

        /// Points marks on `removed` at the post preceding it in the topic.
        fn retarget_marks(&mut self, removed: &Post) {
            let previous = self
                .topic_posts(removed.topic_id)
                .into_iter()
                .filter(|p| p.sequence_cmp(removed).is_lt())
                .last()
                .map(|p| p.id);
            if let Some(marks) = self.reads.get_mut(&removed.topic_id) {
                match previous {
                    Some(prev) => marks.values_mut().filter(|m| **m == removed.id).for_each(|m| *m = prev),
                    None => marks.retain(|_, m| *m != removed.id),
                }
            }
        }
    }

    /// Process-local store, optionally snapshotted to a JSON file after each write.
    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        /// Snapshot lives in `$COMMUNE_DATA_DIR/state.json` (default `data/`).
        pub fn new() -> Self {
            let dir = std::env::var("COMMUNE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"));
            Self::with_snapshot(dir.join("state.json"))
        }

        pub fn with_snapshot(path: PathBuf) -> Self {
            let state = Self::load_state_from(&path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        /// Never touches the filesystem.
        pub fn ephemeral() -> Self {
            Self { state: Arc::new(RwLock::new(State::default())), snapshot_path: None }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        warn!(path = %path.display(), "unreadable snapshot, starting empty: {e}");
                        State::default()
                    }
                },
                Err(e) => {
                    info!(path = %path.display(), "no snapshot, starting empty: {e}");
                    State::default()
                }
            }
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        // Called with the write guard held so snapshots land in write order.
        fn persist(&self, state: &State) -> RepoResult<()> {
            let Some(path) = self.snapshot_path.as_deref() else { return Ok(()) };
            let bytes = serde_json::to_vec_pretty(state)
                .map_err(|e| RepoError::Internal(e.to_string()))?;
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path, bytes) {
                warn!(path = %path.display(), "failed to write snapshot: {e}");
            }
            Ok(())
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self { Self::new() }
    }

    #[async_trait]
    impl BranchRepo for InMemRepo {
        async fn list_branches(&self) -> RepoResult<Vec<Branch>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.branches.values().cloned().collect();
            v.sort_by_key(|b| b.id);
            Ok(v)
        }
        async fn get_branch(&self, id: Id) -> RepoResult<Branch> {
            self.read()?.branches.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_branch(&self, new: NewBranch) -> RepoResult<Branch> {
            let mut s = self.write()?;
            if s.branches.values().any(|b| b.name == new.name) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let branch = Branch { id, name: new.name, description: new.description, created_at: Utc::now() };
            s.branches.insert(id, branch.clone());
            self.persist(&s)?;
            Ok(branch)
        }
    }

    #[async_trait]
    impl TopicRepo for InMemRepo {
        async fn list_topics(&self, branch_id: Id) -> RepoResult<Vec<Topic>> {
            let s = self.read()?;
            if !s.branches.contains_key(&branch_id) { return Err(RepoError::NotFound); }
            let mut v: Vec<_> = s.topics.values().filter(|t| t.branch_id == branch_id).cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))); // newest first
            Ok(v)
        }
        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            self.read()?.topics.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn create_topic(&self, new: NewTopic, author: &Author) -> RepoResult<(Topic, Post)> {
            let mut s = self.write()?;
            if !s.branches.contains_key(&new.branch_id) { return Err(RepoError::NotFound); }
            let now = Utc::now();
            let topic = Topic {
                id: s.next_id(),
                branch_id: new.branch_id,
                title: new.title,
                closed: false,
                code_review: new.code_review,
                created_at: now,
            };
            let post = Post {
                id: s.next_id(),
                topic_id: topic.id,
                author_id: author.id,
                author_name: author.name.clone(),
                body: new.body,
                created_at: now,
                updated_at: None,
            };
            s.topics.insert(topic.id, topic.clone());
            s.posts.insert(post.id, post.clone());
            self.persist(&s)?;
            Ok((topic, post))
        }
        async fn set_closed(&self, id: Id, closed: bool) -> RepoResult<Topic> {
            let mut s = self.write()?;
            let topic = s.topics.get_mut(&id).ok_or(RepoError::NotFound)?;
            topic.closed = closed;
            let updated = topic.clone();
            self.persist(&s)?;
            Ok(updated)
        }
        async fn subscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            s.subscriptions.entry(topic_id).or_default().insert(user_id);
            self.persist(&s)
        }
        async fn unsubscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            if let Some(set) = s.subscriptions.get_mut(&topic_id) { set.remove(&user_id); }
            self.persist(&s)
        }
        async fn subscribers(&self, topic_id: Id) -> RepoResult<Vec<Id>> {
            let s = self.read()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            Ok(s.subscriptions.get(&topic_id).map(|set| set.iter().copied().collect()).unwrap_or_default())
        }
    }

    #[async_trait]
    impl PostReader for InMemRepo {
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            self.read()?.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }
        async fn ordered_post_ids(&self, topic_id: Id) -> RepoResult<Vec<Id>> {
            let s = self.read()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            Ok(s.topic_posts(topic_id).into_iter().map(|p| p.id).collect())
        }
        async fn list_posts(&self, topic_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            let s = self.read()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            Ok(s.topic_posts(topic_id).into_iter().skip(offset).take(limit).cloned().collect())
        }
        async fn count_posts(&self, topic_id: Id) -> RepoResult<usize> {
            let s = self.read()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            Ok(s.posts.values().filter(|p| p.topic_id == topic_id).count())
        }
    }

    #[async_trait]
    impl PostWriter for InMemRepo {
        async fn reply_to_topic(&self, new: NewPost, author: &Author, override_closed: bool) -> RepoResult<Post> {
            let mut s = self.write()?;
            let topic = s.topics.get(&new.topic_id).ok_or(RepoError::NotFound)?;
            if !topic.accepts_reply(override_closed) { return Err(RepoError::Locked); }
            let post = Post {
                id: s.next_id(),
                topic_id: new.topic_id,
                author_id: author.id,
                author_name: author.name.clone(),
                body: new.body,
                created_at: Utc::now(),
                updated_at: None,
            };
            s.posts.insert(post.id, post.clone());
            self.persist(&s)?;
            Ok(post)
        }
        async fn update_post(&self, id: Id, body: String) -> RepoResult<Post> {
            let mut s = self.write()?;
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.body = body;
            post.updated_at = Some(Utc::now());
            let updated = post.clone();
            self.persist(&s)?;
            Ok(updated)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<PostDeletion> {
            let mut s = self.write()?;
            let post = s.posts.remove(&id).ok_or(RepoError::NotFound)?;
            let topic_id = post.topic_id;
            let outcome = if s.posts.values().any(|p| p.topic_id == topic_id) {
                s.retarget_marks(&post);
                PostDeletion::PostRemoved { topic_id }
            } else {
                let topic = s.topics.remove(&topic_id).ok_or(RepoError::NotFound)?;
                s.subscriptions.remove(&topic_id);
                s.reads.remove(&topic_id);
                PostDeletion::TopicRemoved { topic_id, branch_id: topic.branch_id }
            };
            self.persist(&s)?;
            Ok(outcome)
        }
    }

    #[async_trait]
    impl ReadMarkRepo for InMemRepo {
        async fn last_read(&self, topic_id: Id, user_id: Id) -> RepoResult<Option<Id>> {
            let s = self.read()?;
            if !s.topics.contains_key(&topic_id) { return Err(RepoError::NotFound); }
            Ok(s.reads.get(&topic_id).and_then(|m| m.get(&user_id)).copied())
        }
        async fn mark_read(&self, topic_id: Id, user_id: Id, post_id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            let post = s.posts.get(&post_id).filter(|p| p.topic_id == topic_id).ok_or(RepoError::NotFound)?;
            let current = s.reads.get(&topic_id).and_then(|m| m.get(&user_id)).and_then(|id| s.posts.get(id));
            if current.is_some_and(|c| post.sequence_cmp(c).is_le()) {
                return Ok(());
            }
            s.reads.entry(topic_id).or_default().insert(user_id, post_id);
            self.persist(&s)
        }
    }
}

#[cfg(feature = "postgres-store")]
impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
            other => RepoError::Internal(other.to_string()),
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres};

    const POST_COLUMNS: &str = "id, topic_id, author_id, author_name, body, created_at, updated_at";
    const TOPIC_COLUMNS: &str = "id, branch_id, title, closed, code_review, created_at";

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }

        async fn ensure_topic(&self, topic_id: Id) -> RepoResult<()> {
            sqlx::query_scalar::<_, Id>("SELECT id FROM topics WHERE id = $1")
                .bind(topic_id)
                .fetch_one(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl BranchRepo for PgRepo {
        async fn list_branches(&self) -> RepoResult<Vec<Branch>> {
            Ok(sqlx::query_as::<_, Branch>("SELECT id, name, description, created_at FROM branches ORDER BY id")
                .fetch_all(&self.pool).await?)
        }
        async fn get_branch(&self, id: Id) -> RepoResult<Branch> {
            Ok(sqlx::query_as::<_, Branch>("SELECT id, name, description, created_at FROM branches WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool).await?)
        }
        async fn create_branch(&self, new: NewBranch) -> RepoResult<Branch> {
            Ok(sqlx::query_as::<_, Branch>(
                "INSERT INTO branches (name, description) VALUES ($1, $2) RETURNING id, name, description, created_at",
            )
            .bind(&new.name)
            .bind(&new.description)
            .fetch_one(&self.pool).await?)
        }
    }

    #[async_trait]
    impl TopicRepo for PgRepo {
        async fn list_topics(&self, branch_id: Id) -> RepoResult<Vec<Topic>> {
            self.get_branch(branch_id).await?;
            let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE branch_id = $1 ORDER BY created_at DESC, id DESC");
            Ok(sqlx::query_as::<_, Topic>(&sql).bind(branch_id).fetch_all(&self.pool).await?)
        }
        async fn get_topic(&self, id: Id) -> RepoResult<Topic> {
            let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = $1");
            Ok(sqlx::query_as::<_, Topic>(&sql).bind(id).fetch_one(&self.pool).await?)
        }
        async fn create_topic(&self, new: NewTopic, author: &Author) -> RepoResult<(Topic, Post)> {
            let mut tx = self.pool.begin().await?;
            let sql = format!(
                "INSERT INTO topics (branch_id, title, code_review) VALUES ($1, $2, $3) RETURNING {TOPIC_COLUMNS}"
            );
            let topic = sqlx::query_as::<_, Topic>(&sql)
                .bind(new.branch_id)
                .bind(&new.title)
                .bind(new.code_review)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match e {
                    // missing branch surfaces as a foreign key violation
                    sqlx::Error::Database(ref db) if db.is_foreign_key_violation() => RepoError::NotFound,
                    other => other.into(),
                })?;
            let sql = format!(
                "INSERT INTO posts (topic_id, author_id, author_name, body, created_at) VALUES ($1, $2, $3, $4, $5) RETURNING {POST_COLUMNS}"
            );
            let post = sqlx::query_as::<_, Post>(&sql)
                .bind(topic.id)
                .bind(author.id)
                .bind(&author.name)
                .bind(&new.body)
                .bind(topic.created_at)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok((topic, post))
        }
        async fn set_closed(&self, id: Id, closed: bool) -> RepoResult<Topic> {
            let sql = format!("UPDATE topics SET closed = $2 WHERE id = $1 RETURNING {TOPIC_COLUMNS}");
            Ok(sqlx::query_as::<_, Topic>(&sql).bind(id).bind(closed).fetch_one(&self.pool).await?)
        }
        async fn subscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()> {
            self.ensure_topic(topic_id).await?;
            sqlx::query("INSERT INTO topic_subscriptions (topic_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
                .bind(topic_id)
                .bind(user_id)
                .execute(&self.pool).await?;
            Ok(())
        }
        async fn unsubscribe(&self, topic_id: Id, user_id: Id) -> RepoResult<()> {
            self.ensure_topic(topic_id).await?;
            sqlx::query("DELETE FROM topic_subscriptions WHERE topic_id = $1 AND user_id = $2")
                .bind(topic_id)
                .bind(user_id)
                .execute(&self.pool).await?;
            Ok(())
        }
        async fn subscribers(&self, topic_id: Id) -> RepoResult<Vec<Id>> {
            self.ensure_topic(topic_id).await?;
            Ok(sqlx::query_scalar::<_, Id>("SELECT user_id FROM topic_subscriptions WHERE topic_id = $1 ORDER BY user_id")
                .bind(topic_id)
                .fetch_all(&self.pool).await?)
        }
    }

    #[async_trait]
    impl PostReader for PgRepo {
        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1");
            Ok(sqlx::query_as::<_, Post>(&sql).bind(id).fetch_one(&self.pool).await?)
        }
        async fn ordered_post_ids(&self, topic_id: Id) -> RepoResult<Vec<Id>> {
            self.ensure_topic(topic_id).await?;
            Ok(sqlx::query_scalar::<_, Id>("SELECT id FROM posts WHERE topic_id = $1 ORDER BY created_at ASC, id ASC")
                .bind(topic_id)
                .fetch_all(&self.pool).await?)
        }
        async fn list_posts(&self, topic_id: Id, offset: usize, limit: usize) -> RepoResult<Vec<Post>> {
            self.ensure_topic(topic_id).await?;
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts WHERE topic_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3"
            );
            Ok(sqlx::query_as::<_, Post>(&sql)
                .bind(topic_id)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .bind(i64::try_from(offset).unwrap_or(i64::MAX))
                .fetch_all(&self.pool).await?)
        }
        async fn count_posts(&self, topic_id: Id) -> RepoResult<usize> {
            self.ensure_topic(topic_id).await?;
            let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE topic_id = $1")
                .bind(topic_id)
                .fetch_one(&self.pool).await?;
            Ok(n as usize)
        }
    }

    #[async_trait]
    impl PostWriter for PgRepo {
        async fn reply_to_topic(&self, new: NewPost, author: &Author, override_closed: bool) -> RepoResult<Post> {
            // gate and insert in one statement so a concurrent close is honoured
            let sql = format!(
                "INSERT INTO posts (topic_id, author_id, author_name, body) \
                 SELECT id, $2, $3, $4 FROM topics \
                 WHERE id = $1 AND NOT code_review AND (NOT closed OR $5) \
                 RETURNING {POST_COLUMNS}"
            );
            let inserted = sqlx::query_as::<_, Post>(&sql)
                .bind(new.topic_id)
                .bind(author.id)
                .bind(&author.name)
                .bind(&new.body)
                .bind(override_closed)
                .fetch_optional(&self.pool).await?;
            match inserted {
                Some(post) => Ok(post),
                None => {
                    self.ensure_topic(new.topic_id).await?;
                    Err(RepoError::Locked)
                }
            }
        }
        async fn update_post(&self, id: Id, body: String) -> RepoResult<Post> {
            let sql = format!("UPDATE posts SET body = $2, updated_at = now() WHERE id = $1 RETURNING {POST_COLUMNS}");
            Ok(sqlx::query_as::<_, Post>(&sql).bind(id).bind(&body).fetch_one(&self.pool).await?)
        }
        async fn delete_post(&self, id: Id) -> RepoResult<PostDeletion> {
            let mut tx = self.pool.begin().await?;
            let previous = sqlx::query_scalar::<_, Id>(
                "SELECT p.id FROM posts p JOIN posts d ON d.id = $1 \
                 WHERE p.topic_id = d.topic_id AND (p.created_at, p.id) < (d.created_at, d.id) \
                 ORDER BY p.created_at DESC, p.id DESC LIMIT 1",
            )
            .bind(id)
            .fetch_optional(&mut *tx).await?;
            // marks on the deleted post fall back to its predecessor; without one
            // they go with the post (ON DELETE CASCADE)
            if let Some(prev) = previous {
                sqlx::query("UPDATE topic_reads SET post_id = $2 WHERE post_id = $1")
                    .bind(id)
                    .bind(prev)
                    .execute(&mut *tx).await?;
            }
            let topic_id = sqlx::query_scalar::<_, Id>("DELETE FROM posts WHERE id = $1 RETURNING topic_id")
                .bind(id)
                .fetch_one(&mut *tx).await?;
            let remaining = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM posts WHERE topic_id = $1")
                .bind(topic_id)
                .fetch_one(&mut *tx).await?;
            let outcome = if remaining > 0 {
                PostDeletion::PostRemoved { topic_id }
            } else {
                // subscriptions go with the topic (ON DELETE CASCADE)
                let branch_id = sqlx::query_scalar::<_, Id>("DELETE FROM topics WHERE id = $1 RETURNING branch_id")
                    .bind(topic_id)
                    .fetch_one(&mut *tx).await?;
                PostDeletion::TopicRemoved { topic_id, branch_id }
            };
            tx.commit().await?;
            Ok(outcome)
        }
    }

    #[async_trait]
    impl ReadMarkRepo for PgRepo {
        async fn last_read(&self, topic_id: Id, user_id: Id) -> RepoResult<Option<Id>> {
            self.ensure_topic(topic_id).await?;
            Ok(sqlx::query_scalar::<_, Id>("SELECT post_id FROM topic_reads WHERE topic_id = $1 AND user_id = $2")
                .bind(topic_id)
                .bind(user_id)
                .fetch_optional(&self.pool).await?)
        }
        async fn mark_read(&self, topic_id: Id, user_id: Id, post_id: Id) -> RepoResult<()> {
            sqlx::query_scalar::<_, Id>("SELECT id FROM posts WHERE id = $1 AND topic_id = $2")
                .bind(post_id)
                .bind(topic_id)
                .fetch_one(&self.pool).await?;
            sqlx::query(
                "INSERT INTO topic_reads (topic_id, user_id, post_id) VALUES ($1, $2, $3) \
                 ON CONFLICT (topic_id, user_id) DO UPDATE SET post_id = EXCLUDED.post_id \
                 WHERE (SELECT (created_at, id) FROM posts WHERE id = EXCLUDED.post_id) \
                     > (SELECT (created_at, id) FROM posts WHERE id = topic_reads.post_id)",
            )
            .bind(topic_id)
            .bind(user_id)
            .bind(post_id)
            .execute(&self.pool).await?;
            Ok(())
        }
    }
}
