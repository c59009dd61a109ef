use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

pub const POST_BODY_MIN: usize = 2;
pub const POST_BODY_MAX: usize = 20_000;
pub const TOPIC_TITLE_MIN: usize = 5;
pub const TOPIC_TITLE_MAX: usize = 120;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Branch {
    pub id: Id,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewBranch {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Topic {
    pub id: Id,
    pub branch_id: Id,
    pub title: String,
    pub closed: bool, // replies need an override while set
    /// Code review topics hold the reviewed code as their only post.
    #[serde(default)]
    pub code_review: bool,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    /// Whether a reply may be appended. `override_closed` lifts the closed
    /// flag only; code reviews never take replies.
    pub fn accepts_reply(&self, override_closed: bool) -> bool {
        !self.code_review && (!self.closed || override_closed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTopic {
    pub branch_id: Id,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub code_review: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[cfg_attr(feature = "postgres-store", derive(sqlx::FromRow))]
pub struct Post {
    pub id: Id,
    pub topic_id: Id,
    pub author_id: Id,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Post {
    /// Order of posts inside a topic: creation time, then id.
    ///
    /// Every listing of a topic's posts must sort with this comparator, otherwise
    /// the page computed for a post and the page it is rendered on drift apart.
    pub fn sequence_cmp(&self, other: &Post) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub topic_id: Id,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub body: String,
}

/// Identity stamped on posts a user writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: Id,
    pub name: String,
}

/// What a post deletion left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostDeletion {
    PostRemoved { topic_id: Id },
    TopicRemoved { topic_id: Id, branch_id: Id },
}

/// Trims a post body and checks its length, counted in characters.
pub fn normalize_body(raw: &str) -> Result<String, String> {
    let body = raw.trim();
    let len = body.chars().count();
    if !(POST_BODY_MIN..=POST_BODY_MAX).contains(&len) {
        return Err(format!(
            "post body must be between {POST_BODY_MIN} and {POST_BODY_MAX} characters"
        ));
    }
    Ok(body.to_string())
}

pub fn normalize_title(raw: &str) -> Result<String, String> {
    let title = raw.trim();
    let len = title.chars().count();
    if !(TOPIC_TITLE_MIN..=TOPIC_TITLE_MAX).contains(&len) {
        return Err(format!(
            "topic title must be between {TOPIC_TITLE_MIN} and {TOPIC_TITLE_MAX} characters"
        ));
    }
    Ok(title.to_string())
}
