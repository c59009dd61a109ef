//! Answers "which page of its topic shows this post".
//!
//! Every call re-reads the topic's live post sequence: page boundaries move
//! as posts are added and removed, so a page number is never cached.

use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::models::Id;
use crate::pagination::{self, PageSize};
use crate::repo::{PostReader, RepoError, RepoResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PostLocation {
    pub topic_id: Id,
    pub page: usize,
    pub post_id: Id,
}

impl PostLocation {
    /// Topic page URL with the post as fragment, e.g. `/topics/3?page=2#41`.
    pub fn redirect_path(&self) -> String {
        format!("/topics/{}?page={}#{}", self.topic_id, self.page, self.post_id)
    }
}

/// 1-based rank of `post_id` in an ordered sequence.
pub fn ordinal_of(sequence: &[Id], post_id: Id) -> Option<usize> {
    sequence.iter().position(|id| *id == post_id).map(|i| i + 1)
}

pub struct PostLocator<'a, R: PostReader + ?Sized> {
    posts: &'a R,
    page_size: PageSize,
}

impl<'a, R: PostReader + ?Sized> PostLocator<'a, R> {
    pub fn new(posts: &'a R, page_size: PageSize) -> Self {
        Self { posts, page_size }
    }

    /// Fails with [`RepoError::NotFound`] when the post does not exist or is
    /// no longer part of its topic's sequence.
    pub async fn locate_page(&self, post_id: Id) -> RepoResult<PostLocation> {
        let post = self.posts.get_post(post_id).await?;
        let sequence = self.posts.ordered_post_ids(post.topic_id).await?;
        let ordinal = ordinal_of(&sequence, post_id).ok_or(RepoError::NotFound)?;
        let page = pagination::page_for_ordinal(ordinal, self.page_size);
        debug!(post_id, topic_id = post.topic_id, ordinal, page, "located post");
        Ok(PostLocation { topic_id: post.topic_id, page, post_id })
    }
}
