use async_trait::async_trait;
use tracing::info;

use crate::models::{Id, Post, Topic};

/// Delivery seam for "new post in a topic you follow".
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn new_post(&self, topic: &Topic, post: &Post, recipients: &[Id]);
}

/// Recipients of a new-post notification: subscribers minus the post's author.
pub fn recipients(subscribers: &[Id], post: &Post) -> Vec<Id> {
    subscribers.iter().copied().filter(|id| *id != post.author_id).collect()
}

/// Logs notifications; stands in until a mail/queue transport is wired.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn new_post(&self, topic: &Topic, post: &Post, recipients: &[Id]) {
        if recipients.is_empty() {
            return;
        }
        info!(topic_id = topic.id, post_id = post.id, recipients = recipients.len(), "notifying subscribers");
    }
}
