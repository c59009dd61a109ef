//! Capability checks evaluated once per request or per rendered post.
//!
//! Authors may edit and delete their own posts; moderators and admins may
//! edit and delete any post, reply to closed topics and open/close topics.
//! Code review topics take no replies at all.

use crate::auth::Role;
use crate::models::{Author, Id, Post, Topic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: Id,
    pub name: String,
    pub roles: Vec<Role>,
}

impl Actor {
    pub fn is_privileged(&self) -> bool {
        self.roles.iter().any(|r| matches!(r, Role::Moderator | Role::Admin))
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| matches!(r, Role::Admin))
    }

    pub fn author(&self) -> Author {
        Author { id: self.id, name: self.name.clone() }
    }
}

pub fn can_edit(actor: Option<&Actor>, post: &Post) -> bool {
    actor.is_some_and(|a| a.id == post.author_id || a.is_privileged())
}

pub fn can_delete(actor: Option<&Actor>, post: &Post) -> bool {
    actor.is_some_and(|a| a.id == post.author_id || a.is_privileged())
}

pub fn can_reply(actor: Option<&Actor>, topic: &Topic) -> bool {
    actor.is_some_and(|a| topic.accepts_reply(a.is_privileged()))
}

pub fn can_moderate(actor: Option<&Actor>) -> bool {
    actor.is_some_and(Actor::is_privileged)
}
