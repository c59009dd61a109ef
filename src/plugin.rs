use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{Branch, Id};
use crate::repo::{BranchRepo, Repo, RepoResult};

/// Branch lookup offered to plugins. Unknown ids yield `RepoError::NotFound`.
#[async_trait]
pub trait PluginBranchService: Send + Sync {
    async fn get(&self, id: Id) -> RepoResult<Branch>;
}

/// Delegates to the forum repository.
#[derive(Clone)]
pub struct RepoBranchService {
    repo: Arc<dyn Repo>,
}

impl RepoBranchService {
    pub fn new(repo: Arc<dyn Repo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl PluginBranchService for RepoBranchService {
    async fn get(&self, id: Id) -> RepoResult<Branch> {
        self.repo.get_branch(id).await
    }
}
