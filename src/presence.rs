use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::rt::{self, task::JoinHandle};
use actix_web::Error;
use dashmap::DashMap;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::auth::subject_from_headers;
use crate::models::Id;

/// Answers whether a user has been seen recently.
pub trait PresenceLookup: Send + Sync {
    fn is_online(&self, user_id: Id) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Visit {
    at: Instant,
    topic: Option<Id>,
}

/// Last-seen registry (pod local). Entries older than `window` count as offline.
pub struct PresenceRegistry {
    seen: DashMap<Id, Visit>,
    window: Duration,
}

impl PresenceRegistry {
    pub fn new(window: Duration) -> Self {
        Self { seen: DashMap::new(), window }
    }

    /// Marks the user active without changing what they are viewing.
    pub fn touch(&self, user_id: Id) {
        let now = Instant::now();
        self.seen
            .entry(user_id)
            .and_modify(|v| v.at = now)
            .or_insert(Visit { at: now, topic: None });
    }

    pub fn record_view(&self, user_id: Id, topic_id: Id) {
        self.seen.insert(user_id, Visit { at: Instant::now(), topic: Some(topic_id) });
    }

    /// Users currently looking at `topic_id`, ascending.
    pub fn viewing(&self, topic_id: Id) -> Vec<Id> {
        let now = Instant::now();
        let mut users: Vec<Id> = self
            .seen
            .iter()
            .filter(|e| e.topic == Some(topic_id) && now.duration_since(e.at) < self.window)
            .map(|e| *e.key())
            .collect();
        users.sort_unstable();
        users
    }

    pub fn online_count(&self) -> usize {
        let now = Instant::now();
        self.seen.iter().filter(|e| now.duration_since(e.at) < self.window).count()
    }

    /// Drops expired entries.
    pub fn prune(&self) {
        let now = Instant::now();
        self.seen.retain(|_, v| now.duration_since(v.at) < self.window);
    }

    /// Entries held, expired or not.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }

    /// Prunes every `every` on the current actix runtime until the handle is aborted.
    pub fn spawn_pruner(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        rt::spawn(async move {
            let mut ticks = rt::time::interval(every);
            loop {
                ticks.tick().await;
                self.prune();
                debug!(tracked = self.tracked(), "pruned presence registry");
            }
        })
    }
}

impl PresenceLookup for PresenceRegistry {
    fn is_online(&self, user_id: Id) -> bool {
        self.seen
            .get(&user_id)
            .is_some_and(|v| Instant::now().duration_since(v.at) < self.window)
    }
}

/// Middleware marking the bearer of a valid token as online on every request.
#[derive(Clone)]
pub struct PresenceTracker {
    registry: Arc<PresenceRegistry>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }
}

impl<S, B> Transform<S, ServiceRequest> for PresenceTracker
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = PresenceTrackerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(PresenceTrackerMiddleware {
            service: Rc::new(service),
            registry: self.registry.clone(),
        }))
    }
}

pub struct PresenceTrackerMiddleware<S> {
    service: Rc<S>,
    registry: Arc<PresenceRegistry>,
}

impl<S, B> Service<ServiceRequest> for PresenceTrackerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        if let Some(user_id) = subject_from_headers(req.headers()) {
            self.registry.touch(user_id);
        }
        let svc = self.service.clone();
        Box::pin(async move { svc.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_expires_after_window() {
        let reg = PresenceRegistry::new(Duration::from_millis(40));
        reg.touch(1);
        assert!(reg.is_online(1));
        assert!(!reg.is_online(2));
        std::thread::sleep(Duration::from_millis(60));
        assert!(!reg.is_online(1));
        reg.prune();
        assert_eq!(reg.online_count(), 0);
    }

    #[actix_web::test]
    async fn pruner_forgets_idle_users() {
        let reg = Arc::new(PresenceRegistry::new(Duration::from_millis(30)));
        reg.touch(1);
        reg.record_view(2, 9);
        assert_eq!(reg.tracked(), 2);

        let pruner = Arc::clone(&reg).spawn_pruner(Duration::from_millis(10));
        rt::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(reg.tracked(), 0);

        // still running: a later visitor is dropped as well
        reg.touch(3);
        rt::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(reg.tracked(), 0);
        pruner.abort();
    }

    #[test]
    fn viewers_are_tracked_per_topic() {
        let reg = PresenceRegistry::new(Duration::from_secs(60));
        reg.record_view(3, 10);
        reg.record_view(1, 10);
        reg.record_view(2, 11);
        assert_eq!(reg.viewing(10), vec![1, 3]);

        // moving to another topic leaves the first one
        reg.record_view(3, 11);
        assert_eq!(reg.viewing(10), vec![1]);
        assert_eq!(reg.viewing(11), vec![2, 3]);

        // a plain touch keeps the current location
        reg.touch(2);
        assert_eq!(reg.viewing(11), vec![2, 3]);
        assert_eq!(reg.online_count(), 3);
    }
}
