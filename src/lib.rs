pub mod auth;
pub mod config;
pub mod error;
pub mod locator;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod pagination;
pub mod plugin;
pub mod policy;
pub mod presence;
pub mod quote;
pub mod repo;
pub mod routes;

// Re-export commonly used items for tests / external users
pub use locator::{PostLocation, PostLocator};
pub use pagination::PageSize;
pub use presence::{PresenceRegistry, PresenceTracker};
pub use routes::{config, AppState};
