use std::time::Duration;

use crate::pagination::PageSize;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_PRESENCE_WINDOW_SECS: u64 = 300;
pub const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub page_size: PageSize,
    pub bind: String,
    pub presence_window: Duration,
    pub frontend_url: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`] with an injectable variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "JWT_SECRET",
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }

        let page_size = match get("COMMUNE_PAGE_SIZE") {
            None => DEFAULT_PAGE_SIZE,
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| ConfigError::Invalid {
                name: "COMMUNE_PAGE_SIZE",
                reason: e.to_string(),
            })?,
        };
        let page_size = PageSize::new(page_size).ok_or_else(|| ConfigError::Invalid {
            name: "COMMUNE_PAGE_SIZE",
            reason: "must be positive".into(),
        })?;

        let window_secs = match get("COMMUNE_PRESENCE_WINDOW_SECS") {
            None => DEFAULT_PRESENCE_WINDOW_SECS,
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                name: "COMMUNE_PRESENCE_WINDOW_SECS",
                reason: e.to_string(),
            })?,
        };

        if window_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "COMMUNE_PRESENCE_WINDOW_SECS",
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            page_size,
            bind: get("COMMUNE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            presence_window: Duration::from_secs(window_secs),
            frontend_url: get("FRONTEND_URL").filter(|v| !v.is_empty()),
        })
    }
}
