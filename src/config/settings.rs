//! Boot-time engine settings.

use crate::config::exceptions::Exceptions;
use crate::config::types::Action;
use crate::error::ConfigError;
use std::collections::BTreeSet;

pub const DEFAULT_MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Settings {
    /// Prefix for `self` / `related` links, e.g. `https://api.example.com`. Empty for relative links.
    pub base_url: String,
    /// Page size applied to collections when the client sends no `page[size]`. `None` disables paging.
    pub page_size: Option<usize>,
    pub max_page_size: usize,
    pub body_limit: usize,
    /// Name attached to every logged error.
    pub progname: String,
    pub jsonapi_version: String,
    pub conflict_actions: BTreeSet<Action>,
    pub exceptions: Exceptions,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_url: String::new(),
            page_size: None,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            body_limit: DEFAULT_BODY_LIMIT,
            progname: "jsonapi".into(),
            jsonapi_version: "1.0".into(),
            conflict_actions: Action::default_conflict_actions(),
            exceptions: Exceptions::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Load(format!("{key}: cannot parse `{raw}`"))),
        _ => Ok(None),
    }
}

impl Settings {
    /// Defaults overridden by `JSONAPI_BASE_URL`, `JSONAPI_PAGE_SIZE`, `JSONAPI_MAX_PAGE_SIZE`,
    /// `JSONAPI_BODY_LIMIT` and `JSONAPI_PROGNAME`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Settings::default();
        if let Ok(url) = std::env::var("JSONAPI_BASE_URL") {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(size) = parse_env::<usize>("JSONAPI_PAGE_SIZE")? {
            settings.page_size = Some(size);
        }
        if let Some(max) = parse_env::<usize>("JSONAPI_MAX_PAGE_SIZE")? {
            settings.max_page_size = max;
        }
        if let Some(limit) = parse_env::<usize>("JSONAPI_BODY_LIMIT")? {
            settings.body_limit = limit;
        }
        if let Ok(name) = std::env::var("JSONAPI_PROGNAME") {
            settings.progname = name;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Page sizes must leave every page non-empty: `1 <= page_size <= max_page_size`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::Validation("max page size must be at least 1".into()));
        }
        if self.page_size.map_or(false, |s| s == 0 || s > self.max_page_size) {
            return Err(ConfigError::Validation(format!(
                "page size must be between 1 and {}",
                self.max_page_size
            )));
        }
        Ok(())
    }

    pub fn with_exceptions(mut self, exceptions: Exceptions) -> Self {
        self.exceptions = exceptions;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }
}
