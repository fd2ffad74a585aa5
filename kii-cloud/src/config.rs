//! SDK configuration.

use serde::{Deserialize, Serialize};

use crate::error::{KiiError, KiiResult};

/// Deployment site an application lives on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Us,
    Jp,
    Cn,
    Sg,
    /// A custom API base URL (private deployments, local test servers).
    Custom(String),
}

impl Site {
    /// Base URL of the REST API for this site, without a trailing slash.
    pub fn base_url(&self) -> &str {
        match self {
            Site::Us => "https://api.kii.com/api",
            Site::Jp => "https://api-jp.kii.com/api",
            Site::Cn => "https://api-cn3.kii.com/api",
            Site::Sg => "https://api-sg.kii.com/api",
            Site::Custom(url) => url.trim_end_matches('/'),
        }
    }
}

impl std::str::FromStr for Site {
    type Err = KiiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Site::Us),
            "jp" => Ok(Site::Jp),
            "cn" => Ok(Site::Cn),
            "sg" => Ok(Site::Sg),
            other if other.starts_with("http://") || other.starts_with("https://") => {
                Ok(Site::Custom(s.to_string()))
            }
            other => Err(KiiError::Config(format!("unknown site: {other}"))),
        }
    }
}

/// Configuration for a [`KiiClient`](crate::KiiClient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KiiConfig {
    /// Application id from the developer console.
    pub app_id: String,
    /// Application key from the developer console.
    pub app_key: String,
    /// Where the application is deployed.
    pub site: Site,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Worker threads backing the blocking call form.
    pub blocking_worker_threads: usize,
}

impl Default for KiiConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_key: String::new(),
            site: Site::Us,
            request_timeout_secs: 60,
            blocking_worker_threads: 2,
        }
    }
}

impl KiiConfig {
    /// Creates a config for the US site.
    pub fn new(app_id: impl Into<String>, app_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_key: app_key.into(),
            ..Default::default()
        }
    }

    /// Replaces the site.
    #[must_use]
    pub fn with_site(mut self, site: Site) -> Self {
        self.site = site;
        self
    }

    /// Base URL requests are issued against.
    pub fn base_url(&self) -> &str {
        self.site.base_url()
    }

    /// Checks the config is usable before any request is built.
    pub fn validate(&self) -> KiiResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(KiiError::Config("app_id must not be empty".into()));
        }
        if self.app_key.trim().is_empty() {
            return Err(KiiError::Config("app_key must not be empty".into()));
        }
        if let Site::Custom(url) = &self.site {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(KiiError::Config(format!("custom site URL must be http(s): {url}")));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(KiiError::Config("request_timeout_secs must be positive".into()));
        }
        if self.blocking_worker_threads == 0 {
            return Err(KiiError::Config("blocking_worker_threads must be positive".into()));
        }
        Ok(())
    }
}
