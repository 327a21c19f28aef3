//! Which upstream URLs the proxy is willing to fetch.

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

/// Query parameter carrying the upstream URL's expiry, in epoch seconds.
const EXPIRE_PARAM: &str = "expire";

pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "googlevideo.com",
    "youtube.com",
    "ytimg.com",
    "googleusercontent.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceRejection {
    #[error("Malformed source URL: {0}")]
    Malformed(String),

    #[error("Source URL must use https, got {0}")]
    InsecureScheme(String),

    #[error("Source URL has no host")]
    MissingHost,

    #[error("Source host is not allowed: {0}")]
    HostNotAllowed(String),
}

#[derive(Debug, Clone)]
pub struct UrlPolicy {
    allowed_hosts: Vec<String>,
    allow_insecure: bool,
}

impl UrlPolicy {
    pub fn new<I, S>(allowed_hosts: I, allow_insecure: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|h| h.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            allow_insecure,
        }
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    /// Accepts only https URLs whose host is an allow-listed host or one of
    /// its subdomains. Plain http is accepted only with `allow_insecure`.
    pub fn validate_source_url(&self, raw: &str) -> Result<Url, SourceRejection> {
        let url = Url::parse(raw.trim()).map_err(|e| SourceRejection::Malformed(e.to_string()))?;

        match url.scheme() {
            "https" => {}
            "http" if self.allow_insecure => {}
            other => return Err(SourceRejection::InsecureScheme(other.to_string())),
        }

        let host = url
            .host_str()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or(SourceRejection::MissingHost)?;

        if !self.is_host_allowed(&host) {
            return Err(SourceRejection::HostNotAllowed(host));
        }
        Ok(url)
    }

    fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.iter().any(|allowed| {
            host == allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl Default for UrlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_HOSTS, false)
    }
}

/// True when the URL's `expire` timestamp has passed, is missing, or does
/// not parse.
pub fn is_expired(url: &Url, now: DateTime<Utc>) -> bool {
    let expire = url
        .query_pairs()
        .find(|(k, _)| k == EXPIRE_PARAM)
        .and_then(|(_, v)| v.trim().parse::<i64>().ok());
    match expire {
        Some(expire) => expire <= now.timestamp(),
        None => true,
    }
}
