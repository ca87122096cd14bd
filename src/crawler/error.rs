//! Fetch error taxonomy

use thiserror::Error;

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FetchErrorKind {
    #[error("timeout")]
    Timeout,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("connection refused")]
    ConnectionRefused,

    #[error("decode error")]
    DecodeError,

    #[error("no proxy endpoint available")]
    ProxyExhausted,

    #[error("response too large")]
    TooLarge,

    #[error("not in cache")]
    NotCached,

    #[error("transport error")]
    Transport,

    #[error("invalid URL")]
    InvalidUrl,

    #[error("cache unavailable")]
    CacheUnavailable,
}

impl FetchErrorKind {
    /// Whether a later attempt at the same URL might succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::ConnectionRefused | Self::Transport | Self::ProxyExhausted => {
                true
            }
            Self::HttpStatus(status) => *status >= 500 || *status == 408 || *status == 429,
            Self::DecodeError
            | Self::TooLarge
            | Self::NotCached
            | Self::InvalidUrl
            | Self::CacheUnavailable => false,
        }
    }

    /// Whether the error makes the whole crawl pointless
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CacheUnavailable)
    }

    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionRefused
        } else if err.is_decode() {
            Self::DecodeError
        } else {
            Self::Transport
        }
    }
}

/// A fetch that could not produce a document
#[derive(Debug, Clone, Error)]
#[error("{kind} fetching {url}: {detail}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub url: String,
    pub detail: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Classifies a transport-level error from reqwest
    pub fn from_reqwest(url: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::new(FetchErrorKind::from_reqwest(err), url, err.to_string())
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}
