//! URL handling module for Webtrawl
//!
//! This module provides URL canonicalization, cache keys, domain extraction
//! and the link filters used when following discovered URLs.

mod domain;
mod key;
mod normalize;

pub use domain::{extract_domain, has_ignored_extension, is_same_site};
pub use key::CacheKey;
pub use normalize::normalize_url;
