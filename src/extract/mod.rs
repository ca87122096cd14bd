//! Extraction helpers for callbacks
//!
//! CSS queries over documents and the built-in link-following callback used
//! by the `webtrawl` binary.

mod links;
mod query;

pub use links::{parse_html, LinkFollower, ParsedPage};
pub use query::{CssQuery, DocumentQuery};
