//! Structural queries over fetched documents

use crate::crawler::Document;
use scraper::{Html, Selector};

/// Evaluates a path expression against a document
///
/// Implementations never fail: an expression that does not parse or does
/// not match yields an empty result.
pub trait DocumentQuery {
    fn query(&self, document: &Document, path: &str) -> Vec<String>;
}

/// CSS selector queries backed by `scraper`
///
/// A path is a CSS selector, optionally followed by `@name` to return the
/// named attribute of each match instead of its text:
///
/// ```
/// use webtrawl::extract::CssQuery;
///
/// let html = r#"<ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li></ul>"#;
/// assert_eq!(CssQuery.query_html(html, "li a"), vec!["A", "B"]);
/// assert_eq!(CssQuery.query_html(html, "li a@href"), vec!["/a", "/b"]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CssQuery;

impl CssQuery {
    /// Runs a query against raw HTML
    pub fn query_html(&self, html: &str, path: &str) -> Vec<String> {
        let (selector, attribute) = split_attribute(path);
        let Ok(selector) = Selector::parse(selector) else {
            tracing::debug!("Invalid selector in query {:?}", path);
            return Vec::new();
        };

        let document = Html::parse_document(html);
        document
            .select(&selector)
            .filter_map(|element| match attribute {
                Some(name) => element.value().attr(name).map(str::to_string),
                None => Some(element.text().collect::<String>().trim().to_string()),
            })
            .collect()
    }
}

impl DocumentQuery for CssQuery {
    fn query(&self, document: &Document, path: &str) -> Vec<String> {
        self.query_html(&document.text, path)
    }
}

/// Splits a trailing `@attribute` off a selector
fn split_attribute(path: &str) -> (&str, Option<&str>) {
    let path = path.trim();
    match path.rsplit_once('@') {
        Some((selector, attribute))
            if !attribute.is_empty()
                && attribute
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':')) =>
        {
            let selector = selector.trim();
            (if selector.is_empty() { "*" } else { selector }, Some(attribute))
        }
        _ => (path, None),
    }
}
