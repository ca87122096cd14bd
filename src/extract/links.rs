//! Link extraction and the built-in link-following callback
//!
//! This module handles parsing HTML content to extract:
//! - Links to follow (from <a> tags and canonical links)
//! - Page title

use crate::config::FollowConfig;
use crate::crawler::{Callback, CallbackError, CrawlContext, Document};
use crate::url::{has_ignored_extension, is_same_site};
use scraper::{Html, Selector};
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// All links found on the page (absolute URLs)
    pub links: Vec<String>,
}

/// Parses HTML content and extracts links and metadata
///
/// Relative links resolve against `<base href>` when the page declares one,
/// otherwise against `base_url`.
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` links
/// - Data URIs
/// - Fragment-only links
///
/// # Example
///
/// ```
/// use webtrawl::extract::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page"]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base_url = declared_base(&document, base_url).unwrap_or_else(|| base_url.clone());

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, &base_url),
    }
}

/// The first `<base href>` of the document, resolved against the page URL
fn declared_base(document: &Html, page_url: &Url) -> Option<Url> {
    let selector = Selector::parse("base[href]").ok()?;
    let href = document.select(&selector).next()?.value().attr("href")?;
    let base = page_url.join(href.trim()).ok()?;
    matches!(base.scheme(), "http" | "https").then_some(base)
}

/// Extracts the page title from the HTML document
fn extract_title(document: &Html) -> Option<String> {
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extracts all valid links from the HTML document
fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }

            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute_url);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(absolute_url) = element
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, base_url))
            {
                links.push(absolute_url);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    let absolute_url = base_url.join(href).ok()?;
    matches!(absolute_url.scheme(), "http" | "https").then(|| absolute_url.to_string())
}

/// Callback that follows the links of every HTML page
///
/// Non-HTML documents are accepted but yield no links.
#[derive(Debug, Clone)]
pub struct LinkFollower {
    same_site: bool,
    skip_ignored_extensions: bool,
}

impl LinkFollower {
    pub fn new(config: &FollowConfig) -> Self {
        Self {
            same_site: config.same_site,
            skip_ignored_extensions: config.skip_ignored_extensions,
        }
    }

    fn should_follow(&self, page: &Url, link: &str) -> bool {
        let Ok(link) = Url::parse(link) else {
            return false;
        };
        if self.same_site && !is_same_site(page, &link) {
            return false;
        }
        !(self.skip_ignored_extensions && has_ignored_extension(&link))
    }
}

impl Default for LinkFollower {
    fn default() -> Self {
        Self::new(&FollowConfig::default())
    }
}

impl Callback for LinkFollower {
    fn visit(
        &self,
        ctx: &CrawlContext,
        url: &str,
        document: &Document,
    ) -> Result<Vec<String>, CallbackError> {
        if !is_html(document) {
            tracing::debug!("Not following links from non-HTML {}", url);
            return Ok(Vec::new());
        }

        // Resolve against where the page was actually served from.
        let page_url = Url::parse(&document.url).or_else(|_| Url::parse(url))?;
        let parsed = parse_html(&document.text, &page_url);
        let links: Vec<String> = parsed
            .links
            .into_iter()
            .filter(|link| self.should_follow(&page_url, link))
            .collect();

        tracing::debug!(
            "{} (depth {}, title {:?}): {} links to follow",
            url,
            ctx.depth,
            parsed.title.as_deref().unwrap_or(""),
            links.len()
        );
        Ok(links)
    }
}

fn is_html(document: &Document) -> bool {
    document
        .content_type()
        .map_or(true, |ct| ct.to_ascii_lowercase().contains("html"))
}
