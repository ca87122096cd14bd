//! The user callback contract

use crate::crawler::Document;
use tokio_util::sync::CancellationToken;

/// Error type a callback may return
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// What the crawler knows about the URL being visited
#[derive(Debug, Clone)]
pub struct CrawlContext {
    /// Link distance from the seeds
    pub depth: u32,
    /// Whether the document was served from the cache
    pub from_cache: bool,
    stop: CancellationToken,
}

impl CrawlContext {
    pub fn new(depth: u32, from_cache: bool, stop: CancellationToken) -> Self {
        Self {
            depth,
            from_cache,
            stop,
        }
    }

    /// Ends the crawl after in-flight work finishes
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

/// Processes one document and returns the URLs to visit next
///
/// This is the only extension point of the crawler. Extracted data is
/// written to whatever sink the implementation owns. Returned URLs must be
/// absolute; the crawler normalizes and deduplicates them. An error marks
/// the URL as failed without affecting the rest of the crawl.
pub trait Callback: Send + Sync {
    fn visit(
        &self,
        ctx: &CrawlContext,
        url: &str,
        document: &Document,
    ) -> Result<Vec<String>, CallbackError>;
}

/// A [`Callback`] backed by a closure
pub struct FnCallback<F>(F);

impl<F> Callback for FnCallback<F>
where
    F: Fn(&CrawlContext, &str, &Document) -> Result<Vec<String>, CallbackError> + Send + Sync,
{
    fn visit(
        &self,
        ctx: &CrawlContext,
        url: &str,
        document: &Document,
    ) -> Result<Vec<String>, CallbackError> {
        (self.0)(ctx, url, document)
    }
}

/// Wraps a closure as a [`Callback`]
///
/// ```
/// use webtrawl::crawler::callback_fn;
///
/// let callback = callback_fn(|_ctx, url, document| {
///     println!("{} is {} bytes", url, document.body.len());
///     Ok(Vec::new())
/// });
/// # let _ = callback;
/// ```
pub fn callback_fn<F>(f: F) -> FnCallback<F>
where
    F: Fn(&CrawlContext, &str, &Document) -> Result<Vec<String>, CallbackError> + Send + Sync,
{
    FnCallback(f)
}
