//! Deduplicating work queue shared by all workers

use crate::url::normalize_url;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use url::Url;

/// A URL waiting to be processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierItem {
    /// URL to request, as discovered (without its fragment)
    pub url: String,

    /// Link distance from the seeds
    pub depth: u32,

    /// Times the item may still be put back after a transient failure
    pub retries_remaining: u32,

    /// Times the item has already been dispatched
    pub attempts: u32,
}

struct FrontierState {
    queue: VecDeque<FrontierItem>,
    seen: HashSet<String>,
    in_flight: usize,
    closed: bool,
}

/// Queue of URLs still to visit, with a seen-set
///
/// A URL enters the frontier at most once per crawl: `push` ignores any URL
/// that was ever queued before, whether or not it has been processed yet.
/// The frontier also counts items handed out and not yet completed, which
/// lets waiting workers tell "nothing right now" from "nothing ever again".
pub struct Frontier {
    state: Mutex<FrontierState>,
    notify: Notify,
    requeue_retries: u32,
    depth_first: bool,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `requeue_retries` - Retry budget given to every new item
    /// * `depth_first` - Pop the newest item first instead of the oldest
    pub fn new(requeue_retries: u32, depth_first: bool) -> Self {
        Self {
            state: Mutex::new(FrontierState {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                in_flight: 0,
                closed: false,
            }),
            notify: Notify::new(),
            requeue_retries,
            depth_first,
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrontierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a URL unless an equivalent one was seen before
    ///
    /// URLs are compared in normalized form, but the item keeps the URL as
    /// given so the request and relative links use the real path. Returns
    /// false if the URL was already seen, is not a crawlable http(s) URL,
    /// or the frontier is closed.
    pub fn push(&self, url: &str, depth: u32) -> bool {
        let key = match normalize_url(url) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!("Skipping link {}: {}", url, e);
                return false;
            }
        };
        let target = match Url::parse(url.trim()) {
            Ok(mut given) => {
                given.set_fragment(None);
                given
            }
            Err(_) => key.clone(),
        };

        {
            let mut state = self.lock();
            if state.closed || !state.seen.insert(key.into()) {
                return false;
            }
            state.queue.push_back(FrontierItem {
                url: target.into(),
                depth,
                retries_remaining: self.requeue_retries,
                attempts: 0,
            });
        }
        self.notify.notify_waiters();
        true
    }

    /// Puts a failed item back for another attempt
    ///
    /// The URL is already in the seen-set, so this bypasses deduplication.
    pub fn requeue(&self, item: FrontierItem) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.queue.push_back(item);
        }
        self.notify.notify_waiters();
    }

    /// Takes the next item without waiting
    ///
    /// The item counts as in flight until [`Frontier::complete`] is called.
    pub fn pop(&self) -> Option<FrontierItem> {
        let mut state = self.lock();
        self.take(&mut state)
    }

    fn take(&self, state: &mut FrontierState) -> Option<FrontierItem> {
        if state.closed {
            return None;
        }
        let item = if self.depth_first {
            state.queue.pop_back()
        } else {
            state.queue.pop_front()
        }?;
        state.in_flight += 1;
        Some(item)
    }

    /// Waits for the next item
    ///
    /// Returns None once the queue is empty and no item is in flight, since
    /// nothing can add more work at that point, or once the frontier is
    /// closed.
    pub async fn next(&self) -> Option<FrontierItem> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some(item) = self.take(&mut state) {
                    return Some(item);
                }
                if state.closed || state.in_flight == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks an item obtained from `pop`/`next` as finished
    ///
    /// Requeue or push any follow-up work before calling this, otherwise
    /// idle workers may conclude the crawl is over.
    pub fn complete(&self) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.notify.notify_waiters();
    }

    /// Discards all queued items and releases waiting workers
    ///
    /// Returns the number of discarded items.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut state = self.lock();
            state.closed = true;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        self.notify.notify_waiters();
        discarded
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Number of distinct normalized URLs ever queued
    pub fn seen_count(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
