//! Rotating pool of outbound endpoints
//!
//! Workers `acquire` an endpoint before each request and `report` the
//! outcome afterwards. Failing proxies are cooled down, and the politeness
//! delay is enforced per endpoint.

use crate::config::{validate_proxy_config, ProxyConfig};
use crate::proxy::endpoint::{redact_address, CooldownPolicy, ProxyEndpoint};
use crate::ConfigResult;
use rand::Rng;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Returned when no endpoint became usable within the configured wait
#[derive(Debug, Clone, Error)]
#[error("no proxy endpoint became available within {waited:?}")]
pub struct PoolExhausted {
    pub waited: Duration,
}

/// Outcome of a request, reported back to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Tunables for a [`ProxyPool`]
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub cooldown: CooldownPolicy,
    /// Longest `acquire` waits before giving up
    pub max_wait: Duration,
    /// Minimum interval between two requests through the same endpoint
    pub politeness_delay: Duration,
    /// Fraction of the politeness delay added or removed at random
    pub politeness_jitter: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            cooldown: CooldownPolicy::default(),
            max_wait: Duration::from_secs(300),
            politeness_delay: Duration::ZERO,
            politeness_jitter: 0.0,
        }
    }
}

impl PoolSettings {
    /// Builds pool settings from the proxy section and crawler politeness options
    pub fn from_config(proxies: &ProxyConfig, politeness_delay: Duration, jitter: f64) -> Self {
        Self {
            cooldown: CooldownPolicy {
                failure_threshold: proxies.failure_threshold,
                base: Duration::from_millis(proxies.cooldown_base_ms),
                max: Duration::from_millis(proxies.cooldown_max_ms),
            },
            max_wait: Duration::from_millis(proxies.max_wait_ms),
            politeness_delay,
            politeness_jitter: jitter,
        }
    }
}

/// An endpoint handed to a worker for one request
///
/// The holder must pass it back through [`ProxyPool::report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    /// Position of the endpoint in the pool
    pub index: usize,
    /// Proxy URL, or `None` for a direct connection
    pub address: Option<String>,
}

impl ProxyLease {
    /// Endpoint name for logs, without credentials
    pub fn display_address(&self) -> String {
        self.address
            .as_deref()
            .map_or_else(|| "direct".to_string(), redact_address)
    }
}

/// Point-in-time view of one endpoint, for logging and reports
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    pub address: String,
    pub consecutive_failures: u32,
    pub disabled: bool,
    pub total_requests: u64,
    pub total_failures: u64,
}

struct PoolState {
    endpoints: Vec<ProxyEndpoint>,
    cursor: usize,
}

impl PoolState {
    /// Round-robin search for a usable endpoint, starting after the last pick
    fn select(&mut self, now: Instant, exclusive: bool) -> Option<usize> {
        let len = self.endpoints.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.endpoints[index].can_acquire(now, exclusive) {
                self.cursor = (index + 1) % len;
                return Some(index);
            }
        }
        None
    }

    /// Shortest time until some endpoint leaves cooldown or politeness delay
    fn next_ready_in(&self, now: Instant, exclusive: bool) -> Option<Duration> {
        self.endpoints
            .iter()
            .filter_map(|endpoint| endpoint.time_until_available(now, exclusive))
            .min()
    }
}

/// Rotates requests across outbound endpoints
///
/// With no proxies configured the pool holds a single direct endpoint. All
/// endpoint state lives behind one lock, so selection and outcome updates
/// are atomic with respect to each other. When a politeness delay is set,
/// an endpoint is leased to one worker at a time and rests for the delay
/// after each request.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    notify: Notify,
    settings: PoolSettings,
}

impl ProxyPool {
    /// Creates a pool over the given proxy URLs (direct if empty)
    pub fn new(addresses: Vec<String>, settings: PoolSettings) -> Self {
        let endpoints = if addresses.is_empty() {
            vec![ProxyEndpoint::direct()]
        } else {
            addresses.into_iter().map(ProxyEndpoint::new).collect()
        };

        Self {
            state: Mutex::new(PoolState {
                endpoints,
                cursor: 0,
            }),
            notify: Notify::new(),
            settings,
        }
    }

    /// Creates a pool from configuration, validating every endpoint
    pub fn from_config(
        proxies: &ProxyConfig,
        politeness_delay: Duration,
        jitter: f64,
    ) -> ConfigResult<Self> {
        validate_proxy_config(proxies)?;
        Ok(Self::new(
            proxies.endpoints.clone(),
            PoolSettings::from_config(proxies, politeness_delay, jitter),
        ))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exclusive(&self) -> bool {
        !self.settings.politeness_delay.is_zero()
    }

    /// Number of endpoints in the pool
    pub fn len(&self) -> usize {
        self.lock().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the pool only holds the direct endpoint
    pub fn is_direct(&self) -> bool {
        let state = self.lock();
        state.endpoints.len() == 1 && state.endpoints[0].is_direct()
    }

    /// Proxy URLs in pool order (`None` for the direct endpoint)
    pub fn addresses(&self) -> Vec<Option<String>> {
        self.lock()
            .endpoints
            .iter()
            .map(|endpoint| endpoint.address.clone())
            .collect()
    }

    /// Waits for a usable endpoint
    ///
    /// Blocks while every endpoint is disabled, resting, or leased, waking
    /// when one is reported back or its cooldown ends. Gives up with
    /// [`PoolExhausted`] after the configured maximum wait.
    pub async fn acquire(&self) -> Result<ProxyLease, PoolExhausted> {
        let started = Instant::now();
        let deadline = started + self.settings.max_wait;
        let exclusive = self.exclusive();

        loop {
            // Register interest before inspecting state so a report that
            // lands in between still wakes us.
            let notified = self.notify.notified();

            let ready_in = {
                let mut state = self.lock();
                let now = Instant::now();
                if let Some(index) = state.select(now, exclusive) {
                    let endpoint = &mut state.endpoints[index];
                    if exclusive {
                        endpoint.leased = true;
                    }
                    return Ok(ProxyLease {
                        index,
                        address: endpoint.address.clone(),
                    });
                }
                state.next_ready_in(now, exclusive)
            };

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("No proxy endpoint available after {:?}", now - started);
                return Err(PoolExhausted {
                    waited: now - started,
                });
            }

            let remaining = deadline - now;
            let wait = ready_in.map_or(remaining, |ready| ready.min(remaining));
            tracing::trace!("All endpoints busy, waiting up to {:?}", wait);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    /// Reports the outcome of a request made through `lease`
    ///
    /// Releases the lease and starts the endpoint's politeness delay. A
    /// success clears the endpoint's failure state; enough consecutive
    /// failures put it into cooldown.
    pub fn report(&self, lease: &ProxyLease, outcome: Outcome) {
        let now = Instant::now();
        let rest = self.politeness_interval();
        {
            let mut state = self.lock();
            let Some(endpoint) = state.endpoints.get_mut(lease.index) else {
                return;
            };

            endpoint.leased = false;
            match outcome {
                Outcome::Success => endpoint.record_success(),
                Outcome::Failure => {
                    if let Some(cooldown) = endpoint.record_failure(now, &self.settings.cooldown) {
                        tracing::warn!(
                            "Disabling proxy {} for {:?} after {} consecutive failures",
                            endpoint.display_address(),
                            cooldown,
                            endpoint.consecutive_failures
                        );
                    }
                }
            }

            if let Some(rest) = rest {
                endpoint.available_at = Some(now + rest);
            }
        }
        self.notify.notify_waiters();
    }

    /// Politeness delay for the next request, with jitter applied
    fn politeness_interval(&self) -> Option<Duration> {
        let delay = self.settings.politeness_delay;
        if delay.is_zero() {
            return None;
        }

        let jitter = self.settings.politeness_jitter;
        if jitter <= 0.0 {
            return Some(delay);
        }

        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        Some(delay.mul_f64(factor.max(0.0)))
    }

    /// Current state of every endpoint
    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        let now = Instant::now();
        self.lock()
            .endpoints
            .iter()
            .map(|endpoint| EndpointSnapshot {
                address: endpoint.display_address(),
                consecutive_failures: endpoint.consecutive_failures,
                disabled: !endpoint.is_enabled(now),
                total_requests: endpoint.total_requests,
                total_failures: endpoint.total_failures,
            })
            .collect()
    }
}
