//! Health and timing state of a single proxy endpoint

use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// How long failing endpoints are kept out of rotation
#[derive(Debug, Clone, Copy)]
pub struct CooldownPolicy {
    /// Consecutive failures before an endpoint is disabled
    pub failure_threshold: u32,
    /// Cooldown applied when the threshold is first reached
    pub base: Duration,
    /// Upper bound for the doubled cooldowns
    pub max: Duration,
}

impl CooldownPolicy {
    /// Returns the cooldown for an endpoint with `failures` consecutive failures
    ///
    /// Below the threshold there is no cooldown; at the threshold it is `base`
    /// and every further failure doubles it, capped at `max`.
    pub fn cooldown_for(&self, failures: u32) -> Option<Duration> {
        if failures < self.failure_threshold {
            return None;
        }
        let exponent = (failures - self.failure_threshold).min(31);
        let cooldown = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);
        Some(cooldown)
    }
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            base: Duration::from_secs(30),
            max: Duration::from_secs(600),
        }
    }
}

/// Tracks the health of one outbound endpoint
///
/// Endpoints are never removed from the pool; failing ones are disabled for
/// a cooldown window and come back once it expires.
#[derive(Debug, Clone)]
pub struct ProxyEndpoint {
    /// Proxy URL, or `None` for a direct connection
    pub address: Option<String>,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// The endpoint is excluded from selection until this instant
    pub disabled_until: Option<Instant>,

    /// Earliest instant the politeness delay allows the next request
    pub available_at: Option<Instant>,

    /// Held exclusively by a worker until its outcome is reported
    pub leased: bool,

    /// Requests reported through this endpoint
    pub total_requests: u64,

    /// Failures reported through this endpoint
    pub total_failures: u64,
}

impl ProxyEndpoint {
    /// Creates an endpoint for a proxy URL
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_address(Some(address.into()))
    }

    /// Creates the implicit direct-connection endpoint
    pub fn direct() -> Self {
        Self::with_address(None)
    }

    fn with_address(address: Option<String>) -> Self {
        Self {
            address,
            consecutive_failures: 0,
            disabled_until: None,
            available_at: None,
            leased: false,
            total_requests: 0,
            total_failures: 0,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.address.is_none()
    }

    /// Checks whether the endpoint is outside any cooldown window
    pub fn is_enabled(&self, now: Instant) -> bool {
        self.disabled_until.map_or(true, |until| now >= until)
    }

    /// Checks whether a worker may use the endpoint right now
    ///
    /// # Arguments
    ///
    /// * `now` - The current instant
    /// * `exclusive` - Whether endpoints are leased to one worker at a time
    pub fn can_acquire(&self, now: Instant, exclusive: bool) -> bool {
        if exclusive && self.leased {
            return false;
        }
        if !self.is_enabled(now) {
            return false;
        }
        self.available_at.map_or(true, |at| now >= at)
    }

    /// Time until the endpoint leaves cooldown and politeness delay
    ///
    /// Returns None if it is usable now or is waiting on a lease, which
    /// only ends when its holder reports back.
    pub fn time_until_available(&self, now: Instant, exclusive: bool) -> Option<Duration> {
        if exclusive && self.leased {
            return None;
        }
        let ready_at = match (self.disabled_until, self.available_at) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return None,
        };
        (ready_at > now).then(|| ready_at - now)
    }

    /// Records a successful request, clearing any failure state
    pub fn record_success(&mut self) {
        self.total_requests += 1;
        self.consecutive_failures = 0;
        self.disabled_until = None;
    }

    /// Records a failed request
    ///
    /// Returns the cooldown applied if the endpoint was disabled. The direct
    /// endpoint is never disabled.
    pub fn record_failure(&mut self, now: Instant, policy: &CooldownPolicy) -> Option<Duration> {
        self.total_requests += 1;
        self.total_failures += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.is_direct() {
            return None;
        }

        let cooldown = policy.cooldown_for(self.consecutive_failures)?;
        self.disabled_until = Some(now + cooldown);
        Some(cooldown)
    }

    /// Address suitable for logs, with any password removed
    pub fn display_address(&self) -> String {
        match &self.address {
            None => "direct".to_string(),
            Some(address) => redact_address(address),
        }
    }
}

/// Removes the password from a proxy URL
pub fn redact_address(address: &str) -> String {
    match Url::parse(address) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => address.to_string(),
    }
}
