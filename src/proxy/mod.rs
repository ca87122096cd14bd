//! Outbound endpoint pool
//!
//! Requests are spread round-robin over the configured proxies (or a single
//! direct connection). Endpoints that keep failing are disabled with an
//! exponentially growing cooldown and re-enabled once it expires.

mod endpoint;
mod pool;

pub use endpoint::{redact_address, CooldownPolicy, ProxyEndpoint};
pub use pool::{EndpointSnapshot, Outcome, PoolExhausted, PoolSettings, ProxyLease, ProxyPool};
