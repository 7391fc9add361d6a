//! Rate limiting of clients that keep rapidly sending requests
//!
//! The most common reason a client hammers the server is that it got an
//! answer it didn't like. The best way to slow it down is to stop answering,
//! so the limiter trips in the pre phase with a silent drop.

use std::time::Instant;

use dashmap::DashMap;
use std::sync::Arc;

use dhcp6d_core::store::hex_encode;
use dhcp6d_core::{Abort, Handler, HandlerResult, TransactionBundle};
use dhcp6d_wire::options::{codes, Dhcp6Option};
use tracing::{debug, info};

/// Which request property the limiter buckets on. Everything falls back to
/// the client DUID when the chosen key is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKey {
    Duid,
    InterfaceId,
    RemoteId,
    SubscriberId,
    LinklayerId,
}

impl RateLimitKey {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "duid" => Some(Self::Duid),
            "interface-id" => Some(Self::InterfaceId),
            "remote-id" => Some(Self::RemoteId),
            "subscriber-id" => Some(Self::SubscriberId),
            "linklayer-id" => Some(Self::LinklayerId),
            _ => None,
        }
    }
}

/// Token-bucket counters shared by every worker's handler instance
pub struct RateLimitCounters {
    buckets: DashMap<String, (f64, Instant)>,
    rate_per_second: f64,
    burst: f64,
    dropped: std::sync::atomic::AtomicU64,
}

impl RateLimitCounters {
    pub fn new(rate: u32, per: u32, burst: Option<u32>) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_second: rate as f64 / per.max(1) as f64,
            burst: burst.unwrap_or(rate) as f64,
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// How many requests this limiter has dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Whether a request under this key is still within limits
    pub fn check_request(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert((self.burst, now));
        let (allowance, last_check) = *entry;

        // Add allowance for the time waited, but no saving up beyond burst
        let mut allowance = allowance + now.duration_since(last_check).as_secs_f64() * self.rate_per_second;
        if allowance > self.burst {
            allowance = self.burst;
        }

        let allow = allowance >= 1.0;
        if allow {
            allowance -= 1.0;
        } else {
            self.dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        *entry = (allowance, now);
        debug!(key, allowance, "rate limit check");
        allow
    }
}

/// Drops requests from clients exceeding the configured rate
pub struct RateLimitHandler {
    key: RateLimitKey,
    counters: Arc<RateLimitCounters>,
}

impl RateLimitHandler {
    pub fn new(key: RateLimitKey, counters: Arc<RateLimitCounters>) -> Self {
        Self { key, counters }
    }

    fn duid_key(bundle: &TransactionBundle) -> String {
        match bundle.request.client_id() {
            Some(duid) => format!("duid:{}", duid),
            None => "duid:unknown".to_string(),
        }
    }

    /// The bucket key for this request, falling back to the DUID
    fn key_for(&self, bundle: &TransactionBundle) -> String {
        match self.key {
            RateLimitKey::Duid => Self::duid_key(bundle),
            RateLimitKey::InterfaceId => match bundle.get_relay_option(codes::INTERFACE_ID, true) {
                Some(Dhcp6Option::InterfaceId(option)) => {
                    format!("interface-id:{}", hex_encode(&option.interface_id))
                }
                _ => Self::duid_key(bundle),
            },
            RateLimitKey::RemoteId => match bundle.get_relay_option(codes::REMOTE_ID, true) {
                Some(Dhcp6Option::RemoteId(option)) => format!(
                    "remote-id:{}:{}",
                    option.enterprise_number,
                    hex_encode(&option.remote_id)
                ),
                _ => Self::duid_key(bundle),
            },
            RateLimitKey::SubscriberId => match bundle.get_relay_option(codes::SUBSCRIBER_ID, true)
            {
                Some(Dhcp6Option::SubscriberId(option)) => {
                    format!("subscriber-id:{}", hex_encode(&option.subscriber_id))
                }
                _ => Self::duid_key(bundle),
            },
            RateLimitKey::LinklayerId => {
                match bundle.get_relay_option(codes::CLIENT_LINKLAYER_ADDRESS, true) {
                    Some(Dhcp6Option::ClientLinkLayerAddress(option)) => format!(
                        "linklayer-id:{}:{}",
                        option.hardware_type,
                        hex_encode(&option.address)
                    ),
                    _ => Self::duid_key(bundle),
                }
            }
        }
    }
}

impl Handler for RateLimitHandler {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let key = self.key_for(bundle);
        if !self.counters.check_request(&key) {
            info!(key, "client exceeded rate limit");
            return Err(Abort::Ignore);
        }
        Ok(())
    }
}
