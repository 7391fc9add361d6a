//! The pluggable leasequery store contract

use std::net::Ipv6Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dhcp6d_wire::{Duid, Ipv6Prefix};

use crate::bundle::TransactionBundle;
use crate::error::Result;

/// What a lease record binds to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseBinding {
    Address {
        address: Ipv6Addr,
    },
    Prefix {
        prefix: Ipv6Prefix,
    },
}

/// One lease as the store remembers it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    /// Hex octets of the client DUID
    pub client_duid: String,
    /// The link the client was seen on
    pub link_address: Ipv6Addr,
    pub iaid: u32,
    pub binding: LeaseBinding,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    /// When the client last transacted with us
    pub last_transaction: DateTime<Utc>,
    /// Hex octets of the remote-id, when a relay provided one
    pub remote_id: Option<String>,
    /// Hex octets of the relay DUID, when a relay provided one
    pub relay_id: Option<String>,
}

impl LeaseRecord {
    pub fn duid(&self) -> Option<Duid> {
        let bytes = hex_decode(&self.client_duid)?;
        Duid::parse(&bytes).ok()
    }
}

/// How a leasequery narrows down the records it wants
#[derive(Debug, Clone)]
pub enum LeaseQuerySelector {
    ByAddress(Ipv6Addr),
    ByClientId(Duid),
    ByRelayId(Duid),
    ByLinkAddress(Ipv6Addr),
    ByRemoteId { enterprise_number: u32, remote_id: Vec<u8> },
}

/// The store the leasequery machinery talks to.
///
/// `record` runs in the post phase for successful replies; `query` runs from
/// the leasequery handler. Implementations synchronize themselves; the
/// typical shape is one handle per worker.
pub trait LeaseStore: Send + Sync {
    /// Remember the leases a finished transaction assigned
    fn record(&self, bundle: &TransactionBundle) -> Result<()>;

    /// All records matching the selector
    fn query(&self, selector: &LeaseQuerySelector) -> Result<Vec<LeaseRecord>>;
}

/// Render octets the way DUIDs appear in logs and stores
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&text[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let bytes = vec![0x00, 0x03, 0x00, 0x01, 0xab, 0xcd];
        let text = hex_encode(&bytes);
        assert_eq!(text, "00030001abcd");
        assert_eq!(hex_decode(&text), Some(bytes));
    }

    #[test]
    fn test_record_duid_decodes() {
        let duid = Duid::LinkLayer {
            hardware_type: 1,
            link_layer_address: vec![1, 2, 3, 4, 5, 6],
        };
        let record = LeaseRecord {
            client_duid: hex_encode(&duid.to_bytes()),
            link_address: "2001:db8::".parse().unwrap(),
            iaid: 1,
            binding: LeaseBinding::Address {
                address: "2001:db8::42".parse().unwrap(),
            },
            preferred_lifetime: 3600,
            valid_lifetime: 7200,
            last_transaction: Utc::now(),
            remote_id: None,
            relay_id: None,
        };
        assert_eq!(record.duid(), Some(duid));
    }
}
