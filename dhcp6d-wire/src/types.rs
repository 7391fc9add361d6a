//! Common wire-level types

use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// A 24-bit DHCPv6 transaction id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TransactionId(pub [u8; 3]);

impl TransactionId {
    pub const fn new(bytes: [u8; 3]) -> Self {
        Self(bytes)
    }

    /// Generate a random transaction id
    pub fn random() -> Self {
        Self([rand::random(), rand::random(), rand::random()])
    }

    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl From<u32> for TransactionId {
    fn from(value: u32) -> Self {
        let b = value.to_be_bytes();
        Self([b[1], b[2], b[3]])
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// An IPv6 prefix: an address plus a prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ipv6Prefix {
    pub address: Ipv6Addr,
    pub length: u8,
}

impl Ipv6Prefix {
    pub fn new(address: Ipv6Addr, length: u8) -> Result<Self, WireError> {
        if length > 128 {
            return Err(WireError::malformed(format!("prefix length {}", length)));
        }
        Ok(Self { address, length })
    }

    /// Whether the given address falls within this prefix
    pub fn contains(&self, address: &Ipv6Addr) -> bool {
        if self.length == 0 {
            return true;
        }
        let own = u128::from_be_bytes(self.address.octets());
        let other = u128::from_be_bytes(address.octets());
        let mask = u128::MAX << (128 - self.length as u32);
        (own & mask) == (other & mask)
    }

    /// Whether this prefix overlaps the other prefix
    pub fn overlaps(&self, other: &Ipv6Prefix) -> bool {
        self.contains(&other.address) || other.contains(&self.address)
    }
}

impl FromStr for Ipv6Prefix {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| WireError::malformed(format!("prefix '{}'", s)))?;
        let address = addr
            .parse::<Ipv6Addr>()
            .map_err(|_| WireError::malformed(format!("prefix address '{}'", addr)))?;
        let length = len
            .parse::<u8>()
            .map_err(|_| WireError::malformed(format!("prefix length '{}'", len)))?;
        Ipv6Prefix::new(address, length)
    }
}

impl fmt::Display for Ipv6Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.length)
    }
}
