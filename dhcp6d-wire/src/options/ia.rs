//! Identity association options: IA_NA, IA_TA, IA_PD and their leases

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::message::ParseContext;
use crate::options::basic::read_ipv6;
use crate::options::{
    check_containment, codes, parse_suboptions, Dhcp6Option, StatusCodeOption,
};
use crate::registry::ContainerKey;
use crate::types::Ipv6Prefix;
use crate::INFINITY;

/// Identity Association for Non-temporary Addresses (option 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaNaOption {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<Dhcp6Option>,
}

impl IaNaOption {
    pub fn new(iaid: u32, t1: u32, t2: u32, options: Vec<Dhcp6Option>) -> Self {
        Self {
            iaid,
            t1,
            t2,
            options,
        }
    }

    /// The addresses leased in this IA
    pub fn addresses(&self) -> Vec<Ipv6Addr> {
        ia_addresses(&self.options)
    }

    /// The first status code sub-option, if any
    pub fn status(&self) -> Option<&StatusCodeOption> {
        ia_status(&self.options)
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 12 {
            return Err(WireError::short("ia-na", 12 - payload.len()));
        }
        Ok(Self {
            iaid: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            t1: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            t2: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
            options: parse_suboptions(&payload[12..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.iaid);
        buffer.put_u32(self.t1);
        buffer.put_u32(self.t2);
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_timers("ia-na", self.t1, self.t2, shortest_preferred(&self.options))?;
        check_containment(ContainerKey::Option(codes::IA_NA), &self.options)?;
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// Identity Association for Temporary Addresses (option 4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaTaOption {
    pub iaid: u32,
    pub options: Vec<Dhcp6Option>,
}

impl IaTaOption {
    pub fn new(iaid: u32, options: Vec<Dhcp6Option>) -> Self {
        Self { iaid, options }
    }

    pub fn addresses(&self) -> Vec<Ipv6Addr> {
        ia_addresses(&self.options)
    }

    pub fn status(&self) -> Option<&StatusCodeOption> {
        ia_status(&self.options)
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 4 {
            return Err(WireError::short("ia-ta", 4 - payload.len()));
        }
        Ok(Self {
            iaid: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            options: parse_suboptions(&payload[4..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.iaid);
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_containment(ContainerKey::Option(codes::IA_TA), &self.options)?;
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// IA Address (option 5): one leased address inside an IA_NA or IA_TA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaAddressOption {
    pub address: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: Vec<Dhcp6Option>,
}

impl IaAddressOption {
    pub fn new(address: Ipv6Addr, preferred_lifetime: u32, valid_lifetime: u32) -> Self {
        Self {
            address,
            preferred_lifetime,
            valid_lifetime,
            options: Vec::new(),
        }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 24 {
            return Err(WireError::short("ia-address", 24 - payload.len()));
        }
        Ok(Self {
            address: read_ipv6(&payload[..16], "ia-address")?,
            preferred_lifetime: u32::from_be_bytes([
                payload[16], payload[17], payload[18], payload[19],
            ]),
            valid_lifetime: u32::from_be_bytes([
                payload[20], payload[21], payload[22], payload[23],
            ]),
            options: parse_suboptions(&payload[24..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.address.octets());
        buffer.put_u32(self.preferred_lifetime);
        buffer.put_u32(self.valid_lifetime);
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.preferred_lifetime > self.valid_lifetime {
            return Err(WireError::malformed(format!(
                "preferred lifetime {} exceeds valid lifetime {}",
                self.preferred_lifetime, self.valid_lifetime
            )));
        }
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// Identity Association for Prefix Delegation (option 25, RFC 8415)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaPdOption {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub options: Vec<Dhcp6Option>,
}

impl IaPdOption {
    pub fn new(iaid: u32, t1: u32, t2: u32, options: Vec<Dhcp6Option>) -> Self {
        Self {
            iaid,
            t1,
            t2,
            options,
        }
    }

    /// The prefixes delegated in this IA
    pub fn prefixes(&self) -> Vec<Ipv6Prefix> {
        self.options
            .iter()
            .filter_map(|option| match option {
                Dhcp6Option::IaPrefix(p) => Some(p.prefix),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self) -> Option<&StatusCodeOption> {
        ia_status(&self.options)
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 12 {
            return Err(WireError::short("ia-pd", 12 - payload.len()));
        }
        Ok(Self {
            iaid: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            t1: u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]),
            t2: u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]),
            options: parse_suboptions(&payload[12..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.iaid);
        buffer.put_u32(self.t1);
        buffer.put_u32(self.t2);
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_timers("ia-pd", self.t1, self.t2, shortest_preferred(&self.options))?;
        check_containment(ContainerKey::Option(codes::IA_PD), &self.options)?;
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// IA Prefix (option 26): one delegated prefix inside an IA_PD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaPrefixOption {
    pub prefix: Ipv6Prefix,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
    pub options: Vec<Dhcp6Option>,
}

impl IaPrefixOption {
    pub fn new(prefix: Ipv6Prefix, preferred_lifetime: u32, valid_lifetime: u32) -> Self {
        Self {
            prefix,
            preferred_lifetime,
            valid_lifetime,
            options: Vec::new(),
        }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 25 {
            return Err(WireError::short("ia-prefix", 25 - payload.len()));
        }
        let preferred_lifetime =
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let valid_lifetime = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        let length = payload[8];
        let address = read_ipv6(&payload[9..25], "ia-prefix")?;
        Ok(Self {
            prefix: Ipv6Prefix::new(address, length)?,
            preferred_lifetime,
            valid_lifetime,
            options: parse_suboptions(&payload[25..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.preferred_lifetime);
        buffer.put_u32(self.valid_lifetime);
        buffer.put_u8(self.prefix.length);
        buffer.put_slice(&self.prefix.address.octets());
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.preferred_lifetime > self.valid_lifetime {
            return Err(WireError::malformed(format!(
                "preferred lifetime {} exceeds valid lifetime {}",
                self.preferred_lifetime, self.valid_lifetime
            )));
        }
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

fn ia_addresses(options: &[Dhcp6Option]) -> Vec<Ipv6Addr> {
    options
        .iter()
        .filter_map(|option| match option {
            Dhcp6Option::IaAddress(a) => Some(a.address),
            _ => None,
        })
        .collect()
}

fn ia_status(options: &[Dhcp6Option]) -> Option<&StatusCodeOption> {
    options.iter().find_map(|option| match option {
        Dhcp6Option::StatusCode(s) => Some(s),
        _ => None,
    })
}

/// Shortest preferred lifetime among the leases of an IA, if it has any
pub(crate) fn shortest_preferred(options: &[Dhcp6Option]) -> Option<u32> {
    options
        .iter()
        .filter_map(|option| match option {
            Dhcp6Option::IaAddress(a) => Some(a.preferred_lifetime),
            Dhcp6Option::IaPrefix(p) => Some(p.preferred_lifetime),
            _ => None,
        })
        .min()
}

/// T1 <= T2 <= shortest preferred lifetime; INFINITY-aware
fn validate_timers(element: &'static str, t1: u32, t2: u32, shortest: Option<u32>) -> Result<()> {
    if t2 != 0 && t1 > t2 {
        return Err(WireError::malformed(format!("{} has t1 {} above t2 {}", element, t1, t2)));
    }
    if let Some(shortest) = shortest {
        if shortest != INFINITY && t2 != 0 && t2 > shortest {
            return Err(WireError::malformed(format!(
                "{} has t2 {} above shortest preferred lifetime {}",
                element, t2, shortest
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ParseContext;

    fn ctx() -> ParseContext {
        ParseContext::default()
    }

    #[test]
    fn test_ia_na_roundtrip() {
        let option = Dhcp6Option::IaNa(IaNaOption::new(
            1,
            1800,
            2880,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::42".parse().unwrap(),
                3600,
                7200,
            ))],
        ));
        let bytes = option.to_bytes();
        let (consumed, parsed) = Dhcp6Option::parse(&bytes, &ctx()).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_ia_na_addresses() {
        let ia = IaNaOption::new(
            7,
            0,
            0,
            vec![
                Dhcp6Option::IaAddress(IaAddressOption::new("2001:db8::1".parse().unwrap(), 1, 2)),
                Dhcp6Option::IaAddress(IaAddressOption::new("2001:db8::2".parse().unwrap(), 1, 2)),
            ],
        );
        assert_eq!(
            ia.addresses(),
            vec![
                "2001:db8::1".parse::<Ipv6Addr>().unwrap(),
                "2001:db8::2".parse().unwrap()
            ]
        );
    }

    #[test]
    fn test_ia_prefix_roundtrip() {
        let option = Dhcp6Option::IaPrefix(IaPrefixOption::new(
            "2001:db8:1200::/56".parse().unwrap(),
            3600,
            7200,
        ));
        let bytes = option.to_bytes();
        // preferred(4) + valid(4) + length(1) + prefix(16) behind the header
        assert_eq!(bytes.len(), 4 + 25);
        let (_, parsed) = Dhcp6Option::parse(&bytes, &ctx()).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_ia_pd_prefixes() {
        let ia = IaPdOption::new(
            1,
            0,
            0,
            vec![Dhcp6Option::IaPrefix(IaPrefixOption::new(
                "2001:db8:1200::/56".parse().unwrap(),
                3600,
                7200,
            ))],
        );
        assert_eq!(ia.prefixes(), vec!["2001:db8:1200::/56".parse().unwrap()]);
    }

    #[test]
    fn test_timer_invariant() {
        let ia = IaNaOption::new(
            1,
            2880,
            1800,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::1".parse().unwrap(),
                3600,
                7200,
            ))],
        );
        assert!(ia.validate().is_err());
    }

    #[test]
    fn test_t2_bounded_by_preferred() {
        let ia = IaNaOption::new(
            1,
            100,
            4000,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::1".parse().unwrap(),
                3600,
                7200,
            ))],
        );
        assert!(ia.validate().is_err());
    }

    #[test]
    fn test_infinite_preferred_allows_any_t2() {
        let ia = IaNaOption::new(
            1,
            100,
            4000,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::1".parse().unwrap(),
                INFINITY,
                INFINITY,
            ))],
        );
        assert!(ia.validate().is_ok());
    }

    #[test]
    fn test_truncated_ia_na() {
        let bytes = [0x00, 0x03, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01];
        assert!(matches!(
            Dhcp6Option::parse(&bytes, &ctx()),
            Err(WireError::InsufficientData { .. })
        ));
    }
}
