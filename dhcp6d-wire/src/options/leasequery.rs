//! Leasequery options (RFC 5007, RFC 5460)

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::duid::Duid;
use crate::error::{Result, WireError};
use crate::message::{Message, ParseContext};
use crate::options::basic::read_ipv6;
use crate::options::{check_containment, codes, parse_suboptions, Dhcp6Option};
use crate::registry::ContainerKey;

/// Leasequery query types
pub mod query_types {
    pub const BY_ADDRESS: u8 = 1;
    pub const BY_CLIENT_ID: u8 = 2;
    pub const BY_RELAY_ID: u8 = 3;
    pub const BY_LINK_ADDRESS: u8 = 4;
    pub const BY_REMOTE_ID: u8 = 5;
}

/// LQ Query (option 44): what the requestor wants to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LqQueryOption {
    pub query_type: u8,
    pub link_address: Ipv6Addr,
    pub options: Vec<Dhcp6Option>,
}

impl LqQueryOption {
    pub fn new(query_type: u8, link_address: Ipv6Addr, options: Vec<Dhcp6Option>) -> Self {
        Self {
            query_type,
            link_address,
            options,
        }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 17 {
            return Err(WireError::short("lq-query", 17 - payload.len()));
        }
        Ok(Self {
            query_type: payload[0],
            link_address: read_ipv6(&payload[1..17], "lq-query")?,
            options: parse_suboptions(&payload[17..], ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.query_type);
        buffer.put_slice(&self.link_address.octets());
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        check_containment(ContainerKey::Option(codes::LQ_QUERY), &self.options)?;
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// Client Data (option 45): one client's lease data in a leasequery reply
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientDataOption {
    pub options: Vec<Dhcp6Option>,
}

impl ClientDataOption {
    pub fn new(options: Vec<Dhcp6Option>) -> Self {
        Self { options }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        Ok(Self {
            options: parse_suboptions(payload, ctx)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }
}

/// CLT Time (option 46): seconds since the client last talked to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CltTimeOption {
    pub clt_time: u32,
}

impl CltTimeOption {
    pub fn new(clt_time: u32) -> Self {
        Self { clt_time }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != 4 {
            return Err(WireError::InvalidLength {
                element: "clt-time",
                length: payload.len(),
            });
        }
        Ok(Self {
            clt_time: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.clt_time);
    }
}

/// LQ Relay Data (option 47): the relay encapsulation seen for the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LqRelayDataOption {
    pub peer_address: Ipv6Addr,
    pub relay_message: Box<Message>,
}

impl LqRelayDataOption {
    pub fn new(peer_address: Ipv6Addr, relay_message: Message) -> Self {
        Self {
            peer_address,
            relay_message: Box::new(relay_message),
        }
    }

    pub(crate) fn from_payload(payload: &[u8], ctx: &ParseContext) -> Result<Self> {
        if payload.len() < 16 {
            return Err(WireError::short("lq-relay-data", 16 - payload.len()));
        }
        let peer_address = read_ipv6(&payload[..16], "lq-relay-data")?;
        let (consumed, message) = Message::parse_with(&payload[16..], ctx)?;
        if consumed != payload.len() - 16 {
            return Err(WireError::InvalidLength {
                element: "lq-relay-data",
                length: payload.len(),
            });
        }
        Ok(Self {
            peer_address,
            relay_message: Box::new(message),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.peer_address.octets());
        self.relay_message.save(buffer);
    }
}

/// LQ Client Link (option 48): links on which the client has bindings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LqClientLinkOption {
    pub link_addresses: Vec<Ipv6Addr>,
}

impl LqClientLinkOption {
    pub fn new(link_addresses: Vec<Ipv6Addr>) -> Self {
        Self { link_addresses }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() % 16 != 0 {
            return Err(WireError::InvalidLength {
                element: "lq-client-link",
                length: payload.len(),
            });
        }
        Ok(Self {
            link_addresses: payload
                .chunks_exact(16)
                .map(|chunk| {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(chunk);
                    Ipv6Addr::from(octets)
                })
                .collect(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        for address in &self.link_addresses {
            buffer.put_slice(&address.octets());
        }
    }
}

/// Relay-Id (option 53, RFC 5460): the DUID of a relay agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayIdOption {
    pub duid: Duid,
}

impl RelayIdOption {
    pub fn new(duid: Duid) -> Self {
        Self { duid }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            duid: Duid::parse(payload)?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        self.duid.save(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{ClientIdOption, IaAddressOption};

    fn ctx() -> ParseContext {
        ParseContext::default()
    }

    #[test]
    fn test_lq_query_roundtrip() {
        let option = Dhcp6Option::LeasequeryQuery(LqQueryOption::new(
            query_types::BY_ADDRESS,
            "2001:db8::".parse().unwrap(),
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::42".parse().unwrap(),
                0,
                0,
            ))],
        ));
        let bytes = option.to_bytes();
        let (_, parsed) = Dhcp6Option::parse(&bytes, &ctx()).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_client_data_roundtrip() {
        let option = Dhcp6Option::ClientData(ClientDataOption::new(vec![
            Dhcp6Option::ClientId(ClientIdOption::new(Duid::LinkLayer {
                hardware_type: 1,
                link_layer_address: vec![0, 1, 2, 3, 4, 5],
            })),
            Dhcp6Option::CltTime(CltTimeOption::new(300)),
        ]));
        let bytes = option.to_bytes();
        let (_, parsed) = Dhcp6Option::parse(&bytes, &ctx()).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_clt_time_length_check() {
        let bytes = [0x00, 0x2e, 0x00, 0x02, 0x00, 0x00];
        assert!(Dhcp6Option::parse(&bytes, &ctx()).is_err());
    }
}
