//! DNS configuration options (RFC 3646)

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::name::DomainName;

/// DNS Recursive Name Servers (option 23)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsServersOption {
    pub dns_servers: Vec<Ipv6Addr>,
}

impl DnsServersOption {
    pub fn new(dns_servers: Vec<Ipv6Addr>) -> Self {
        Self { dns_servers }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() % 16 != 0 {
            return Err(WireError::InvalidLength {
                element: "dns-servers",
                length: payload.len(),
            });
        }
        Ok(Self {
            dns_servers: payload
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
        for server in &self.dns_servers {
            buffer.put_slice(&server.octets());
        }
    }
}

/// Domain Search List (option 24): absolute domain names in wire format
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomainSearchListOption {
    pub search_list: Vec<DomainName>,
}

impl DomainSearchListOption {
    pub fn new(search_list: Vec<DomainName>) -> Self {
        Self { search_list }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut search_list = Vec::new();
        let mut offset = 0;
        while offset < payload.len() {
            let (consumed, name) = DomainName::parse(&payload[offset..], false)?;
            search_list.push(name);
            offset += consumed;
        }
        Ok(Self { search_list })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        for name in &self.search_list {
            name.save(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ParseContext;
    use crate::options::Dhcp6Option;

    #[test]
    fn test_dns_servers_roundtrip() {
        let option = Dhcp6Option::DnsServers(DnsServersOption::new(vec![
            "2001:4860:4860::8888".parse().unwrap(),
            "2001:4860:4860::8844".parse().unwrap(),
        ]));
        let bytes = option.to_bytes();
        let (_, parsed) = Dhcp6Option::parse(&bytes, &ParseContext::default()).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_dns_servers_bad_length() {
        let bytes = [0x00, 0x17, 0x00, 0x02, 0x20, 0x01];
        assert!(Dhcp6Option::parse(&bytes, &ParseContext::default()).is_err());
    }

    #[test]
    fn test_search_list_roundtrip() {
        let option = Dhcp6Option::DomainSearchList(DomainSearchListOption::new(vec![
            DomainName::from_text("example.com.").unwrap(),
            DomainName::from_text("example.net.").unwrap(),
        ]));
        let bytes = option.to_bytes();
        let (_, parsed) = Dhcp6Option::parse(&bytes, &ParseContext::default()).unwrap();
        assert_eq!(parsed, option);
    }

    #[test]
    fn test_search_list_requires_absolute_names() {
        // One relative name (no root label) inside the option payload
        let bytes = [0x00, 0x18, 0x00, 0x04, 3, b'f', b'o', b'o'];
        assert!(Dhcp6Option::parse(&bytes, &ParseContext::default()).is_err());
    }
}
