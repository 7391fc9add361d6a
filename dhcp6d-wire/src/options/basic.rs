//! Options with simple fixed or opaque payloads

use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::duid::Duid;
use crate::error::{Result, WireError};
use crate::options::status;

/// Client Identifier (option 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdOption {
    pub duid: Duid,
}

impl ClientIdOption {
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

/// Server Identifier (option 2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdOption {
    pub duid: Duid,
}

impl ServerIdOption {
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

/// Option Request (option 6): the option codes the client wants
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptionRequestOption {
    pub requested_options: Vec<u16>,
}

impl OptionRequestOption {
    pub fn new(requested_options: Vec<u16>) -> Self {
        Self { requested_options }
    }

    pub fn requests(&self, code: u16) -> bool {
        self.requested_options.contains(&code)
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() % 2 != 0 {
            return Err(WireError::InvalidLength {
                element: "option-request",
                length: payload.len(),
            });
        }
        Ok(Self {
            requested_options: payload
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        for code in &self.requested_options {
            buffer.put_u16(*code);
        }
    }
}

/// Preference (option 7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceOption {
    pub preference: u8,
}

impl PreferenceOption {
    pub fn new(preference: u8) -> Self {
        Self { preference }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != 1 {
            return Err(WireError::InvalidLength {
                element: "preference",
                length: payload.len(),
            });
        }
        Ok(Self {
            preference: payload[0],
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.preference);
    }
}

/// Elapsed Time (option 8), in centiseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElapsedTimeOption {
    pub elapsed_time: u16,
}

impl ElapsedTimeOption {
    pub fn new(elapsed_time: u16) -> Self {
        Self { elapsed_time }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != 2 {
            return Err(WireError::InvalidLength {
                element: "elapsed-time",
                length: payload.len(),
            });
        }
        Ok(Self {
            elapsed_time: u16::from_be_bytes([payload[0], payload[1]]),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.elapsed_time);
    }
}

/// Server Unicast (option 12): the client may contact us at this address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerUnicastOption {
    pub server_address: Ipv6Addr,
}

impl ServerUnicastOption {
    pub fn new(server_address: Ipv6Addr) -> Self {
        Self { server_address }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            server_address: read_ipv6(payload, "server-unicast")?,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.server_address.octets());
    }
}

/// Status Code (option 13)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodeOption {
    pub status_code: u16,
    pub status_message: String,
}

impl StatusCodeOption {
    pub fn new(status_code: u16, status_message: impl Into<String>) -> Self {
        Self {
            status_code,
            status_message: status_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == status::SUCCESS
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(WireError::short("status-code", 2 - payload.len()));
        }
        let status_message = std::str::from_utf8(&payload[2..])
            .map_err(|_| WireError::malformed("status message encoding"))?
            .to_string();
        Ok(Self {
            status_code: u16::from_be_bytes([payload[0], payload[1]]),
            status_message,
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.status_code);
        buffer.put_slice(self.status_message.as_bytes());
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.status_message.len() > u16::MAX as usize - 2 {
            return Err(WireError::InvalidLength {
                element: "status-code",
                length: self.status_message.len(),
            });
        }
        Ok(())
    }
}

/// Rapid Commit (option 14): empty marker option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RapidCommitOption;

impl RapidCommitOption {
    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if !payload.is_empty() {
            return Err(WireError::InvalidLength {
                element: "rapid-commit",
                length: payload.len(),
            });
        }
        Ok(Self)
    }

    pub(crate) fn save_payload(&self, _buffer: &mut BytesMut) {}
}

/// Interface-Id (option 18): opaque relay-assigned interface identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIdOption {
    pub interface_id: Vec<u8>,
}

impl InterfaceIdOption {
    pub fn new(interface_id: impl Into<Vec<u8>>) -> Self {
        Self {
            interface_id: interface_id.into(),
        }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            interface_id: payload.to_vec(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.interface_id);
    }
}

/// Remote-Id (option 37, RFC 4649)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdOption {
    pub enterprise_number: u32,
    pub remote_id: Vec<u8>,
}

impl RemoteIdOption {
    pub fn new(enterprise_number: u32, remote_id: Vec<u8>) -> Self {
        Self {
            enterprise_number,
            remote_id,
        }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 4 {
            return Err(WireError::short("remote-id", 4 - payload.len()));
        }
        Ok(Self {
            enterprise_number: u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]),
            remote_id: payload[4..].to_vec(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u32(self.enterprise_number);
        buffer.put_slice(&self.remote_id);
    }
}

/// Subscriber-Id (option 38, RFC 4580)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberIdOption {
    pub subscriber_id: Vec<u8>,
}

impl SubscriberIdOption {
    pub fn new(subscriber_id: Vec<u8>) -> Self {
        Self { subscriber_id }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            subscriber_id: payload.to_vec(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.subscriber_id);
    }
}

/// Client Link-Layer Address (option 79, RFC 6939)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLinkLayerAddressOption {
    pub hardware_type: u16,
    pub address: Vec<u8>,
}

impl ClientLinkLayerAddressOption {
    pub fn new(hardware_type: u16, address: Vec<u8>) -> Self {
        Self {
            hardware_type,
            address,
        }
    }

    pub(crate) fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < 2 {
            return Err(WireError::short("client-linklayer-address", 2 - payload.len()));
        }
        Ok(Self {
            hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
            address: payload[2..].to_vec(),
        })
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.hardware_type);
        buffer.put_slice(&self.address);
    }
}

/// Any option whose code has no registry entry; raw payload preserved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOption {
    pub code: u16,
    pub data: Vec<u8>,
}

impl UnknownOption {
    pub fn new(code: u16, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub(crate) fn save_payload(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.data);
    }
}

pub(crate) fn read_ipv6(payload: &[u8], element: &'static str) -> Result<Ipv6Addr> {
    if payload.len() != 16 {
        return Err(WireError::InvalidLength {
            element,
            length: payload.len(),
        });
    }
    let mut octets = [0u8; 16];
    octets.copy_from_slice(payload);
    Ok(Ipv6Addr::from(octets))
}
