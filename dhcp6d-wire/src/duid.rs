//! DHCP Unique Identifiers (RFC 8415 section 11, RFC 6355)

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

pub const DUID_LLT: u16 = 1;
pub const DUID_EN: u16 = 2;
pub const DUID_LL: u16 = 3;
pub const DUID_UUID: u16 = 4;

/// DUIDs may not be longer than 128 octets, excluding the type code
pub const MAX_DUID_LEN: usize = 128;

/// Seconds between the Unix epoch and the DUID-LLT epoch (2000-01-01)
const DUID_TIME_EPOCH: u64 = 946_684_800;

/// The stable identity of a DHCPv6 client or server.
///
/// Two DUIDs are equal iff their octet representations are equal. Parsing is
/// canonical (a known type code always produces the matching variant), so
/// structural equality coincides with octet equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Duid {
    /// Link-layer address plus time (type 1)
    LinkLayerTime {
        hardware_type: u16,
        time: u32,
        link_layer_address: Vec<u8>,
    },
    /// Enterprise number plus opaque identifier (type 2)
    Enterprise {
        enterprise_number: u32,
        identifier: Vec<u8>,
    },
    /// Link-layer address (type 3)
    LinkLayer {
        hardware_type: u16,
        link_layer_address: Vec<u8>,
    },
    /// Universally unique identifier (type 4)
    Uuid { uuid: [u8; 16] },
    /// Unregistered DUID type, raw payload preserved
    Unknown { duid_type: u16, data: Vec<u8> },
}

impl Duid {
    /// The numeric DUID type code
    pub fn duid_type(&self) -> u16 {
        match self {
            Duid::LinkLayerTime { .. } => DUID_LLT,
            Duid::Enterprise { .. } => DUID_EN,
            Duid::LinkLayer { .. } => DUID_LL,
            Duid::Uuid { .. } => DUID_UUID,
            Duid::Unknown { duid_type, .. } => *duid_type,
        }
    }

    /// Generate a DUID-LLT for the given link-layer address with the current time
    pub fn generate_llt(hardware_type: u16, link_layer_address: &[u8]) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(DUID_TIME_EPOCH);
        Duid::LinkLayerTime {
            hardware_type,
            time: now.saturating_sub(DUID_TIME_EPOCH) as u32,
            link_layer_address: link_layer_address.to_vec(),
        }
    }

    /// Parse a DUID from the given buffer.
    ///
    /// The whole buffer is consumed: DUIDs are always the sole content of the
    /// option that carries them.
    pub fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < 2 {
            return Err(WireError::short("duid", 2 - buffer.len()));
        }
        if buffer.len() > MAX_DUID_LEN + 2 {
            return Err(WireError::InvalidLength {
                element: "duid",
                length: buffer.len(),
            });
        }

        let duid_type = u16::from_be_bytes([buffer[0], buffer[1]]);
        let payload = &buffer[2..];

        match duid_type {
            DUID_LLT => {
                if payload.len() < 6 {
                    return Err(WireError::short("duid-llt", 6 - payload.len()));
                }
                Ok(Duid::LinkLayerTime {
                    hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
                    time: u32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]),
                    link_layer_address: payload[6..].to_vec(),
                })
            }
            DUID_EN => {
                if payload.len() < 4 {
                    return Err(WireError::short("duid-en", 4 - payload.len()));
                }
                Ok(Duid::Enterprise {
                    enterprise_number: u32::from_be_bytes([
                        payload[0], payload[1], payload[2], payload[3],
                    ]),
                    identifier: payload[4..].to_vec(),
                })
            }
            DUID_LL => {
                if payload.len() < 2 {
                    return Err(WireError::short("duid-ll", 2 - payload.len()));
                }
                Ok(Duid::LinkLayer {
                    hardware_type: u16::from_be_bytes([payload[0], payload[1]]),
                    link_layer_address: payload[2..].to_vec(),
                })
            }
            DUID_UUID => {
                if payload.len() != 16 {
                    return Err(WireError::InvalidLength {
                        element: "duid-uuid",
                        length: payload.len(),
                    });
                }
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(payload);
                Ok(Duid::Uuid { uuid })
            }
            _ => Ok(Duid::Unknown {
                duid_type,
                data: payload.to_vec(),
            }),
        }
    }

    /// Serialize this DUID into the buffer
    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.duid_type());
        match self {
            Duid::LinkLayerTime {
                hardware_type,
                time,
                link_layer_address,
            } => {
                buffer.put_u16(*hardware_type);
                buffer.put_u32(*time);
                buffer.put_slice(link_layer_address);
            }
            Duid::Enterprise {
                enterprise_number,
                identifier,
            } => {
                buffer.put_u32(*enterprise_number);
                buffer.put_slice(identifier);
            }
            Duid::LinkLayer {
                hardware_type,
                link_layer_address,
            } => {
                buffer.put_u16(*hardware_type);
                buffer.put_slice(link_layer_address);
            }
            Duid::Uuid { uuid } => buffer.put_slice(uuid),
            Duid::Unknown { data, .. } => buffer.put_slice(data),
        }
    }

    /// The octet representation of this DUID, including the type code
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        self.save(&mut buffer);
        buffer.to_vec()
    }

    /// Validate the shape of this DUID
    pub fn validate(&self) -> Result<()> {
        let len = self.to_bytes().len();
        if len > MAX_DUID_LEN + 2 {
            return Err(WireError::InvalidLength {
                element: "duid",
                length: len,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Duid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}
