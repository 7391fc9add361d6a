//! Domain names in DNS wire format (RFC 1035 labels, RFC 3596 for IDN)
//!
//! DHCPv6 options carry domain names as length-prefixed label sequences
//! without compression. A name that ends with the zero-length root label is
//! *absolute*; a name that simply runs out of buffer is *relative*. Both
//! forms round-trip exactly: the raw label bytes are kept as parsed.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};

/// Longest label allowed on the wire
pub const MAX_LABEL_LEN: usize = 63;
/// Longest name allowed on the wire, including length bytes and root label
pub const MAX_NAME_LEN: usize = 255;

/// A domain name holding its exact wire representation.
///
/// Unicode input is converted to A-labels when the name is built from text;
/// `to_unicode` converts back for presentation without touching the stored
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName {
    wire: Vec<u8>,
}

impl DomainName {
    /// Build a name from presentation format.
    ///
    /// A trailing dot makes the name absolute. Non-ASCII labels are encoded
    /// as A-labels.
    pub fn from_text(name: &str) -> Result<Self> {
        let (body, absolute) = match name.strip_suffix('.') {
            Some(rest) => (rest, true),
            None => (name, false),
        };

        // The root name itself
        if body.is_empty() {
            return if absolute {
                Ok(DomainName { wire: vec![0] })
            } else {
                Err(WireError::malformed("empty domain name"))
            };
        }

        let ascii = if body.is_ascii() {
            body.to_ascii_lowercase()
        } else {
            idna::domain_to_ascii(body)
                .map_err(|_| WireError::malformed(format!("domain name '{}'", body)))?
        };

        let mut wire = Vec::with_capacity(ascii.len() + 2);
        for label in ascii.split('.') {
            if label.is_empty() || label.len() > MAX_LABEL_LEN {
                return Err(WireError::malformed(format!("domain label '{}'", label)));
            }
            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }
        if absolute {
            wire.push(0);
        }
        if wire.len() > MAX_NAME_LEN {
            return Err(WireError::malformed(format!("domain name '{}' too long", name)));
        }

        Ok(DomainName { wire })
    }

    /// Parse one name from the start of the buffer.
    ///
    /// Returns the number of bytes consumed. When `allow_relative` is false a
    /// name that runs out of buffer before the root label is malformed.
    pub fn parse(buffer: &[u8], allow_relative: bool) -> Result<(usize, Self)> {
        let mut offset = 0;
        loop {
            if offset >= buffer.len() {
                if allow_relative && offset > 0 {
                    return Ok((offset, DomainName { wire: buffer[..offset].to_vec() }));
                }
                return Err(WireError::malformed("truncated domain name"));
            }

            let label_len = buffer[offset] as usize;
            if label_len == 0 {
                // Root label: absolute name complete
                offset += 1;
                return Ok((offset, DomainName { wire: buffer[..offset].to_vec() }));
            }
            if label_len > MAX_LABEL_LEN {
                // Includes compression pointers, which DHCPv6 forbids
                return Err(WireError::malformed("non-canonical domain label"));
            }
            if offset + 1 + label_len > buffer.len() {
                return Err(WireError::malformed("domain label past end of buffer"));
            }
            offset += 1 + label_len;
            if offset > MAX_NAME_LEN {
                return Err(WireError::malformed("domain name too long"));
            }
        }
    }

    /// Serialize the stored wire bytes
    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_slice(&self.wire);
    }

    /// Length of the wire representation
    pub fn wire_len(&self) -> usize {
        self.wire.len()
    }

    /// The raw wire bytes as parsed or built
    pub fn as_wire(&self) -> &[u8] {
        &self.wire
    }

    /// Whether the name carries the terminating root label
    pub fn is_absolute(&self) -> bool {
        self.wire.last() == Some(&0)
    }

    /// The labels of this name, without length bytes or the root label
    pub fn labels(&self) -> Vec<&[u8]> {
        let mut labels = Vec::new();
        let mut offset = 0;
        while offset < self.wire.len() {
            let len = self.wire[offset] as usize;
            if len == 0 {
                break;
            }
            labels.push(&self.wire[offset + 1..offset + 1 + len]);
            offset += 1 + len;
        }
        labels
    }

    /// ASCII presentation (A-labels left as-is), no trailing dot
    pub fn to_ascii(&self) -> String {
        self.labels()
            .iter()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Unicode presentation: A-labels converted back to U-labels
    pub fn to_unicode(&self) -> String {
        let (unicode, _) = idna::domain_to_unicode(&self.to_ascii());
        unicode
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_unicode())?;
        if self.is_absolute() {
            write!(f, ".")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_has_root_label() {
        let name = DomainName::from_text("example.com.").unwrap();
        assert!(name.is_absolute());
        assert_eq!(
            name.as_wire(),
            &[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0]
        );
    }

    #[test]
    fn test_relative_has_no_root_label() {
        let name = DomainName::from_text("example.com").unwrap();
        assert!(!name.is_absolute());
        assert_eq!(
            name.as_wire(),
            &[7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm']
        );
    }

    #[test]
    fn test_idn_encodes_as_a_labels() {
        let name = DomainName::from_text("bücher.example").unwrap();
        let wire = name.as_wire();
        // First label must be the A-label form
        let first_len = wire[0] as usize;
        assert_eq!(&wire[1..1 + first_len], b"xn--bcher-kva");
        // Presentation converts back to U-labels
        assert_eq!(name.to_unicode(), "bücher.example");
    }

    #[test]
    fn test_idn_roundtrip_preserves_bytes() {
        let name = DomainName::from_text("bücher.example.").unwrap();
        let (consumed, parsed) = DomainName::parse(name.as_wire(), false).unwrap();
        assert_eq!(consumed, name.wire_len());
        assert_eq!(parsed, name);
    }

    #[test]
    fn test_parse_relative() {
        let wire = [3, b'f', b'o', b'o'];
        let (consumed, name) = DomainName::parse(&wire, true).unwrap();
        assert_eq!(consumed, 4);
        assert!(!name.is_absolute());
        assert_eq!(name.to_ascii(), "foo");
    }

    #[test]
    fn test_parse_relative_disallowed() {
        let wire = [3, b'f', b'o', b'o'];
        assert!(DomainName::parse(&wire, false).is_err());
    }

    #[test]
    fn test_compression_pointer_rejected() {
        let wire = [0xc0, 0x04];
        assert!(matches!(
            DomainName::parse(&wire, true),
            Err(WireError::MalformedField(_))
        ));
    }

    #[test]
    fn test_label_past_buffer_rejected() {
        let wire = [5, b'a', b'b'];
        assert!(DomainName::parse(&wire, true).is_err());
    }

    #[test]
    fn test_root_name() {
        let name = DomainName::from_text(".").unwrap();
        assert!(name.is_absolute());
        assert_eq!(name.as_wire(), &[0]);
    }
}
