//! DHCPv6 options (RFC 8415 section 21 and extensions)
//!
//! Options are TLV encoded: a 2-byte code, a 2-byte length and the payload.
//! Parsing dispatches through the option registry; codes without a registry
//! entry round-trip as [`UnknownOption`].

mod basic;
mod dns;
mod ia;
mod leasequery;
mod relay;

pub use basic::{
    ClientIdOption, ClientLinkLayerAddressOption, ElapsedTimeOption, InterfaceIdOption,
    OptionRequestOption, PreferenceOption, RapidCommitOption, RemoteIdOption, ServerIdOption,
    ServerUnicastOption, StatusCodeOption, SubscriberIdOption, UnknownOption,
};
pub use dns::{DnsServersOption, DomainSearchListOption};
pub use ia::{IaAddressOption, IaNaOption, IaPdOption, IaPrefixOption, IaTaOption};
pub use leasequery::query_types;
pub use leasequery::{
    ClientDataOption, CltTimeOption, LqClientLinkOption, LqQueryOption, LqRelayDataOption,
    RelayIdOption,
};
pub use relay::RelayMessageOption;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::message::ParseContext;
use crate::registry::{registry, ContainerKey};

/// Option codes for everything this crate knows how to decode
pub mod codes {
    pub const CLIENT_ID: u16 = 1;
    pub const SERVER_ID: u16 = 2;
    pub const IA_NA: u16 = 3;
    pub const IA_TA: u16 = 4;
    pub const IA_ADDRESS: u16 = 5;
    pub const OPTION_REQUEST: u16 = 6;
    pub const PREFERENCE: u16 = 7;
    pub const ELAPSED_TIME: u16 = 8;
    pub const RELAY_MESSAGE: u16 = 9;
    pub const SERVER_UNICAST: u16 = 12;
    pub const STATUS_CODE: u16 = 13;
    pub const RAPID_COMMIT: u16 = 14;
    pub const INTERFACE_ID: u16 = 18;
    pub const DNS_SERVERS: u16 = 23;
    pub const DOMAIN_SEARCH_LIST: u16 = 24;
    pub const IA_PD: u16 = 25;
    pub const IA_PREFIX: u16 = 26;
    pub const REMOTE_ID: u16 = 37;
    pub const SUBSCRIBER_ID: u16 = 38;
    pub const LQ_QUERY: u16 = 44;
    pub const CLIENT_DATA: u16 = 45;
    pub const CLT_TIME: u16 = 46;
    pub const LQ_RELAY_DATA: u16 = 47;
    pub const LQ_CLIENT_LINK: u16 = 48;
    pub const RELAY_ID: u16 = 53;
    pub const CLIENT_LINKLAYER_ADDRESS: u16 = 79;
}

/// Status codes carried in [`StatusCodeOption`]
pub mod status {
    pub const SUCCESS: u16 = 0;
    pub const UNSPEC_FAIL: u16 = 1;
    pub const NO_ADDRS_AVAIL: u16 = 2;
    pub const NO_BINDING: u16 = 3;
    pub const NOT_ON_LINK: u16 = 4;
    pub const USE_MULTICAST: u16 = 5;
    pub const NO_PREFIX_AVAIL: u16 = 6;
    pub const UNKNOWN_QUERY_TYPE: u16 = 7;
    pub const MALFORMED_QUERY: u16 = 8;
    pub const NOT_CONFIGURED: u16 = 9;
    pub const NOT_ALLOWED: u16 = 10;
    pub const QUERY_TERMINATED: u16 = 11;
}

/// The kind of identity association an IA option represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IaKind {
    /// Non-temporary addresses (IA_NA)
    Na,
    /// Temporary addresses (IA_TA)
    Ta,
    /// Prefix delegation (IA_PD)
    Pd,
}

/// A single DHCPv6 option
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6Option {
    ClientId(ClientIdOption),
    ServerId(ServerIdOption),
    IaNa(IaNaOption),
    IaTa(IaTaOption),
    IaAddress(IaAddressOption),
    OptionRequest(OptionRequestOption),
    Preference(PreferenceOption),
    ElapsedTime(ElapsedTimeOption),
    RelayMessage(RelayMessageOption),
    ServerUnicast(ServerUnicastOption),
    StatusCode(StatusCodeOption),
    RapidCommit(RapidCommitOption),
    InterfaceId(InterfaceIdOption),
    DnsServers(DnsServersOption),
    DomainSearchList(DomainSearchListOption),
    IaPd(IaPdOption),
    IaPrefix(IaPrefixOption),
    RemoteId(RemoteIdOption),
    SubscriberId(SubscriberIdOption),
    LeasequeryQuery(LqQueryOption),
    ClientData(ClientDataOption),
    CltTime(CltTimeOption),
    LeasequeryRelayData(LqRelayDataOption),
    LeasequeryClientLink(LqClientLinkOption),
    RelayId(RelayIdOption),
    ClientLinkLayerAddress(ClientLinkLayerAddressOption),
    Unknown(UnknownOption),
}

impl Dhcp6Option {
    /// The numeric option code
    pub fn code(&self) -> u16 {
        match self {
            Dhcp6Option::ClientId(_) => codes::CLIENT_ID,
            Dhcp6Option::ServerId(_) => codes::SERVER_ID,
            Dhcp6Option::IaNa(_) => codes::IA_NA,
            Dhcp6Option::IaTa(_) => codes::IA_TA,
            Dhcp6Option::IaAddress(_) => codes::IA_ADDRESS,
            Dhcp6Option::OptionRequest(_) => codes::OPTION_REQUEST,
            Dhcp6Option::Preference(_) => codes::PREFERENCE,
            Dhcp6Option::ElapsedTime(_) => codes::ELAPSED_TIME,
            Dhcp6Option::RelayMessage(_) => codes::RELAY_MESSAGE,
            Dhcp6Option::ServerUnicast(_) => codes::SERVER_UNICAST,
            Dhcp6Option::StatusCode(_) => codes::STATUS_CODE,
            Dhcp6Option::RapidCommit(_) => codes::RAPID_COMMIT,
            Dhcp6Option::InterfaceId(_) => codes::INTERFACE_ID,
            Dhcp6Option::DnsServers(_) => codes::DNS_SERVERS,
            Dhcp6Option::DomainSearchList(_) => codes::DOMAIN_SEARCH_LIST,
            Dhcp6Option::IaPd(_) => codes::IA_PD,
            Dhcp6Option::IaPrefix(_) => codes::IA_PREFIX,
            Dhcp6Option::RemoteId(_) => codes::REMOTE_ID,
            Dhcp6Option::SubscriberId(_) => codes::SUBSCRIBER_ID,
            Dhcp6Option::LeasequeryQuery(_) => codes::LQ_QUERY,
            Dhcp6Option::ClientData(_) => codes::CLIENT_DATA,
            Dhcp6Option::CltTime(_) => codes::CLT_TIME,
            Dhcp6Option::LeasequeryRelayData(_) => codes::LQ_RELAY_DATA,
            Dhcp6Option::LeasequeryClientLink(_) => codes::LQ_CLIENT_LINK,
            Dhcp6Option::RelayId(_) => codes::RELAY_ID,
            Dhcp6Option::ClientLinkLayerAddress(_) => codes::CLIENT_LINKLAYER_ADDRESS,
            Dhcp6Option::Unknown(option) => option.code,
        }
    }

    /// Registry display name for this option, or "unknown"
    pub fn name(&self) -> &'static str {
        registry()
            .option(self.code())
            .map(|entry| entry.name)
            .unwrap_or("unknown")
    }

    /// If this is an IA container option, which kind
    pub fn ia_kind(&self) -> Option<IaKind> {
        match self {
            Dhcp6Option::IaNa(_) => Some(IaKind::Na),
            Dhcp6Option::IaTa(_) => Some(IaKind::Ta),
            Dhcp6Option::IaPd(_) => Some(IaKind::Pd),
            _ => None,
        }
    }

    /// The IAID, for IA container options
    pub fn iaid(&self) -> Option<u32> {
        match self {
            Dhcp6Option::IaNa(ia) => Some(ia.iaid),
            Dhcp6Option::IaTa(ia) => Some(ia.iaid),
            Dhcp6Option::IaPd(ia) => Some(ia.iaid),
            _ => None,
        }
    }

    /// Sub-options of an IA container option
    pub fn ia_options(&self) -> Option<&[Dhcp6Option]> {
        match self {
            Dhcp6Option::IaNa(ia) => Some(&ia.options),
            Dhcp6Option::IaTa(ia) => Some(&ia.options),
            Dhcp6Option::IaPd(ia) => Some(&ia.options),
            _ => None,
        }
    }

    /// Parse one option from the start of the buffer, returning the number of
    /// bytes consumed.
    pub fn parse(buffer: &[u8], ctx: &ParseContext) -> Result<(usize, Dhcp6Option)> {
        if buffer.len() < 4 {
            return Err(WireError::short("option header", 4 - buffer.len()));
        }
        let code = u16::from_be_bytes([buffer[0], buffer[1]]);
        let length = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        if buffer.len() < 4 + length {
            return Err(WireError::short("option payload", 4 + length - buffer.len()));
        }
        let payload = &buffer[4..4 + length];

        let option = match registry().option(code) {
            Some(entry) => (entry.parse)(payload, ctx)?,
            None => Dhcp6Option::Unknown(UnknownOption {
                code,
                data: payload.to_vec(),
            }),
        };
        Ok((4 + length, option))
    }

    /// Serialize this option, TLV header included
    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_u16(self.code());
        let length_at = buffer.len();
        buffer.put_u16(0);
        self.save_payload(buffer);
        let payload_len = buffer.len() - length_at - 2;
        debug_assert!(payload_len <= u16::MAX as usize);
        buffer[length_at..length_at + 2].copy_from_slice(&(payload_len as u16).to_be_bytes());
    }

    fn save_payload(&self, buffer: &mut BytesMut) {
        match self {
            Dhcp6Option::ClientId(o) => o.save_payload(buffer),
            Dhcp6Option::ServerId(o) => o.save_payload(buffer),
            Dhcp6Option::IaNa(o) => o.save_payload(buffer),
            Dhcp6Option::IaTa(o) => o.save_payload(buffer),
            Dhcp6Option::IaAddress(o) => o.save_payload(buffer),
            Dhcp6Option::OptionRequest(o) => o.save_payload(buffer),
            Dhcp6Option::Preference(o) => o.save_payload(buffer),
            Dhcp6Option::ElapsedTime(o) => o.save_payload(buffer),
            Dhcp6Option::RelayMessage(o) => o.save_payload(buffer),
            Dhcp6Option::ServerUnicast(o) => o.save_payload(buffer),
            Dhcp6Option::StatusCode(o) => o.save_payload(buffer),
            Dhcp6Option::RapidCommit(o) => o.save_payload(buffer),
            Dhcp6Option::InterfaceId(o) => o.save_payload(buffer),
            Dhcp6Option::DnsServers(o) => o.save_payload(buffer),
            Dhcp6Option::DomainSearchList(o) => o.save_payload(buffer),
            Dhcp6Option::IaPd(o) => o.save_payload(buffer),
            Dhcp6Option::IaPrefix(o) => o.save_payload(buffer),
            Dhcp6Option::RemoteId(o) => o.save_payload(buffer),
            Dhcp6Option::SubscriberId(o) => o.save_payload(buffer),
            Dhcp6Option::LeasequeryQuery(o) => o.save_payload(buffer),
            Dhcp6Option::ClientData(o) => o.save_payload(buffer),
            Dhcp6Option::CltTime(o) => o.save_payload(buffer),
            Dhcp6Option::LeasequeryRelayData(o) => o.save_payload(buffer),
            Dhcp6Option::LeasequeryClientLink(o) => o.save_payload(buffer),
            Dhcp6Option::RelayId(o) => o.save_payload(buffer),
            Dhcp6Option::ClientLinkLayerAddress(o) => o.save_payload(buffer),
            Dhcp6Option::Unknown(o) => o.save_payload(buffer),
        }
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        self.save(&mut buffer);
        buffer.to_vec()
    }

    /// Validate shape and, for container options, containment cardinality.
    ///
    /// Never called by `parse`: strict callers run it explicitly.
    pub fn validate(&self) -> Result<()> {
        match self {
            Dhcp6Option::ClientId(o) => o.duid.validate(),
            Dhcp6Option::ServerId(o) => o.duid.validate(),
            Dhcp6Option::IaNa(o) => o.validate(),
            Dhcp6Option::IaTa(o) => o.validate(),
            Dhcp6Option::IaAddress(o) => o.validate(),
            Dhcp6Option::IaPd(o) => o.validate(),
            Dhcp6Option::IaPrefix(o) => o.validate(),
            Dhcp6Option::StatusCode(o) => o.validate(),
            Dhcp6Option::RelayMessage(o) => o.relayed_message.validate(),
            Dhcp6Option::LeasequeryQuery(o) => o.validate(),
            Dhcp6Option::ClientData(o) => o.validate(),
            Dhcp6Option::RelayId(o) => o.duid.validate(),
            _ => Ok(()),
        }
    }
}

/// Parse a run of options until the buffer is exhausted
pub(crate) fn parse_suboptions(buffer: &[u8], ctx: &ParseContext) -> Result<Vec<Dhcp6Option>> {
    let mut options = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let (consumed, option) = Dhcp6Option::parse(&buffer[offset..], ctx)?;
        options.push(option);
        offset += consumed;
    }
    Ok(options)
}

/// Check declared containment cardinality for a container's children
pub(crate) fn check_containment(container: ContainerKey, children: &[Dhcp6Option]) -> Result<()> {
    registry().check_containment(container, children.iter().map(|o| o.code()))
}

/// First option with the given code
pub fn find_option(options: &[Dhcp6Option], code: u16) -> Option<&Dhcp6Option> {
    options.iter().find(|option| option.code() == code)
}

/// All options with the given code
pub fn find_options(options: &[Dhcp6Option], code: u16) -> Vec<&Dhcp6Option> {
    options.iter().filter(|option| option.code() == code).collect()
}
