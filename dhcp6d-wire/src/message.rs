//! DHCPv6 messages (RFC 8415 section 8, RFC 5007, RFC 5460)

use std::collections::HashMap;
use std::net::Ipv6Addr;

use bytes::{BufMut, BytesMut};

use crate::duid::Duid;
use crate::error::{Result, WireError};
use crate::options::{codes, Dhcp6Option, IaKind, RelayMessageOption};
use crate::registry::{registry, ContainerKey, MessageKind};
use crate::types::TransactionId;
use crate::DEFAULT_MAX_RELAY_DEPTH;

pub const MSG_SOLICIT: u8 = 1;
pub const MSG_ADVERTISE: u8 = 2;
pub const MSG_REQUEST: u8 = 3;
pub const MSG_CONFIRM: u8 = 4;
pub const MSG_RENEW: u8 = 5;
pub const MSG_REBIND: u8 = 6;
pub const MSG_REPLY: u8 = 7;
pub const MSG_RELEASE: u8 = 8;
pub const MSG_DECLINE: u8 = 9;
pub const MSG_RECONFIGURE: u8 = 10;
pub const MSG_INFORMATION_REQUEST: u8 = 11;
pub const MSG_RELAY_FORWARD: u8 = 12;
pub const MSG_RELAY_REPLY: u8 = 13;
pub const MSG_LEASEQUERY: u8 = 14;
pub const MSG_LEASEQUERY_REPLY: u8 = 15;
pub const MSG_LEASEQUERY_DONE: u8 = 16;
pub const MSG_LEASEQUERY_DATA: u8 = 17;

/// The registered DHCPv6 message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Solicit,
    Advertise,
    Request,
    Confirm,
    Renew,
    Rebind,
    Reply,
    Release,
    Decline,
    Reconfigure,
    InformationRequest,
    RelayForward,
    RelayReply,
    Leasequery,
    LeasequeryReply,
    LeasequeryDone,
    LeasequeryData,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            MSG_SOLICIT => Some(Self::Solicit),
            MSG_ADVERTISE => Some(Self::Advertise),
            MSG_REQUEST => Some(Self::Request),
            MSG_CONFIRM => Some(Self::Confirm),
            MSG_RENEW => Some(Self::Renew),
            MSG_REBIND => Some(Self::Rebind),
            MSG_REPLY => Some(Self::Reply),
            MSG_RELEASE => Some(Self::Release),
            MSG_DECLINE => Some(Self::Decline),
            MSG_RECONFIGURE => Some(Self::Reconfigure),
            MSG_INFORMATION_REQUEST => Some(Self::InformationRequest),
            MSG_RELAY_FORWARD => Some(Self::RelayForward),
            MSG_RELAY_REPLY => Some(Self::RelayReply),
            MSG_LEASEQUERY => Some(Self::Leasequery),
            MSG_LEASEQUERY_REPLY => Some(Self::LeasequeryReply),
            MSG_LEASEQUERY_DONE => Some(Self::LeasequeryDone),
            MSG_LEASEQUERY_DATA => Some(Self::LeasequeryData),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Solicit => MSG_SOLICIT,
            Self::Advertise => MSG_ADVERTISE,
            Self::Request => MSG_REQUEST,
            Self::Confirm => MSG_CONFIRM,
            Self::Renew => MSG_RENEW,
            Self::Rebind => MSG_REBIND,
            Self::Reply => MSG_REPLY,
            Self::Release => MSG_RELEASE,
            Self::Decline => MSG_DECLINE,
            Self::Reconfigure => MSG_RECONFIGURE,
            Self::InformationRequest => MSG_INFORMATION_REQUEST,
            Self::RelayForward => MSG_RELAY_FORWARD,
            Self::RelayReply => MSG_RELAY_REPLY,
            Self::Leasequery => MSG_LEASEQUERY,
            Self::LeasequeryReply => MSG_LEASEQUERY_REPLY,
            Self::LeasequeryDone => MSG_LEASEQUERY_DONE,
            Self::LeasequeryData => MSG_LEASEQUERY_DATA,
        }
    }

    pub fn name(&self) -> &'static str {
        registry()
            .message(self.code())
            .map(|entry| entry.name)
            .unwrap_or("unknown")
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Self::RelayForward | Self::RelayReply)
    }

    /// Whether a client may send this type to a server
    pub fn from_client_to_server(&self) -> bool {
        matches!(
            self,
            Self::Solicit
                | Self::Request
                | Self::Confirm
                | Self::Renew
                | Self::Rebind
                | Self::Release
                | Self::Decline
                | Self::InformationRequest
                | Self::RelayForward
                | Self::Leasequery
        )
    }

    /// Whether a server may send this type towards a client
    pub fn from_server_to_client(&self) -> bool {
        matches!(
            self,
            Self::Advertise
                | Self::Reply
                | Self::Reconfigure
                | Self::RelayReply
                | Self::LeasequeryReply
                | Self::LeasequeryDone
                | Self::LeasequeryData
        )
    }
}

/// State threaded through recursive parsing to bound relay nesting
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    /// Number of relay messages already entered
    pub depth: usize,
    /// Hop ceiling for relay nesting
    pub max_depth: usize,
}

impl Default for ParseContext {
    fn default() -> Self {
        Self {
            depth: 0,
            max_depth: DEFAULT_MAX_RELAY_DEPTH,
        }
    }
}

impl ParseContext {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }
}

/// A parsed DHCPv6 PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A client/server message: type, transaction id, options
    Client(ClientMessage),
    /// A relay agent message wrapping an inner PDU
    Relay(RelayMessage),
    /// A message type without a registry entry, raw content preserved
    Unknown(UnknownMessage),
}

impl Message {
    /// Parse a message with the default relay depth ceiling
    pub fn parse(buffer: &[u8]) -> Result<(usize, Message)> {
        Self::parse_with(buffer, &ParseContext::default())
    }

    /// Parse a message with explicit parse state
    pub fn parse_with(buffer: &[u8], ctx: &ParseContext) -> Result<(usize, Message)> {
        if buffer.is_empty() {
            return Err(WireError::short("message", 1));
        }
        let code = buffer[0];
        match registry().message(code) {
            Some(entry) => match entry.kind {
                MessageKind::Client => {
                    let (consumed, message) = ClientMessage::parse(buffer, ctx)?;
                    Ok((consumed, Message::Client(message)))
                }
                MessageKind::Relay => {
                    if ctx.depth >= ctx.max_depth {
                        return Err(WireError::RelayTooDeep {
                            max_depth: ctx.max_depth,
                        });
                    }
                    let deeper = ParseContext {
                        depth: ctx.depth + 1,
                        max_depth: ctx.max_depth,
                    };
                    let (consumed, message) = RelayMessage::parse(buffer, &deeper)?;
                    Ok((consumed, Message::Relay(message)))
                }
            },
            None => {
                let message = UnknownMessage {
                    message_type: code,
                    data: buffer[1..].to_vec(),
                };
                Ok((buffer.len(), Message::Unknown(message)))
            }
        }
    }

    pub fn save(&self, buffer: &mut BytesMut) {
        match self {
            Message::Client(m) => m.save(buffer),
            Message::Relay(m) => m.save(buffer),
            Message::Unknown(m) => m.save(buffer),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = BytesMut::new();
        self.save(&mut buffer);
        buffer.to_vec()
    }

    /// Validate shape and containment; never called by `parse`
    pub fn validate(&self) -> Result<()> {
        match self {
            Message::Client(m) => m.validate(),
            Message::Relay(m) => m.validate(),
            Message::Unknown(_) => Ok(()),
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Message::Client(m) => Some(m.message_type),
            Message::Relay(m) => Some(m.message_type),
            Message::Unknown(_) => None,
        }
    }

    pub fn as_client(&self) -> Option<&ClientMessage> {
        match self {
            Message::Client(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_relay(&self) -> Option<&RelayMessage> {
        match self {
            Message::Relay(m) => Some(m),
            _ => None,
        }
    }
}

/// Fixed header plus options: everything that is not a relay encapsulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub message_type: MessageType,
    pub transaction_id: TransactionId,
    pub options: Vec<Dhcp6Option>,
}

impl ClientMessage {
    pub fn new(message_type: MessageType, transaction_id: TransactionId) -> Self {
        Self {
            message_type,
            transaction_id,
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<Dhcp6Option>) -> Self {
        self.options = options;
        self
    }

    fn parse(buffer: &[u8], ctx: &ParseContext) -> Result<(usize, Self)> {
        if buffer.len() < 4 {
            return Err(WireError::short("message header", 4 - buffer.len()));
        }
        let message_type = MessageType::from_code(buffer[0])
            .ok_or_else(|| WireError::malformed("message type"))?;
        let transaction_id = TransactionId([buffer[1], buffer[2], buffer[3]]);

        let mut options = Vec::new();
        let mut offset = 4;
        while offset < buffer.len() {
            let (consumed, option) = Dhcp6Option::parse(&buffer[offset..], ctx)?;
            options.push(option);
            offset += consumed;
        }

        Ok((
            offset,
            Self {
                message_type,
                transaction_id,
                options,
            },
        ))
    }

    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.message_type.code());
        buffer.put_slice(self.transaction_id.as_bytes());
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub fn validate(&self) -> Result<()> {
        registry().check_containment(
            ContainerKey::Message(self.message_type.code()),
            self.options.iter().map(|o| o.code()),
        )?;
        for option in &self.options {
            option.validate()?;
        }

        // IAIDs must be unique per IA kind
        let mut seen: HashMap<(IaKind, u32), ()> = HashMap::new();
        for option in &self.options {
            if let (Some(kind), Some(iaid)) = (option.ia_kind(), option.iaid()) {
                if seen.insert((kind, iaid), ()).is_some() {
                    return Err(WireError::malformed(format!(
                        "duplicate iaid {} for {:?}",
                        iaid, kind
                    )));
                }
            }
        }
        Ok(())
    }

    /// First option with the given code
    pub fn option(&self, code: u16) -> Option<&Dhcp6Option> {
        self.options.iter().find(|option| option.code() == code)
    }

    /// All options with the given code
    pub fn options_of(&self, code: u16) -> impl Iterator<Item = &Dhcp6Option> {
        self.options.iter().filter(move |option| option.code() == code)
    }

    pub fn has_option(&self, code: u16) -> bool {
        self.option(code).is_some()
    }

    /// The client DUID, if a client-id option is present
    pub fn client_id(&self) -> Option<&Duid> {
        match self.option(codes::CLIENT_ID) {
            Some(Dhcp6Option::ClientId(o)) => Some(&o.duid),
            _ => None,
        }
    }

    /// The server DUID, if a server-id option is present
    pub fn server_id(&self) -> Option<&Duid> {
        match self.option(codes::SERVER_ID) {
            Some(Dhcp6Option::ServerId(o)) => Some(&o.duid),
            _ => None,
        }
    }

    /// Positions of all IA container options in this message
    pub fn ia_positions(&self) -> Vec<usize> {
        self.options
            .iter()
            .enumerate()
            .filter(|(_, option)| option.ia_kind().is_some())
            .map(|(index, _)| index)
            .collect()
    }
}

/// Relay agent header plus options, one of which encapsulates the inner PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub message_type: MessageType,
    pub hop_count: u8,
    pub link_address: Ipv6Addr,
    pub peer_address: Ipv6Addr,
    pub options: Vec<Dhcp6Option>,
}

impl RelayMessage {
    pub fn new(
        message_type: MessageType,
        hop_count: u8,
        link_address: Ipv6Addr,
        peer_address: Ipv6Addr,
    ) -> Self {
        Self {
            message_type,
            hop_count,
            link_address,
            peer_address,
            options: Vec::new(),
        }
    }

    fn parse(buffer: &[u8], ctx: &ParseContext) -> Result<(usize, Self)> {
        if buffer.len() < 34 {
            return Err(WireError::short("relay header", 34 - buffer.len()));
        }
        let message_type = MessageType::from_code(buffer[0])
            .ok_or_else(|| WireError::malformed("relay message type"))?;
        let hop_count = buffer[1];
        let mut link = [0u8; 16];
        link.copy_from_slice(&buffer[2..18]);
        let mut peer = [0u8; 16];
        peer.copy_from_slice(&buffer[18..34]);

        let mut options = Vec::new();
        let mut offset = 34;
        while offset < buffer.len() {
            let (consumed, option) = Dhcp6Option::parse(&buffer[offset..], ctx)?;
            options.push(option);
            offset += consumed;
        }

        Ok((
            offset,
            Self {
                message_type,
                hop_count,
                link_address: Ipv6Addr::from(link),
                peer_address: Ipv6Addr::from(peer),
                options,
            },
        ))
    }

    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.message_type.code());
        buffer.put_u8(self.hop_count);
        buffer.put_slice(&self.link_address.octets());
        buffer.put_slice(&self.peer_address.octets());
        for option in &self.options {
            option.save(buffer);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.link_address.is_multicast() || self.peer_address.is_multicast() {
            return Err(WireError::malformed("multicast relay address"));
        }
        registry().check_containment(
            ContainerKey::Message(self.message_type.code()),
            self.options.iter().map(|o| o.code()),
        )?;
        for option in &self.options {
            option.validate()?;
        }
        Ok(())
    }

    /// First option with the given code
    pub fn option(&self, code: u16) -> Option<&Dhcp6Option> {
        self.options.iter().find(|option| option.code() == code)
    }

    /// The directly encapsulated message, if present
    pub fn relayed_message(&self) -> Option<&Message> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::RelayMessage(o) => Some(o.relayed_message.as_ref()),
            _ => None,
        })
    }

    /// A reply shell mirroring this relay's addressing, without options
    pub fn reply_shell(&self) -> RelayMessage {
        RelayMessage::new(
            MessageType::RelayReply,
            self.hop_count,
            self.link_address,
            self.peer_address,
        )
    }
}

/// Raw bytes of a message whose type has no registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMessage {
    pub message_type: u8,
    pub data: Vec<u8>,
}

impl UnknownMessage {
    pub fn save(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.message_type);
        buffer.put_slice(&self.data);
    }
}

/// Decompose a parsed message into the innermost client message and the
/// relay shells around it, outermost first.
///
/// The relay-message option is removed from each shell; all other relay
/// options stay in place. Returns `None` when there is no client message
/// inside (an unknown or bare relay message).
pub fn split_relay_chain(message: Message) -> Option<(ClientMessage, Vec<RelayMessage>)> {
    let mut relays = Vec::new();
    let mut current = message;
    loop {
        match current {
            Message::Client(client) => return Some((client, relays)),
            Message::Unknown(_) => return None,
            Message::Relay(mut relay) => {
                let position = relay
                    .options
                    .iter()
                    .position(|option| matches!(option, Dhcp6Option::RelayMessage(_)));
                let inner = match position {
                    Some(index) => match relay.options.remove(index) {
                        Dhcp6Option::RelayMessage(o) => *o.relayed_message,
                        _ => unreachable!(),
                    },
                    None => return None,
                };
                relays.push(relay);
                current = inner;
            }
        }
    }
}

/// Wrap a response in reply shells, outermost first, producing the message
/// to put on the wire.
pub fn wrap_in_relay_chain(shells: Vec<RelayMessage>, response: Message) -> Message {
    let mut current = response;
    for mut shell in shells.into_iter().rev() {
        shell
            .options
            .push(Dhcp6Option::RelayMessage(RelayMessageOption::new(current)));
        current = Message::Relay(shell);
    }
    current
}
