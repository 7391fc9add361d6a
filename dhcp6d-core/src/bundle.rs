//! The per-request transaction bundle
//!
//! A bundle owns everything about one request/response transaction: the
//! parsed request, the relay chain around it, the response being built, and
//! the bookkeeping the pipeline needs (marks, handled IA set, rapid-commit
//! flag). Workers create one bundle per packet and drop it after sending.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv6Addr;

use dhcp6d_wire::message::{
    split_relay_chain, wrap_in_relay_chain, ClientMessage, Message, MessageType, RelayMessage,
};
use dhcp6d_wire::options::{codes, Dhcp6Option, IaKind, RelayMessageOption};

/// A handle identifying one IA option in the request by position.
///
/// The handled set works on identity, not value: two IA_NA options with the
/// same IAID are still distinct entries in the request.
pub type OptionHandle = usize;

/// All state of one request/response transaction
pub struct TransactionBundle {
    /// The innermost client message
    pub request: ClientMessage,
    /// Relay shells around the request, outermost first. The outermost shell
    /// is always the virtual relay synthesized by the worker, so handlers
    /// never see an unrelayed shape.
    pub relays: Vec<RelayMessage>,
    /// Whether the packet arrived on a multicast listener
    pub received_over_multicast: bool,
    /// Whether the packet arrived over a stream listener
    pub received_over_tcp: bool,
    /// Set by handlers that welcome unicast from this client
    pub allow_unicast: bool,
    /// True when the client solicited rapid commit; handlers may clear it,
    /// never set it
    pub allow_rapid_commit: bool,
    /// String tags from the listener and from filters
    pub marks: HashSet<String>,
    /// The response under construction; None until the pipeline decides the
    /// shape, None again when the request is to be dropped
    pub response: Option<ClientMessage>,
    /// Extra outgoing messages for stream listeners (bulk leasequery)
    extra_responses: Vec<ClientMessage>,
    /// Reply shells mirroring `relays`, outermost first
    outgoing_relays: Vec<RelayMessage>,
    /// Positions of IA options in the request already claimed by a handler
    handled: HashSet<OptionHandle>,
}

impl TransactionBundle {
    /// Build a bundle from a parsed incoming message.
    ///
    /// Unrelayed client messages are wrapped in a virtual relay-forward so the
    /// pipeline always sees a uniform shape: `listener_options` (interface-id
    /// and friends) and the source address end up on that shell. Returns None
    /// when the message contains no client message to answer.
    pub fn new(
        incoming: Message,
        source_address: Ipv6Addr,
        link_address: Ipv6Addr,
        listener_options: Vec<Dhcp6Option>,
        received_over_multicast: bool,
        received_over_tcp: bool,
        marks: impl IntoIterator<Item = String>,
    ) -> Option<Self> {
        let next_hop_count = match &incoming {
            Message::Relay(relay) => relay.hop_count.saturating_add(1),
            _ => 0,
        };

        // Pretend to be an internal relay and wrap the message like one would
        let mut virtual_relay = RelayMessage::new(
            MessageType::RelayForward,
            next_hop_count,
            link_address,
            source_address,
        );
        virtual_relay.options = listener_options;
        virtual_relay
            .options
            .push(Dhcp6Option::RelayMessage(RelayMessageOption::new(incoming)));

        let (request, relays) = split_relay_chain(Message::Relay(virtual_relay))?;

        let allow_rapid_commit = request.has_option(codes::RAPID_COMMIT);

        Some(Self {
            request,
            relays,
            received_over_multicast,
            received_over_tcp,
            allow_unicast: false,
            allow_rapid_commit,
            marks: marks.into_iter().collect(),
            response: None,
            extra_responses: Vec::new(),
            outgoing_relays: Vec::new(),
            handled: HashSet::new(),
        })
    }

    /// Add a mark to the set
    pub fn add_mark(&mut self, mark: &str) {
        self.marks.insert(mark.trim().to_string());
    }

    pub fn has_mark(&self, mark: &str) -> bool {
        self.marks.contains(mark)
    }

    /// The link address identifying where this request came from: the first
    /// usable one searching from the relay closest to the client outwards.
    pub fn link_address(&self) -> Ipv6Addr {
        for relay in self.relays.iter().rev() {
            let address = relay.link_address;
            if !address.is_unspecified() && !address.is_loopback() && !is_link_local(&address) {
                return address;
            }
        }
        Ipv6Addr::UNSPECIFIED
    }

    /// Mark the IA option at this position as claimed. Idempotent.
    pub fn mark_handled(&mut self, handle: OptionHandle) {
        self.handled.insert(handle);
    }

    pub fn is_handled(&self, handle: OptionHandle) -> bool {
        self.handled.contains(&handle)
    }

    /// Positions of IA options of the given kinds not yet claimed by any
    /// handler, in request order.
    pub fn get_unhandled_options(&self, kinds: &[IaKind]) -> Vec<OptionHandle> {
        self.request
            .options
            .iter()
            .enumerate()
            .filter(|(position, option)| {
                !self.handled.contains(position)
                    && option.ia_kind().map(|k| kinds.contains(&k)).unwrap_or(false)
            })
            .map(|(position, _)| position)
            .collect()
    }

    /// The request option behind a handle
    pub fn request_option(&self, handle: OptionHandle) -> &Dhcp6Option {
        &self.request.options[handle]
    }

    /// Set the response shape and build the mirroring reply shells
    pub fn init_response(&mut self, response: ClientMessage) {
        self.outgoing_relays = self.relays.iter().map(RelayMessage::reply_shell).collect();
        self.response = Some(response);
    }

    /// Append an option to the response unless an identical one is present
    pub fn add_response_option(&mut self, option: Dhcp6Option) {
        if let Some(response) = &mut self.response {
            if !response.options.contains(&option) {
                response.options.push(option);
            }
        }
    }

    /// Replace any response option of the same code, or append
    pub fn force_response_option(&mut self, option: Dhcp6Option) {
        if let Some(response) = &mut self.response {
            response.options.retain(|existing| existing.code() != option.code());
            response.options.push(option);
        }
    }

    pub fn get_response_option(&self, code: u16) -> Option<&Dhcp6Option> {
        self.response.as_ref().and_then(|r| r.option(code))
    }

    pub fn has_response_option(&self, code: u16) -> bool {
        self.get_response_option(code).is_some()
    }

    /// Number of relay shells around the request, the virtual one included
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    /// An option from one incoming relay shell, by chain position
    pub fn relay_option(&self, position: usize, code: u16) -> Option<&Dhcp6Option> {
        self.relays.get(position).and_then(|relay| relay.option(code))
    }

    /// Walk the relay chain for the first shell carrying the option.
    ///
    /// `from_innermost` starts at the relay closest to the client, which is
    /// where interface-id and friends usually live.
    pub fn get_relay_option(&self, code: u16, from_innermost: bool) -> Option<&Dhcp6Option> {
        if from_innermost {
            self.relays.iter().rev().find_map(|relay| relay.option(code))
        } else {
            self.relays.iter().find_map(|relay| relay.option(code))
        }
    }

    /// Place an option in the outgoing relay shell at the given position
    pub fn add_response_relay_option(&mut self, position: usize, option: Dhcp6Option) {
        if let Some(shell) = self.outgoing_relays.get_mut(position) {
            shell.options.push(option);
        }
    }

    /// Queue an extra outgoing message (bulk leasequery over TCP)
    pub fn add_response(&mut self, message: ClientMessage) {
        self.extra_responses.push(message);
    }

    /// Whether any extra responses were queued
    pub fn has_extra_responses(&self) -> bool {
        !self.extra_responses.is_empty()
    }

    /// All outgoing messages, each wrapped in the reply shell chain.
    ///
    /// The worker peels the outermost (virtual) shell off again before
    /// putting bytes on the wire.
    pub fn into_outgoing_messages(self) -> Vec<Message> {
        let response = match self.response {
            Some(response) => response,
            None => return Vec::new(),
        };

        let mut messages = Vec::with_capacity(1 + self.extra_responses.len());
        messages.push(wrap_in_relay_chain(
            self.outgoing_relays.clone(),
            Message::Client(response),
        ));
        for extra in self.extra_responses {
            messages.push(wrap_in_relay_chain(
                self.outgoing_relays.clone(),
                Message::Client(extra),
            ));
        }
        messages
    }
}

// Display is used in per-request log lines; keep it on one line.
impl fmt::Display for TransactionBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request.message_type.name())?;
        match self.request.client_id() {
            Some(duid) => write!(f, " from {}", duid)?,
            None => write!(f, " from unknown")?,
        }
        let link = self.link_address();
        if !link.is_unspecified() {
            write!(f, " via {}", link)?;
        }
        if !self.marks.is_empty() {
            let mut marks: Vec<&str> = self.marks.iter().map(String::as_str).collect();
            marks.sort_unstable();
            write!(f, " with marks '{}'", marks.join("', '"))?;
        }
        Ok(())
    }
}

fn is_link_local(address: &Ipv6Addr) -> bool {
    (address.segments()[0] & 0xffc0) == 0xfe80
}
