//! Process-wide codec registries
//!
//! Three dispatch tables drive parsing: message types, option codes and DUID
//! types. The tables are built once, before the server starts its workers,
//! and are immutable afterwards. Extensions add their entries inside the
//! registry they `install`; a code without an entry parses as the matching
//! unknown variant instead of failing.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::duid::{DUID_EN, DUID_LL, DUID_LLT, DUID_UUID};
use crate::error::{Result, WireError};
use crate::message::{self, ParseContext};
use crate::options::{codes, Dhcp6Option};
use crate::options::{
    ClientDataOption, ClientIdOption, ClientLinkLayerAddressOption, CltTimeOption,
    DnsServersOption, DomainSearchListOption, ElapsedTimeOption, IaAddressOption, IaNaOption,
    IaPdOption, IaPrefixOption, IaTaOption, InterfaceIdOption, LqClientLinkOption, LqQueryOption,
    LqRelayDataOption, OptionRequestOption, PreferenceOption, RapidCommitOption, RelayIdOption,
    RelayMessageOption, RemoteIdOption, ServerIdOption, ServerUnicastOption, StatusCodeOption,
    SubscriberIdOption,
};

/// Unbounded occurrence count in a containment range
pub const MANY: u16 = u16::MAX;

/// Whether a message type has a client/server or a relay layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Client,
    Relay,
}

/// Registry entry for a message type
#[derive(Debug, Clone, Copy)]
pub struct MessageEntry {
    pub code: u8,
    pub name: &'static str,
    pub kind: MessageKind,
}

/// Parse function producing a concrete option from its payload
pub type OptionParser = fn(&[u8], &ParseContext) -> Result<Dhcp6Option>;

/// Registry entry for an option code
#[derive(Clone, Copy)]
pub struct OptionEntry {
    pub code: u16,
    pub name: &'static str,
    pub parse: OptionParser,
}

impl std::fmt::Debug for OptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionEntry")
            .field("code", &self.code)
            .field("name", &self.name)
            .finish()
    }
}

/// Identifies a container in the containment table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKey {
    Message(u8),
    Option(u16),
}

/// The codec dispatch tables
pub struct Registry {
    messages: HashMap<u8, MessageEntry>,
    options: HashMap<u16, OptionEntry>,
    duids: HashMap<u16, &'static str>,
    containment: HashMap<ContainerKey, HashMap<u16, (u16, u16)>>,
}

impl Registry {
    /// An empty registry; extensions start from `standard()` instead
    pub fn empty() -> Self {
        Self {
            messages: HashMap::new(),
            options: HashMap::new(),
            duids: HashMap::new(),
            containment: HashMap::new(),
        }
    }

    /// Register a message type. Fails when the code is taken.
    pub fn register_message(&mut self, entry: MessageEntry) -> Result<()> {
        if self.messages.contains_key(&entry.code) {
            return Err(WireError::malformed(format!(
                "message code {} already registered",
                entry.code
            )));
        }
        self.messages.insert(entry.code, entry);
        Ok(())
    }

    /// Register an option code. Fails when the code is taken.
    pub fn register_option(&mut self, entry: OptionEntry) -> Result<()> {
        if self.options.contains_key(&entry.code) {
            return Err(WireError::malformed(format!(
                "option code {} already registered",
                entry.code
            )));
        }
        self.options.insert(entry.code, entry);
        Ok(())
    }

    /// Register a DUID type name
    pub fn register_duid(&mut self, duid_type: u16, name: &'static str) {
        self.duids.insert(duid_type, name);
    }

    /// Declare how often a child option may occur inside a container
    pub fn declare_containment(&mut self, container: ContainerKey, child: u16, min: u16, max: u16) {
        self.containment
            .entry(container)
            .or_default()
            .insert(child, (min, max));
    }

    pub fn message(&self, code: u8) -> Option<&MessageEntry> {
        self.messages.get(&code)
    }

    pub fn option(&self, code: u16) -> Option<&OptionEntry> {
        self.options.get(&code)
    }

    pub fn duid_name(&self, duid_type: u16) -> Option<&'static str> {
        self.duids.get(&duid_type).copied()
    }

    /// Check declared occurrence ranges against the actual child codes.
    ///
    /// Codes without a declaration are always allowed; unknown child options
    /// never make a container invalid.
    pub fn check_containment(
        &self,
        container: ContainerKey,
        children: impl Iterator<Item = u16>,
    ) -> Result<()> {
        let declared = match self.containment.get(&container) {
            Some(declared) => declared,
            None => return Ok(()),
        };

        let mut counts: HashMap<u16, u16> = HashMap::new();
        for code in children {
            *counts.entry(code).or_insert(0) += 1;
        }

        for (code, (min, max)) in declared {
            let count = counts.get(code).copied().unwrap_or(0);
            if count < *min || count > *max {
                return Err(WireError::malformed(format!(
                    "option {} occurs {} times, allowed {}..{}",
                    code, count, min, max
                )));
            }
        }
        Ok(())
    }

    /// The registry with every element this crate implements
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.add_standard_messages();
        registry.add_standard_options();
        registry.add_standard_duids();
        registry.add_standard_containment();
        registry
    }

    fn add_standard_messages(&mut self) {
        use message::*;
        let defs: &[(u8, &'static str, MessageKind)] = &[
            (MSG_SOLICIT, "solicit", MessageKind::Client),
            (MSG_ADVERTISE, "advertise", MessageKind::Client),
            (MSG_REQUEST, "request", MessageKind::Client),
            (MSG_CONFIRM, "confirm", MessageKind::Client),
            (MSG_RENEW, "renew", MessageKind::Client),
            (MSG_REBIND, "rebind", MessageKind::Client),
            (MSG_REPLY, "reply", MessageKind::Client),
            (MSG_RELEASE, "release", MessageKind::Client),
            (MSG_DECLINE, "decline", MessageKind::Client),
            (MSG_RECONFIGURE, "reconfigure", MessageKind::Client),
            (MSG_INFORMATION_REQUEST, "information-request", MessageKind::Client),
            (MSG_RELAY_FORWARD, "relay-forward", MessageKind::Relay),
            (MSG_RELAY_REPLY, "relay-reply", MessageKind::Relay),
            (MSG_LEASEQUERY, "leasequery", MessageKind::Client),
            (MSG_LEASEQUERY_REPLY, "leasequery-reply", MessageKind::Client),
            (MSG_LEASEQUERY_DONE, "leasequery-done", MessageKind::Client),
            (MSG_LEASEQUERY_DATA, "leasequery-data", MessageKind::Client),
        ];
        for (code, name, kind) in defs {
            self.messages.insert(
                *code,
                MessageEntry {
                    code: *code,
                    name,
                    kind: *kind,
                },
            );
        }
    }

    fn add_standard_options(&mut self) {
        let defs: &[(u16, &'static str, OptionParser)] = &[
            (codes::CLIENT_ID, "client-id", |p, _| {
                Ok(Dhcp6Option::ClientId(ClientIdOption::from_payload(p)?))
            }),
            (codes::SERVER_ID, "server-id", |p, _| {
                Ok(Dhcp6Option::ServerId(ServerIdOption::from_payload(p)?))
            }),
            (codes::IA_NA, "ia-na", |p, ctx| {
                Ok(Dhcp6Option::IaNa(IaNaOption::from_payload(p, ctx)?))
            }),
            (codes::IA_TA, "ia-ta", |p, ctx| {
                Ok(Dhcp6Option::IaTa(IaTaOption::from_payload(p, ctx)?))
            }),
            (codes::IA_ADDRESS, "ia-address", |p, ctx| {
                Ok(Dhcp6Option::IaAddress(IaAddressOption::from_payload(p, ctx)?))
            }),
            (codes::OPTION_REQUEST, "option-request", |p, _| {
                Ok(Dhcp6Option::OptionRequest(OptionRequestOption::from_payload(p)?))
            }),
            (codes::PREFERENCE, "preference", |p, _| {
                Ok(Dhcp6Option::Preference(PreferenceOption::from_payload(p)?))
            }),
            (codes::ELAPSED_TIME, "elapsed-time", |p, _| {
                Ok(Dhcp6Option::ElapsedTime(ElapsedTimeOption::from_payload(p)?))
            }),
            (codes::RELAY_MESSAGE, "relay-message", |p, ctx| {
                Ok(Dhcp6Option::RelayMessage(RelayMessageOption::from_payload(p, ctx)?))
            }),
            (codes::SERVER_UNICAST, "server-unicast", |p, _| {
                Ok(Dhcp6Option::ServerUnicast(ServerUnicastOption::from_payload(p)?))
            }),
            (codes::STATUS_CODE, "status-code", |p, _| {
                Ok(Dhcp6Option::StatusCode(StatusCodeOption::from_payload(p)?))
            }),
            (codes::RAPID_COMMIT, "rapid-commit", |p, _| {
                Ok(Dhcp6Option::RapidCommit(RapidCommitOption::from_payload(p)?))
            }),
            (codes::INTERFACE_ID, "interface-id", |p, _| {
                Ok(Dhcp6Option::InterfaceId(InterfaceIdOption::from_payload(p)?))
            }),
            (codes::DNS_SERVERS, "dns-servers", |p, _| {
                Ok(Dhcp6Option::DnsServers(DnsServersOption::from_payload(p)?))
            }),
            (codes::DOMAIN_SEARCH_LIST, "domain-search-list", |p, _| {
                Ok(Dhcp6Option::DomainSearchList(DomainSearchListOption::from_payload(p)?))
            }),
            (codes::IA_PD, "ia-pd", |p, ctx| {
                Ok(Dhcp6Option::IaPd(IaPdOption::from_payload(p, ctx)?))
            }),
            (codes::IA_PREFIX, "ia-prefix", |p, ctx| {
                Ok(Dhcp6Option::IaPrefix(IaPrefixOption::from_payload(p, ctx)?))
            }),
            (codes::REMOTE_ID, "remote-id", |p, _| {
                Ok(Dhcp6Option::RemoteId(RemoteIdOption::from_payload(p)?))
            }),
            (codes::SUBSCRIBER_ID, "subscriber-id", |p, _| {
                Ok(Dhcp6Option::SubscriberId(SubscriberIdOption::from_payload(p)?))
            }),
            (codes::LQ_QUERY, "lq-query", |p, ctx| {
                Ok(Dhcp6Option::LeasequeryQuery(LqQueryOption::from_payload(p, ctx)?))
            }),
            (codes::CLIENT_DATA, "client-data", |p, ctx| {
                Ok(Dhcp6Option::ClientData(ClientDataOption::from_payload(p, ctx)?))
            }),
            (codes::CLT_TIME, "clt-time", |p, _| {
                Ok(Dhcp6Option::CltTime(CltTimeOption::from_payload(p)?))
            }),
            (codes::LQ_RELAY_DATA, "lq-relay-data", |p, ctx| {
                Ok(Dhcp6Option::LeasequeryRelayData(LqRelayDataOption::from_payload(p, ctx)?))
            }),
            (codes::LQ_CLIENT_LINK, "lq-client-link", |p, _| {
                Ok(Dhcp6Option::LeasequeryClientLink(LqClientLinkOption::from_payload(p)?))
            }),
            (codes::RELAY_ID, "relay-id", |p, _| {
                Ok(Dhcp6Option::RelayId(RelayIdOption::from_payload(p)?))
            }),
            (codes::CLIENT_LINKLAYER_ADDRESS, "client-linklayer-address", |p, _| {
                Ok(Dhcp6Option::ClientLinkLayerAddress(
                    ClientLinkLayerAddressOption::from_payload(p)?,
                ))
            }),
        ];
        for (code, name, parse) in defs {
            self.options.insert(
                *code,
                OptionEntry {
                    code: *code,
                    name,
                    parse: *parse,
                },
            );
        }
    }

    fn add_standard_duids(&mut self) {
        self.register_duid(DUID_LLT, "duid-llt");
        self.register_duid(DUID_EN, "duid-en");
        self.register_duid(DUID_LL, "duid-ll");
        self.register_duid(DUID_UUID, "duid-uuid");
    }

    fn add_standard_containment(&mut self) {
        use message::*;
        // (container message, child option, min, max)
        let message_rules: &[(u8, u16, u16, u16)] = &[
            (MSG_SOLICIT, codes::CLIENT_ID, 1, 1),
            (MSG_SOLICIT, codes::ELAPSED_TIME, 1, 1),
            (MSG_SOLICIT, codes::OPTION_REQUEST, 0, 1),
            (MSG_SOLICIT, codes::RAPID_COMMIT, 0, 1),
            (MSG_SOLICIT, codes::IA_NA, 0, MANY),
            (MSG_SOLICIT, codes::IA_TA, 0, MANY),
            (MSG_SOLICIT, codes::IA_PD, 0, MANY),
            (MSG_ADVERTISE, codes::CLIENT_ID, 1, 1),
            (MSG_ADVERTISE, codes::SERVER_ID, 1, 1),
            (MSG_ADVERTISE, codes::PREFERENCE, 0, 1),
            (MSG_ADVERTISE, codes::STATUS_CODE, 0, 1),
            (MSG_ADVERTISE, codes::IA_NA, 0, MANY),
            (MSG_ADVERTISE, codes::IA_TA, 0, MANY),
            (MSG_ADVERTISE, codes::IA_PD, 0, MANY),
            (MSG_REQUEST, codes::CLIENT_ID, 1, 1),
            (MSG_REQUEST, codes::SERVER_ID, 1, 1),
            (MSG_REQUEST, codes::ELAPSED_TIME, 1, 1),
            (MSG_REQUEST, codes::OPTION_REQUEST, 0, 1),
            (MSG_REQUEST, codes::IA_NA, 0, MANY),
            (MSG_REQUEST, codes::IA_TA, 0, MANY),
            (MSG_REQUEST, codes::IA_PD, 0, MANY),
            (MSG_CONFIRM, codes::CLIENT_ID, 1, 1),
            (MSG_CONFIRM, codes::ELAPSED_TIME, 1, 1),
            (MSG_CONFIRM, codes::IA_NA, 0, MANY),
            (MSG_CONFIRM, codes::IA_TA, 0, MANY),
            (MSG_RENEW, codes::CLIENT_ID, 1, 1),
            (MSG_RENEW, codes::SERVER_ID, 1, 1),
            (MSG_RENEW, codes::ELAPSED_TIME, 1, 1),
            (MSG_RENEW, codes::IA_NA, 0, MANY),
            (MSG_RENEW, codes::IA_TA, 0, MANY),
            (MSG_RENEW, codes::IA_PD, 0, MANY),
            (MSG_REBIND, codes::CLIENT_ID, 1, 1),
            (MSG_REBIND, codes::ELAPSED_TIME, 1, 1),
            (MSG_REBIND, codes::IA_NA, 0, MANY),
            (MSG_REBIND, codes::IA_TA, 0, MANY),
            (MSG_REBIND, codes::IA_PD, 0, MANY),
            (MSG_REPLY, codes::CLIENT_ID, 0, 1),
            (MSG_REPLY, codes::SERVER_ID, 1, 1),
            (MSG_REPLY, codes::RAPID_COMMIT, 0, 1),
            (MSG_REPLY, codes::STATUS_CODE, 0, 1),
            (MSG_REPLY, codes::SERVER_UNICAST, 0, 1),
            (MSG_REPLY, codes::IA_NA, 0, MANY),
            (MSG_REPLY, codes::IA_TA, 0, MANY),
            (MSG_REPLY, codes::IA_PD, 0, MANY),
            (MSG_RELEASE, codes::CLIENT_ID, 1, 1),
            (MSG_RELEASE, codes::SERVER_ID, 1, 1),
            (MSG_RELEASE, codes::ELAPSED_TIME, 1, 1),
            (MSG_RELEASE, codes::IA_NA, 0, MANY),
            (MSG_RELEASE, codes::IA_TA, 0, MANY),
            (MSG_RELEASE, codes::IA_PD, 0, MANY),
            (MSG_DECLINE, codes::CLIENT_ID, 1, 1),
            (MSG_DECLINE, codes::SERVER_ID, 1, 1),
            (MSG_DECLINE, codes::ELAPSED_TIME, 1, 1),
            (MSG_DECLINE, codes::IA_NA, 0, MANY),
            (MSG_DECLINE, codes::IA_TA, 0, MANY),
            (MSG_INFORMATION_REQUEST, codes::CLIENT_ID, 0, 1),
            (MSG_INFORMATION_REQUEST, codes::ELAPSED_TIME, 1, 1),
            (MSG_INFORMATION_REQUEST, codes::OPTION_REQUEST, 0, 1),
            (MSG_RELAY_FORWARD, codes::RELAY_MESSAGE, 1, 1),
            (MSG_RELAY_FORWARD, codes::INTERFACE_ID, 0, 1),
            (MSG_RELAY_FORWARD, codes::REMOTE_ID, 0, 1),
            (MSG_RELAY_FORWARD, codes::SUBSCRIBER_ID, 0, 1),
            (MSG_RELAY_FORWARD, codes::CLIENT_LINKLAYER_ADDRESS, 0, 1),
            (MSG_RELAY_FORWARD, codes::RELAY_ID, 0, 1),
            (MSG_RELAY_REPLY, codes::RELAY_MESSAGE, 1, 1),
            (MSG_RELAY_REPLY, codes::INTERFACE_ID, 0, 1),
            (MSG_LEASEQUERY, codes::CLIENT_ID, 1, 1),
            (MSG_LEASEQUERY, codes::SERVER_ID, 0, 1),
            (MSG_LEASEQUERY, codes::LQ_QUERY, 1, 1),
            (MSG_LEASEQUERY_REPLY, codes::CLIENT_ID, 1, 1),
            (MSG_LEASEQUERY_REPLY, codes::SERVER_ID, 1, 1),
            (MSG_LEASEQUERY_REPLY, codes::STATUS_CODE, 0, 1),
            (MSG_LEASEQUERY_REPLY, codes::CLIENT_DATA, 0, MANY),
            (MSG_LEASEQUERY_REPLY, codes::LQ_CLIENT_LINK, 0, 1),
            (MSG_LEASEQUERY_DONE, codes::STATUS_CODE, 0, 1),
            (MSG_LEASEQUERY_DATA, codes::CLIENT_DATA, 0, MANY),
        ];
        for (container, child, min, max) in message_rules {
            self.declare_containment(ContainerKey::Message(*container), *child, *min, *max);
        }

        let option_rules: &[(u16, u16, u16, u16)] = &[
            (codes::IA_NA, codes::IA_ADDRESS, 0, MANY),
            (codes::IA_NA, codes::STATUS_CODE, 0, 1),
            (codes::IA_TA, codes::IA_ADDRESS, 0, MANY),
            (codes::IA_TA, codes::STATUS_CODE, 0, 1),
            (codes::IA_PD, codes::IA_PREFIX, 0, MANY),
            (codes::IA_PD, codes::STATUS_CODE, 0, 1),
            (codes::IA_ADDRESS, codes::STATUS_CODE, 0, 1),
            (codes::IA_PREFIX, codes::STATUS_CODE, 0, 1),
            (codes::LQ_QUERY, codes::IA_ADDRESS, 0, 1),
            (codes::LQ_QUERY, codes::CLIENT_ID, 0, 1),
            (codes::LQ_QUERY, codes::RELAY_ID, 0, 1),
            (codes::LQ_QUERY, codes::REMOTE_ID, 0, 1),
            (codes::LQ_QUERY, codes::OPTION_REQUEST, 0, 1),
            (codes::CLIENT_DATA, codes::CLIENT_ID, 1, 1),
            (codes::CLIENT_DATA, codes::CLT_TIME, 1, 1),
            (codes::CLIENT_DATA, codes::IA_ADDRESS, 0, MANY),
            (codes::CLIENT_DATA, codes::IA_PREFIX, 0, MANY),
            (codes::CLIENT_DATA, codes::LQ_RELAY_DATA, 0, 1),
        ];
        for (container, child, min, max) in option_rules {
            self.declare_containment(ContainerKey::Option(*container), *child, *min, *max);
        }
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, built on first use
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::standard)
}

/// Install a customized registry before anything parses.
///
/// Returns false when the registry was already frozen.
pub fn install(registry: Registry) -> bool {
    REGISTRY.set(registry).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_knows_core_codes() {
        let registry = Registry::standard();
        assert!(registry.message(message::MSG_SOLICIT).is_some());
        assert!(registry.message(message::MSG_LEASEQUERY_DATA).is_some());
        assert!(registry.option(codes::CLIENT_ID).is_some());
        assert!(registry.option(codes::IA_PREFIX).is_some());
        assert!(registry.option(65001).is_none());
        assert_eq!(registry.duid_name(DUID_LLT), Some("duid-llt"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::standard();
        let result = registry.register_option(OptionEntry {
            code: codes::CLIENT_ID,
            name: "duplicate",
            parse: |p, _| Ok(Dhcp6Option::ClientId(ClientIdOption::from_payload(p)?)),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_containment_range_enforced() {
        let registry = Registry::standard();
        // A solicit without a client-id is out of range
        let result = registry.check_containment(
            ContainerKey::Message(message::MSG_SOLICIT),
            [codes::ELAPSED_TIME].into_iter(),
        );
        assert!(result.is_err());

        let result = registry.check_containment(
            ContainerKey::Message(message::MSG_SOLICIT),
            [codes::CLIENT_ID, codes::ELAPSED_TIME, codes::IA_NA, codes::IA_NA].into_iter(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_undeclared_children_allowed() {
        let registry = Registry::standard();
        // Unknown option 65001 inside a solicit does not invalidate it
        let result = registry.check_containment(
            ContainerKey::Message(message::MSG_SOLICIT),
            [codes::CLIENT_ID, codes::ELAPSED_TIME, 65001].into_iter(),
        );
        assert!(result.is_ok());
    }
}
