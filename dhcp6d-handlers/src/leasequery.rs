//! Leasequery (RFC 5007) and bulk leasequery (RFC 5460) support
//!
//! The handler answers Leasequery messages from the pluggable lease store;
//! the recorder feeds the store from successful replies; the file store is
//! the built-in backend.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use dhcp6d_core::store::hex_encode;
use dhcp6d_core::{
    Abort, Error, Handler, HandlerResult, LeaseBinding, LeaseQuerySelector, LeaseRecord,
    LeaseStore, Result, TransactionBundle,
};
use dhcp6d_wire::message::{ClientMessage, MessageType};
use dhcp6d_wire::options::query_types;
use dhcp6d_wire::options::{
    codes, status, ClientDataOption, ClientIdOption, CltTimeOption, Dhcp6Option, IaAddressOption,
    IaPrefixOption, LqClientLinkOption, StatusCodeOption,
};
use dhcp6d_wire::{Duid, Ipv6Prefix};

/// Answers leasequery requests from the store
pub struct LeasequeryHandler {
    store: Arc<dyn LeaseStore>,
    /// Requestors must come from one of these prefixes; deny all when the
    /// list is empty
    allow_from: Vec<Ipv6Prefix>,
}

impl LeasequeryHandler {
    pub fn new(store: Arc<dyn LeaseStore>, allow_from: Vec<Ipv6Prefix>) -> Self {
        Self { store, allow_from }
    }

    fn selector_for(query: &dhcp6d_wire::options::LqQueryOption) -> std::result::Result<LeaseQuerySelector, Abort> {
        match query.query_type {
            query_types::BY_ADDRESS => {
                let address = query.options.iter().find_map(|option| match option {
                    Dhcp6Option::IaAddress(a) => Some(a.address),
                    _ => None,
                });
                match address {
                    Some(address) => Ok(LeaseQuerySelector::ByAddress(address)),
                    None => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                        status::MALFORMED_QUERY,
                        "Query by address without an address",
                    ))),
                }
            }
            query_types::BY_CLIENT_ID => {
                let duid = query.options.iter().find_map(|option| match option {
                    Dhcp6Option::ClientId(o) => Some(o.duid.clone()),
                    _ => None,
                });
                match duid {
                    Some(duid) => Ok(LeaseQuerySelector::ByClientId(duid)),
                    None => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                        status::MALFORMED_QUERY,
                        "Query by client-id without a client-id",
                    ))),
                }
            }
            query_types::BY_RELAY_ID => {
                let duid = query.options.iter().find_map(|option| match option {
                    Dhcp6Option::RelayId(o) => Some(o.duid.clone()),
                    _ => None,
                });
                match duid {
                    Some(duid) => Ok(LeaseQuerySelector::ByRelayId(duid)),
                    None => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                        status::MALFORMED_QUERY,
                        "Query by relay-id without a relay-id",
                    ))),
                }
            }
            query_types::BY_LINK_ADDRESS => {
                Ok(LeaseQuerySelector::ByLinkAddress(query.link_address))
            }
            query_types::BY_REMOTE_ID => {
                let remote = query.options.iter().find_map(|option| match option {
                    Dhcp6Option::RemoteId(o) => {
                        Some((o.enterprise_number, o.remote_id.clone()))
                    }
                    _ => None,
                });
                match remote {
                    Some((enterprise_number, remote_id)) => {
                        Ok(LeaseQuerySelector::ByRemoteId {
                            enterprise_number,
                            remote_id,
                        })
                    }
                    None => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                        status::MALFORMED_QUERY,
                        "Query by remote-id without a remote-id",
                    ))),
                }
            }
            other => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                status::UNKNOWN_QUERY_TYPE,
                format!("This server can't handle query type {}", other),
            ))),
        }
    }

    fn client_data_for(record: &LeaseRecord) -> Option<Dhcp6Option> {
        let duid = record.duid()?;
        let mut options = vec![Dhcp6Option::ClientId(ClientIdOption::new(duid))];
        match &record.binding {
            LeaseBinding::Address { address } => {
                options.push(Dhcp6Option::IaAddress(IaAddressOption::new(
                    *address,
                    record.preferred_lifetime,
                    record.valid_lifetime,
                )));
            }
            LeaseBinding::Prefix { prefix } => {
                options.push(Dhcp6Option::IaPrefix(IaPrefixOption::new(
                    *prefix,
                    record.preferred_lifetime,
                    record.valid_lifetime,
                )));
            }
        }
        let elapsed = Utc::now()
            .signed_duration_since(record.last_transaction)
            .num_seconds()
            .max(0) as u32;
        options.push(Dhcp6Option::CltTime(CltTimeOption::new(elapsed)));
        Some(Dhcp6Option::ClientData(ClientDataOption::new(options)))
    }
}

impl Handler for LeasequeryHandler {
    fn name(&self) -> &'static str {
        "leasequery"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if bundle.request.message_type != MessageType::Leasequery {
            return Ok(());
        }

        // The virtual relay's peer address is the requestor
        let requestor = bundle
            .relays
            .first()
            .map(|relay| relay.peer_address)
            .unwrap_or(std::net::Ipv6Addr::UNSPECIFIED);
        if !self.allow_from.iter().any(|prefix| prefix.contains(&requestor)) {
            info!(%requestor, "leasequery requestor not allowed");
            return Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                status::NOT_ALLOWED,
                "You are not allowed to query this server",
            )));
        }

        let Some((position, Dhcp6Option::LeasequeryQuery(query))) = bundle
            .request
            .options
            .iter()
            .enumerate()
            .find(|(_, option)| option.code() == codes::LQ_QUERY)
        else {
            return Ok(());
        };
        let query = query.clone();

        let selector = Self::selector_for(&query)?;
        let records = self
            .store
            .query(&selector)
            .map_err(|e| Abort::Failure(e))?;
        debug!(count = records.len(), "leasequery matched leases");

        let client_data: Vec<Dhcp6Option> = records
            .iter()
            .filter_map(Self::client_data_for)
            .collect();

        if bundle.received_over_tcp {
            // Bulk leasequery: first binding in the reply, the rest as data
            // messages, closed off with a done message
            let transaction_id = bundle.request.transaction_id;
            let mut client_data = client_data.into_iter();
            if let Some(first) = client_data.next() {
                bundle.add_response_option(first);
            }
            for data in client_data {
                let mut message =
                    ClientMessage::new(MessageType::LeasequeryData, transaction_id);
                message.options.push(data);
                bundle.add_response(message);
            }
            bundle.add_response(ClientMessage::new(
                MessageType::LeasequeryDone,
                transaction_id,
            ));
        } else {
            match client_data.len() {
                0 => {}
                1 => bundle.add_response_option(client_data.into_iter().next().unwrap()),
                _ => {
                    // Too many bindings for one datagram: point the
                    // requestor at the links instead
                    let mut links: Vec<std::net::Ipv6Addr> =
                        records.iter().map(|record| record.link_address).collect();
                    links.sort_unstable();
                    links.dedup();
                    bundle.add_response_option(Dhcp6Option::LeasequeryClientLink(
                        LqClientLinkOption::new(links),
                    ));
                }
            }
        }

        bundle.mark_handled(position);
        Ok(())
    }
}

/// Catches leasequeries no handler understood; always appended to the
/// cleanup part of the pipeline.
pub struct UnansweredLeasequeryHandler;

impl Handler for UnansweredLeasequeryHandler {
    fn name(&self) -> &'static str {
        "unanswered-leasequery"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if bundle.request.message_type != MessageType::Leasequery {
            return Ok(());
        }
        let position = bundle
            .request
            .options
            .iter()
            .position(|option| option.code() == codes::LQ_QUERY);
        match position {
            None => Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                status::MALFORMED_QUERY,
                "Leasequery without a query option",
            ))),
            Some(position) if !bundle.is_handled(position) => {
                Err(Abort::ReplyWithStatus(StatusCodeOption::new(
                    status::UNKNOWN_QUERY_TYPE,
                    "This server can't handle this query",
                )))
            }
            Some(_) => Ok(()),
        }
    }
}

/// Feeds the lease store from successful replies, in the post phase
pub struct LeaseRecorderHandler {
    store: Arc<dyn LeaseStore>,
}

impl LeaseRecorderHandler {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self { store }
    }
}

impl Handler for LeaseRecorderHandler {
    fn name(&self) -> &'static str {
        "lease-recorder"
    }

    fn post(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let is_reply = bundle
            .response
            .as_ref()
            .map(|r| r.message_type == MessageType::Reply)
            .unwrap_or(false);
        if is_reply {
            self.store.record(bundle).map_err(Abort::Failure)?;
        }
        Ok(())
    }
}

/// The built-in lease store: a JSON file guarded by a lock
pub struct FileLeaseStore {
    path: PathBuf,
    records: Mutex<Vec<LeaseRecord>>,
}

impl FileLeaseStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::store(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn persist(&self, records: &[LeaseRecord]) -> Result<()> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::store(e.to_string()))?;
        let temporary = self.path.with_extension("tmp");
        std::fs::write(&temporary, content)?;
        std::fs::rename(&temporary, &self.path)?;
        Ok(())
    }

    fn upsert(records: &mut Vec<LeaseRecord>, record: LeaseRecord) {
        match records.iter_mut().find(|existing| {
            existing.client_duid == record.client_duid
                && existing.iaid == record.iaid
                && existing.binding == record.binding
        }) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    fn is_accepted(options: &[Dhcp6Option]) -> bool {
        !options.iter().any(|option| {
            matches!(option, Dhcp6Option::StatusCode(s) if s.status_code != status::SUCCESS)
        })
    }
}

impl LeaseStore for FileLeaseStore {
    fn record(&self, bundle: &TransactionBundle) -> Result<()> {
        let Some(response) = &bundle.response else {
            return Ok(());
        };
        let Some(duid) = bundle.request.client_id() else {
            return Ok(());
        };
        let client_duid = hex_encode(&duid.to_bytes());
        let link_address = bundle.link_address();
        let now = Utc::now();

        let remote_id = match bundle.get_relay_option(codes::REMOTE_ID, true) {
            Some(Dhcp6Option::RemoteId(option)) => Some(format!(
                "{}:{}",
                option.enterprise_number,
                hex_encode(&option.remote_id)
            )),
            _ => None,
        };
        let relay_id = match bundle.get_relay_option(codes::RELAY_ID, true) {
            Some(Dhcp6Option::RelayId(option)) => {
                Some(hex_encode(&option.duid.to_bytes()))
            }
            _ => None,
        };

        let mut new_records = Vec::new();
        for option in &response.options {
            match option {
                Dhcp6Option::IaNa(ia) if Self::is_accepted(&ia.options) => {
                    for child in &ia.options {
                        if let Dhcp6Option::IaAddress(address) = child {
                            new_records.push(LeaseRecord {
                                client_duid: client_duid.clone(),
                                link_address,
                                iaid: ia.iaid,
                                binding: LeaseBinding::Address {
                                    address: address.address,
                                },
                                preferred_lifetime: address.preferred_lifetime,
                                valid_lifetime: address.valid_lifetime,
                                last_transaction: now,
                                remote_id: remote_id.clone(),
                                relay_id: relay_id.clone(),
                            });
                        }
                    }
                }
                Dhcp6Option::IaTa(ia) if Self::is_accepted(&ia.options) => {
                    for child in &ia.options {
                        if let Dhcp6Option::IaAddress(address) = child {
                            new_records.push(LeaseRecord {
                                client_duid: client_duid.clone(),
                                link_address,
                                iaid: ia.iaid,
                                binding: LeaseBinding::Address {
                                    address: address.address,
                                },
                                preferred_lifetime: address.preferred_lifetime,
                                valid_lifetime: address.valid_lifetime,
                                last_transaction: now,
                                remote_id: remote_id.clone(),
                                relay_id: relay_id.clone(),
                            });
                        }
                    }
                }
                Dhcp6Option::IaPd(ia) if Self::is_accepted(&ia.options) => {
                    for child in &ia.options {
                        if let Dhcp6Option::IaPrefix(prefix) = child {
                            new_records.push(LeaseRecord {
                                client_duid: client_duid.clone(),
                                link_address,
                                iaid: ia.iaid,
                                binding: LeaseBinding::Prefix {
                                    prefix: prefix.prefix,
                                },
                                preferred_lifetime: prefix.preferred_lifetime,
                                valid_lifetime: prefix.valid_lifetime,
                                last_transaction: now,
                                remote_id: remote_id.clone(),
                                relay_id: relay_id.clone(),
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        if new_records.is_empty() {
            return Ok(());
        }

        let mut records = self.records.lock();
        for record in new_records {
            Self::upsert(&mut records, record);
        }
        if let Err(error) = self.persist(&records) {
            warn!(error = %error, "could not persist lease records");
            return Err(error);
        }
        Ok(())
    }

    fn query(&self, selector: &LeaseQuerySelector) -> Result<Vec<LeaseRecord>> {
        let records = self.records.lock();
        let matched = records
            .iter()
            .filter(|record| match selector {
                LeaseQuerySelector::ByAddress(address) => match &record.binding {
                    LeaseBinding::Address { address: bound } => bound == address,
                    LeaseBinding::Prefix { prefix } => prefix.contains(address),
                },
                LeaseQuerySelector::ByClientId(duid) => {
                    record.client_duid == hex_encode(&duid.to_bytes())
                }
                LeaseQuerySelector::ByRelayId(duid) => {
                    record.relay_id.as_deref() == Some(hex_encode(&duid.to_bytes()).as_str())
                }
                LeaseQuerySelector::ByLinkAddress(link) => record.link_address == *link,
                LeaseQuerySelector::ByRemoteId {
                    enterprise_number,
                    remote_id,
                } => {
                    record.remote_id.as_deref()
                        == Some(format!("{}:{}", enterprise_number, hex_encode(remote_id)).as_str())
                }
            })
            .cloned()
            .collect();
        Ok(matched)
    }
}

/// Keep the selector's DUID comparisons honest for tests and callers
pub fn duid_hex(duid: &Duid) -> String {
    hex_encode(&duid.to_bytes())
}
