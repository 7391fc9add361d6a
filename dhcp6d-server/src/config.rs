//! Server configuration
//!
//! The configuration file is JSON. Parsing it produces a validated
//! [`ServerConfig`]: socket definitions for the listeners and an immutable
//! handler plan workers instantiate from. The handler section is a thin
//! adapter: every entry maps onto one factory from `dhcp6d-handlers`.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use dhcp6d_core::{Error, LeaseStore, PipelinePlan, PlanNode, Result};
use dhcp6d_handlers::factories::{
    CopyOptionFactory, CopyRelayOptionFactory, ElapsedTimeFactory, IgnoreFactory,
    LeaseRecorderFactory, LeasequeryFactory, MarkedWithFactory, MessageTypeFactory,
    PreferenceFactory, RateLimitFactory, ServerUnicastFactory, StaticAssignmentFactory,
    SubnetFactory, TimingLimitsFactory,
};
use dhcp6d_handlers::{
    AssignmentLifetimes, FileLeaseStore, RateLimitCounters, RateLimitKey, StaticAssignmentHandler,
    TimingLimits,
};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::{Duid, Ipv6Prefix, INFINITY};

pub const DEFAULT_PID_FILE: &str = "/var/run/ipv6-dhcpd.pid";
pub const DEFAULT_CONTROL_SOCKET: &str = "/var/run/ipv6-dhcpd.sock";
pub const DEFAULT_QUEUE_SIZE: usize = 100;
pub const DEFAULT_MESSAGE_DEADLINE_SECS: u64 = 5;

/// The parsed and validated server configuration
pub struct ServerConfig {
    pub server_duid: Duid,
    pub workers: usize,
    pub queue_size: usize,
    pub message_deadline_secs: u64,
    pub user: Option<String>,
    pub group: Option<String>,
    pub pid_file: PathBuf,
    pub control_socket: PathBuf,
    pub listeners: Vec<ListenerConfig>,
    pub plan: PipelinePlan,
    /// Rate limiter counter tables, for the stats aggregation
    pub rate_limiters: Vec<Arc<RateLimitCounters>>,
}

#[derive(Debug, Clone)]
pub enum ListenerConfig {
    Multicast(MulticastListenerConfig),
    Unicast(UnicastListenerConfig),
    Tcp(TcpListenerConfig),
}

#[derive(Debug, Clone)]
pub struct MulticastListenerConfig {
    pub interface: String,
    pub link_address: Option<Ipv6Addr>,
    pub marks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UnicastListenerConfig {
    pub address: Ipv6Addr,
    pub link_address: Option<Ipv6Addr>,
    pub marks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    pub address: Ipv6Addr,
    pub link_address: Option<Ipv6Addr>,
    pub max_connections: usize,
    pub allow_from: Vec<Ipv6Prefix>,
    pub marks: Vec<String>,
}

impl ServerConfig {
    /// Load and validate the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        Self::from_file(file, path)
    }

    fn from_file(file: ConfigFile, path: &Path) -> Result<Self> {
        let duid_bytes = decode_hex(&file.server_duid).ok_or_else(|| {
            Error::config(format!("{}: server-duid is not valid hex", path.display()))
        })?;
        let server_duid = Duid::parse(&duid_bytes)
            .map_err(|e| Error::config(format!("{}: server-duid: {}", path.display(), e)))?;

        if file.listeners.is_empty() {
            return Err(Error::config(format!(
                "{}: at least one listener is required",
                path.display()
            )));
        }

        let listeners = file
            .listeners
            .iter()
            .map(|listener| listener.build())
            .collect::<Result<Vec<_>>>()?;

        // The lease store is shared by the recorder and any leasequery
        // handlers in the tree
        let store: Option<Arc<dyn LeaseStore>> = match &file.lease_store {
            Some(path) => Some(Arc::new(FileLeaseStore::open(path.clone())?)),
            None => None,
        };

        let mut builder = PlanBuilder {
            store: store.clone(),
            rate_limiters: Vec::new(),
            base_dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let mut nodes = file
            .handlers
            .iter()
            .map(|handler| builder.build_node(handler))
            .collect::<Result<Vec<_>>>()?;

        // Successful replies feed the store without any explicit config
        if let Some(store) = store {
            nodes.push(PlanNode::Handler(Arc::new(LeaseRecorderFactory { store })));
        }

        let plan = PipelinePlan {
            server_duid,
            allow_rapid_commit: file.allow_rapid_commit,
            rapid_commit_rejections: file.rapid_commit_rejections,
            authoritative: file.authoritative,
            nodes,
        };

        Ok(Self {
            server_duid: plan.server_duid.clone(),
            workers: file.workers.unwrap_or_else(num_workers),
            queue_size: file.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE),
            message_deadline_secs: file
                .message_deadline_secs
                .unwrap_or(DEFAULT_MESSAGE_DEADLINE_SECS),
            user: file.user,
            group: file.group,
            pid_file: file
                .pid_file
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_FILE)),
            control_socket: file
                .control_socket
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONTROL_SOCKET)),
            listeners,
            plan,
            rate_limiters: builder.rate_limiters,
        })
    }

    /// A human-readable summary for the `-C` flag
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("server-duid: {}\n", self.server_duid));
        out.push_str(&format!("workers: {}\n", self.workers));
        out.push_str(&format!("queue-size: {}\n", self.queue_size));
        out.push_str(&format!("pid-file: {}\n", self.pid_file.display()));
        out.push_str(&format!(
            "control-socket: {}\n",
            self.control_socket.display()
        ));
        out.push_str(&format!("listeners: {}\n", self.listeners.len()));
        out.push_str(&format!("handlers: {}\n", self.plan.nodes.len()));
        out.push_str(&format!("authoritative: {}\n", self.plan.authoritative));
        out.push_str(&format!(
            "allow-rapid-commit: {}\n",
            self.plan.allow_rapid_commit
        ));
        out
    }
}

fn num_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// The raw JSON shape of the configuration file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ConfigFile {
    server_duid: String,
    #[serde(default)]
    workers: Option<usize>,
    #[serde(default)]
    queue_size: Option<usize>,
    #[serde(default)]
    message_deadline_secs: Option<u64>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    pid_file: Option<PathBuf>,
    #[serde(default)]
    control_socket: Option<PathBuf>,
    #[serde(default)]
    allow_rapid_commit: bool,
    #[serde(default)]
    rapid_commit_rejections: bool,
    #[serde(default)]
    authoritative: bool,
    #[serde(default)]
    lease_store: Option<PathBuf>,
    listeners: Vec<RawListener>,
    #[serde(default)]
    handlers: Vec<RawHandler>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum RawListener {
    #[serde(rename_all = "kebab-case")]
    Multicast {
        interface: String,
        #[serde(default)]
        link_address: Option<Ipv6Addr>,
        #[serde(default)]
        marks: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    Unicast {
        address: Ipv6Addr,
        #[serde(default)]
        link_address: Option<Ipv6Addr>,
        #[serde(default)]
        marks: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    Tcp {
        address: Ipv6Addr,
        #[serde(default)]
        link_address: Option<Ipv6Addr>,
        #[serde(default = "default_max_connections")]
        max_connections: usize,
        #[serde(default)]
        allow_from: Vec<String>,
        #[serde(default)]
        marks: Vec<String>,
    },
}

fn default_max_connections() -> usize {
    10
}

impl RawListener {
    fn build(&self) -> Result<ListenerConfig> {
        match self {
            RawListener::Multicast {
                interface,
                link_address,
                marks,
            } => Ok(ListenerConfig::Multicast(MulticastListenerConfig {
                interface: interface.clone(),
                link_address: *link_address,
                marks: marks.clone(),
            })),
            RawListener::Unicast {
                address,
                link_address,
                marks,
            } => Ok(ListenerConfig::Unicast(UnicastListenerConfig {
                address: *address,
                link_address: *link_address,
                marks: marks.clone(),
            })),
            RawListener::Tcp {
                address,
                link_address,
                max_connections,
                allow_from,
                marks,
            } => Ok(ListenerConfig::Tcp(TcpListenerConfig {
                address: *address,
                link_address: *link_address,
                max_connections: *max_connections,
                allow_from: parse_prefixes(allow_from)?,
                marks: marks.clone(),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum RawHandler {
    #[serde(rename_all = "kebab-case")]
    StaticCsv {
        file: PathBuf,
        #[serde(default = "default_address_preferred")]
        address_preferred_lifetime: u32,
        #[serde(default = "default_address_valid")]
        address_valid_lifetime: u32,
        #[serde(default = "default_prefix_preferred")]
        prefix_preferred_lifetime: u32,
        #[serde(default = "default_prefix_valid")]
        prefix_valid_lifetime: u32,
    },
    #[serde(rename_all = "kebab-case")]
    StaticJson {
        file: PathBuf,
        #[serde(default = "default_address_preferred")]
        address_preferred_lifetime: u32,
        #[serde(default = "default_address_valid")]
        address_valid_lifetime: u32,
        #[serde(default = "default_prefix_preferred")]
        prefix_preferred_lifetime: u32,
        #[serde(default = "default_prefix_valid")]
        prefix_valid_lifetime: u32,
    },
    #[serde(rename_all = "kebab-case")]
    RateLimit {
        #[serde(default = "default_rate_limit_key")]
        key: String,
        #[serde(default = "default_rate")]
        rate: u32,
        #[serde(default = "default_per")]
        per: u32,
        #[serde(default)]
        burst: Option<u32>,
    },
    #[serde(rename_all = "kebab-case")]
    TimingLimits {
        #[serde(default)]
        prefix_delegation: bool,
        #[serde(default)]
        min_t1: u32,
        #[serde(default = "default_infinity")]
        max_t1: u32,
        #[serde(default = "default_factor_t1")]
        factor_t1: Option<f64>,
        #[serde(default)]
        min_t2: u32,
        #[serde(default = "default_infinity")]
        max_t2: u32,
        #[serde(default = "default_factor_t2")]
        factor_t2: Option<f64>,
    },
    #[serde(rename_all = "kebab-case")]
    Preference { value: u8 },
    #[serde(rename_all = "kebab-case")]
    Ignore {
        #[serde(default)]
        message_types: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    ServerUnicast { address: Ipv6Addr },
    #[serde(rename_all = "kebab-case")]
    CopyOption {
        option: u16,
        #[serde(default)]
        always_send: bool,
    },
    #[serde(rename_all = "kebab-case")]
    CopyRelayOption { option: u16 },
    #[serde(rename_all = "kebab-case")]
    Leasequery {
        #[serde(default)]
        allow_from: Vec<String>,
    },
    #[serde(rename_all = "kebab-case")]
    Filter {
        filter: RawFilter,
        #[serde(default)]
        handlers: Vec<RawHandler>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum RawFilter {
    #[serde(rename_all = "kebab-case")]
    MarkedWith { mark: String },
    #[serde(rename_all = "kebab-case")]
    Subnet { prefixes: Vec<String> },
    #[serde(rename_all = "kebab-case")]
    ElapsedTime { min_elapsed_time: u16 },
    #[serde(rename_all = "kebab-case")]
    MessageType { message_types: Vec<String> },
}

fn default_address_preferred() -> u32 {
    3600
}
fn default_address_valid() -> u32 {
    7200
}
fn default_prefix_preferred() -> u32 {
    43200
}
fn default_prefix_valid() -> u32 {
    86400
}
fn default_rate_limit_key() -> String {
    "duid".to_string()
}
fn default_rate() -> u32 {
    5
}
fn default_per() -> u32 {
    30
}
fn default_infinity() -> u32 {
    INFINITY
}
fn default_factor_t1() -> Option<f64> {
    Some(0.5)
}
fn default_factor_t2() -> Option<f64> {
    Some(0.8)
}

/// Builds plan nodes from raw handler entries, collecting the shared state
/// (lease store, rate limiter tables) they reference.
struct PlanBuilder {
    store: Option<Arc<dyn LeaseStore>>,
    rate_limiters: Vec<Arc<RateLimitCounters>>,
    base_dir: PathBuf,
}

impl PlanBuilder {
    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.base_dir.join(file)
        }
    }

    fn build_node(&mut self, raw: &RawHandler) -> Result<PlanNode> {
        match raw {
            RawHandler::StaticCsv {
                file,
                address_preferred_lifetime,
                address_valid_lifetime,
                prefix_preferred_lifetime,
                prefix_valid_lifetime,
            } => {
                let mapping = StaticAssignmentHandler::load_csv(&self.resolve(file))?;
                Ok(PlanNode::Handler(Arc::new(StaticAssignmentFactory {
                    mapping: Arc::new(mapping),
                    lifetimes: AssignmentLifetimes {
                        address_preferred: *address_preferred_lifetime,
                        address_valid: *address_valid_lifetime,
                        prefix_preferred: *prefix_preferred_lifetime,
                        prefix_valid: *prefix_valid_lifetime,
                    },
                })))
            }
            RawHandler::StaticJson {
                file,
                address_preferred_lifetime,
                address_valid_lifetime,
                prefix_preferred_lifetime,
                prefix_valid_lifetime,
            } => {
                let mapping = StaticAssignmentHandler::load_json(&self.resolve(file))?;
                Ok(PlanNode::Handler(Arc::new(StaticAssignmentFactory {
                    mapping: Arc::new(mapping),
                    lifetimes: AssignmentLifetimes {
                        address_preferred: *address_preferred_lifetime,
                        address_valid: *address_valid_lifetime,
                        prefix_preferred: *prefix_preferred_lifetime,
                        prefix_valid: *prefix_valid_lifetime,
                    },
                })))
            }
            RawHandler::RateLimit {
                key,
                rate,
                per,
                burst,
            } => {
                let key = RateLimitKey::from_name(key).ok_or_else(|| {
                    Error::config(format!("unknown rate-limit key '{}'", key))
                })?;
                let counters = Arc::new(RateLimitCounters::new(*rate, *per, *burst));
                self.rate_limiters.push(counters.clone());
                Ok(PlanNode::Handler(Arc::new(RateLimitFactory {
                    key,
                    counters,
                })))
            }
            RawHandler::TimingLimits {
                prefix_delegation,
                min_t1,
                max_t1,
                factor_t1,
                min_t2,
                max_t2,
                factor_t2,
            } => {
                let limits =
                    TimingLimits::new(*min_t1, *max_t1, *factor_t1, *min_t2, *max_t2, *factor_t2)?;
                Ok(PlanNode::Handler(Arc::new(TimingLimitsFactory {
                    limits,
                    prefix_delegation: *prefix_delegation,
                })))
            }
            RawHandler::Preference { value } => Ok(PlanNode::Handler(Arc::new(
                PreferenceFactory { preference: *value },
            ))),
            RawHandler::Ignore { message_types } => Ok(PlanNode::Handler(Arc::new(
                IgnoreFactory {
                    message_types: parse_message_types(message_types)?,
                },
            ))),
            RawHandler::ServerUnicast { address } => Ok(PlanNode::Handler(Arc::new(
                ServerUnicastFactory { address: *address },
            ))),
            RawHandler::CopyOption {
                option,
                always_send,
            } => Ok(PlanNode::Handler(Arc::new(CopyOptionFactory {
                option_code: *option,
                always_send: *always_send,
            }))),
            RawHandler::CopyRelayOption { option } => Ok(PlanNode::Handler(Arc::new(
                CopyRelayOptionFactory {
                    option_code: *option,
                },
            ))),
            RawHandler::Leasequery { allow_from } => {
                let store = self.store.clone().ok_or_else(|| {
                    Error::config("leasequery handler requires a lease-store")
                })?;
                Ok(PlanNode::Handler(Arc::new(LeasequeryFactory {
                    store,
                    allow_from: parse_prefixes(allow_from)?,
                })))
            }
            RawHandler::Filter { filter, handlers } => {
                let children = handlers
                    .iter()
                    .map(|child| self.build_node(child))
                    .collect::<Result<Vec<_>>>()?;
                let factory: Arc<dyn dhcp6d_core::FilterFactory> = match filter {
                    RawFilter::MarkedWith { mark } => {
                        Arc::new(MarkedWithFactory { mark: mark.clone() })
                    }
                    RawFilter::Subnet { prefixes } => Arc::new(SubnetFactory {
                        prefixes: parse_prefixes(prefixes)?,
                    }),
                    RawFilter::ElapsedTime { min_elapsed_time } => Arc::new(ElapsedTimeFactory {
                        min_elapsed_time: *min_elapsed_time,
                    }),
                    RawFilter::MessageType { message_types } => Arc::new(MessageTypeFactory {
                        message_types: parse_message_types(message_types)?,
                    }),
                };
                Ok(PlanNode::Filter { factory, children })
            }
        }
    }
}

fn parse_prefixes(texts: &[String]) -> Result<Vec<Ipv6Prefix>> {
    texts
        .iter()
        .map(|text| {
            text.parse::<Ipv6Prefix>()
                .map_err(|_| Error::config(format!("bad prefix '{}'", text)))
        })
        .collect()
}

fn parse_message_types(names: &[String]) -> Result<Vec<MessageType>> {
    let by_name: HashMap<&str, MessageType> = [
        ("solicit", MessageType::Solicit),
        ("request", MessageType::Request),
        ("confirm", MessageType::Confirm),
        ("renew", MessageType::Renew),
        ("rebind", MessageType::Rebind),
        ("release", MessageType::Release),
        ("decline", MessageType::Decline),
        ("information-request", MessageType::InformationRequest),
        ("leasequery", MessageType::Leasequery),
    ]
    .into_iter()
    .collect();

    names
        .iter()
        .map(|name| {
            by_name
                .get(name.as_str())
                .copied()
                .ok_or_else(|| Error::config(format!("unknown message type '{}'", name)))
        })
        .collect()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    let clean: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect();
    if clean.len() % 2 != 0 {
        return None;
    }
    (0..clean.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&clean[i..i + 2], 16).ok())
        .collect()
}
