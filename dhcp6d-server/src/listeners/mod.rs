//! Listeners: where packets come from and replies go out
//!
//! Each listener owns its sockets for the lifetime of the server, tags what
//! it receives with its marks and interface metadata, and hands the bytes to
//! the master as an [`IncomingPacket`]. Replies do not pass back through the
//! master: the worker sends directly through the handle in the packet.

mod tcp;
mod udp;

pub use tcp::TcpListenerTask;
pub use udp::{MulticastListener, UnicastListener};

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use dhcp6d_core::Result;
use dhcp6d_wire::options::Dhcp6Option;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::warn;

use crate::config::ListenerConfig;
use crate::stats::WorkerCounters;

/// How a worker sends replies for one packet
#[derive(Clone)]
pub enum ReplyHandle {
    /// Datagram reply to the recorded source address through the socket the
    /// packet came in on
    Udp {
        socket: Arc<UdpSocket>,
        destination: SocketAddr,
    },
    /// Stream reply down the connection held for this transaction; messages
    /// are framed by the connection task
    Tcp {
        sender: mpsc::Sender<Vec<u8>>,
    },
}

/// One received packet plus everything needed to process and answer it
pub struct IncomingPacket {
    /// Name of the receiving listener, for logs
    pub listener_name: Arc<str>,
    /// Interface the listener is bound to, if any
    pub interface: Option<Arc<str>>,
    /// Who sent this packet
    pub source: SocketAddr,
    /// The raw DHCPv6 payload
    pub payload: Vec<u8>,
    /// Marks the listener attaches to everything it receives
    pub marks: Vec<String>,
    /// Link address identifying the listener's network, for the virtual
    /// relay shell
    pub link_address: Ipv6Addr,
    /// Options the listener contributes to the virtual relay shell
    /// (interface-id and friends)
    pub relay_options: Vec<Dhcp6Option>,
    pub received_over_multicast: bool,
    pub received_over_tcp: bool,
    pub reply: ReplyHandle,
}

impl IncomingPacket {
    /// The source address as an IPv6 address
    pub fn source_address(&self) -> Ipv6Addr {
        match self.source {
            SocketAddr::V6(address) => *address.ip(),
            SocketAddr::V4(address) => address.ip().to_ipv6_mapped(),
        }
    }
}

/// Queue a packet without ever blocking the accept path
pub fn enqueue(
    queue: &mpsc::Sender<IncomingPacket>,
    counters: &WorkerCounters,
    packet: IncomingPacket,
) {
    if let Err(error) = queue.try_send(packet) {
        // A full queue drops the packet: clients retransmit, we stay
        // responsive
        counters
            .queue_overflow
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        warn!(error = %error, "work queue full, dropping packet");
    }
}

/// Bring up every configured listener and spawn its receive task
pub async fn spawn_all(
    configs: &[ListenerConfig],
    queue: mpsc::Sender<IncomingPacket>,
    counters: Arc<WorkerCounters>,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let mut tasks = Vec::new();
    for config in configs {
        match config {
            ListenerConfig::Multicast(settings) => {
                let listener = MulticastListener::bind(settings)?;
                tasks.push(listener.spawn(queue.clone(), counters.clone()));
            }
            ListenerConfig::Unicast(settings) => {
                let listener = UnicastListener::bind(settings)?;
                tasks.push(listener.spawn(queue.clone(), counters.clone()));
            }
            ListenerConfig::Tcp(settings) => {
                let listener = TcpListenerTask::bind(settings).await?;
                tasks.push(listener.spawn(queue.clone(), counters.clone()));
            }
        }
    }
    Ok(tasks)
}
