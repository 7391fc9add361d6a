//! UDP listeners: per-interface multicast and plain unicast

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info};

use dhcp6d_core::{Error, Result};
use dhcp6d_wire::options::{Dhcp6Option, InterfaceIdOption};
use dhcp6d_wire::{ALL_DHCP_RELAY_AGENTS_AND_SERVERS, SERVER_PORT};

use crate::config::{MulticastListenerConfig, UnicastListenerConfig};
use crate::listeners::{enqueue, IncomingPacket, ReplyHandle};
use crate::stats::WorkerCounters;

const RECV_BUFFER_SIZE: usize = 9000;

fn create_udp_socket(bind_address: SocketAddrV6) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| Error::Io(e))?;
    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&bind_address.into())
        .map_err(|e| Error::config(format!("cannot bind {}: {}", bind_address, e)))?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> Result<UdpSocket> {
    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(Error::Io)
}

/// Joins the DHCPv6 server group on one interface and answers through a
/// link-local source on that same interface.
pub struct MulticastListener {
    name: Arc<str>,
    interface: Arc<str>,
    socket: Arc<UdpSocket>,
    link_address: Ipv6Addr,
    marks: Vec<String>,
}

impl MulticastListener {
    pub fn bind(config: &MulticastListenerConfig) -> Result<Self> {
        let interface_index = nix::net::if_::if_nametoindex(config.interface.as_str())
            .map_err(|e| {
                Error::config(format!("interface '{}': {}", config.interface, e))
            })?;

        let bind_address = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, SERVER_PORT, 0, 0);
        let socket = create_udp_socket(bind_address)?;
        socket
            .join_multicast_v6(&ALL_DHCP_RELAY_AGENTS_AND_SERVERS, interface_index)
            .map_err(|e| {
                Error::config(format!(
                    "cannot join multicast group on '{}': {}",
                    config.interface, e
                ))
            })?;

        info!(
            interface = %config.interface,
            group = %ALL_DHCP_RELAY_AGENTS_AND_SERVERS,
            "multicast listener ready"
        );

        Ok(Self {
            name: format!("multicast:{}", config.interface).into(),
            interface: config.interface.as_str().into(),
            socket: Arc::new(into_tokio(socket)?),
            link_address: config.link_address.unwrap_or(Ipv6Addr::UNSPECIFIED),
            marks: config.marks.clone(),
        })
    }

    pub fn spawn(
        self,
        queue: mpsc::Sender<IncomingPacket>,
        counters: Arc<WorkerCounters>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];
            loop {
                match self.socket.recv_from(&mut buffer).await {
                    Ok((size, source)) => {
                        let packet = IncomingPacket {
                            listener_name: self.name.clone(),
                            interface: Some(self.interface.clone()),
                            source,
                            payload: buffer[..size].to_vec(),
                            marks: self.marks.clone(),
                            link_address: self.link_address,
                            relay_options: vec![Dhcp6Option::InterfaceId(
                                InterfaceIdOption::new(self.interface.as_bytes().to_vec()),
                            )],
                            received_over_multicast: true,
                            received_over_tcp: false,
                            reply: ReplyHandle::Udp {
                                socket: self.socket.clone(),
                                destination: source,
                            },
                        };
                        enqueue(&queue, &counters, packet);
                    }
                    Err(error) => {
                        error!(listener = %self.name, %error, "error receiving packet");
                    }
                }
            }
        })
    }
}

/// Listens on a specific unicast address, typically fed by a relay
pub struct UnicastListener {
    name: Arc<str>,
    socket: Arc<UdpSocket>,
    link_address: Ipv6Addr,
    marks: Vec<String>,
}

impl UnicastListener {
    pub fn bind(config: &UnicastListenerConfig) -> Result<Self> {
        let bind_address = SocketAddrV6::new(config.address, SERVER_PORT, 0, 0);
        let socket = create_udp_socket(bind_address)?;

        info!(address = %config.address, "unicast listener ready");

        Ok(Self {
            name: format!("unicast:{}", config.address).into(),
            socket: Arc::new(into_tokio(socket)?),
            link_address: config.link_address.unwrap_or(config.address),
            marks: config.marks.clone(),
        })
    }

    pub fn spawn(
        self,
        queue: mpsc::Sender<IncomingPacket>,
        counters: Arc<WorkerCounters>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buffer = [0u8; RECV_BUFFER_SIZE];
            loop {
                match self.socket.recv_from(&mut buffer).await {
                    Ok((size, source)) => {
                        let packet = IncomingPacket {
                            listener_name: self.name.clone(),
                            interface: None,
                            source,
                            payload: buffer[..size].to_vec(),
                            marks: self.marks.clone(),
                            link_address: self.link_address,
                            relay_options: vec![],
                            received_over_multicast: false,
                            received_over_tcp: false,
                            reply: ReplyHandle::Udp {
                                socket: self.socket.clone(),
                                destination: source,
                            },
                        };
                        enqueue(&queue, &counters, packet);
                    }
                    Err(error) => {
                        error!(listener = %self.name, %error, "error receiving packet");
                    }
                }
            }
        })
    }
}
