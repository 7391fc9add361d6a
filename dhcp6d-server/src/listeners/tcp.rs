//! The TCP listener for bulk leasequery (RFC 5460)
//!
//! Messages are framed with a 2-byte network-order length. One transaction
//! may produce several reply messages; the worker pushes each down the
//! connection's writer channel and the connection task frames them.

use std::net::{Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use dhcp6d_core::Result;
use dhcp6d_wire::{Ipv6Prefix, SERVER_PORT};

use crate::config::TcpListenerConfig;
use crate::listeners::{enqueue, IncomingPacket, ReplyHandle};
use crate::stats::WorkerCounters;

/// Idle connections are closed after this long without a message
const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Largest framed message we accept
const MAX_MESSAGE_SIZE: usize = 65535;

pub struct TcpListenerTask {
    name: Arc<str>,
    listener: TcpListener,
    link_address: Ipv6Addr,
    marks: Vec<String>,
    max_connections: usize,
    allow_from: Vec<Ipv6Prefix>,
}

impl TcpListenerTask {
    pub async fn bind(config: &TcpListenerConfig) -> Result<Self> {
        let bind_address = SocketAddrV6::new(config.address, SERVER_PORT, 0, 0);
        let listener = TcpListener::bind(bind_address).await?;
        info!(address = %config.address, "tcp listener ready");

        Ok(Self {
            name: format!("tcp:{}", config.address).into(),
            listener,
            link_address: config.link_address.unwrap_or(config.address),
            marks: config.marks.clone(),
            max_connections: config.max_connections,
            allow_from: config.allow_from.clone(),
        })
    }

    /// Whether this peer may talk to us at all. An empty list denies
    /// everyone; bulk leasequery is opt-in.
    fn peer_allowed(&self, peer: &SocketAddr) -> bool {
        let address = match peer {
            SocketAddr::V6(address) => *address.ip(),
            SocketAddr::V4(address) => address.ip().to_ipv6_mapped(),
        };
        self.allow_from.iter().any(|prefix| prefix.contains(&address))
    }

    pub fn spawn(
        self,
        queue: mpsc::Sender<IncomingPacket>,
        counters: Arc<WorkerCounters>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let connections = Arc::new(AtomicUsize::new(0));
            loop {
                let (stream, peer) = match self.listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        warn!(listener = %self.name, %error, "accept failed");
                        continue;
                    }
                };

                if !self.peer_allowed(&peer) {
                    info!(listener = %self.name, %peer, "connection not allowed");
                    continue;
                }
                if connections.load(Ordering::Relaxed) >= self.max_connections {
                    warn!(listener = %self.name, %peer, "connection limit reached");
                    continue;
                }

                connections.fetch_add(1, Ordering::Relaxed);
                debug!(listener = %self.name, %peer, "connection accepted");

                let queue = queue.clone();
                let counters = counters.clone();
                let connections = connections.clone();
                let name = self.name.clone();
                let marks = self.marks.clone();
                let link_address = self.link_address;

                tokio::spawn(async move {
                    if let Err(error) =
                        handle_connection(stream, peer, name.clone(), marks, link_address, queue, counters)
                            .await
                    {
                        debug!(listener = %name, %peer, %error, "connection closed");
                    }
                    connections.fetch_sub(1, Ordering::Relaxed);
                });
            }
        })
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    listener_name: Arc<str>,
    marks: Vec<String>,
    link_address: Ipv6Addr,
    queue: mpsc::Sender<IncomingPacket>,
    counters: Arc<WorkerCounters>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    // Workers push reply frames here; the writer half owns the socket
    let (reply_tx, mut reply_rx) = mpsc::channel::<Vec<u8>>(16);
    let writer_task = tokio::spawn(async move {
        while let Some(payload) = reply_rx.recv().await {
            let length = (payload.len() as u16).to_be_bytes();
            if writer.write_all(&length).await.is_err() {
                break;
            }
            if writer.write_all(&payload).await.is_err() {
                break;
            }
            let _ = writer.flush().await;
        }
    });

    loop {
        let mut length_bytes = [0u8; 2];
        match timeout(IDLE_TIMEOUT, reader.read_exact(&mut length_bytes)).await {
            Err(_) => {
                debug!(%peer, "idle timeout, closing connection");
                break;
            }
            Ok(Err(_)) => break,
            Ok(Ok(_)) => {}
        }

        let length = u16::from_be_bytes(length_bytes) as usize;
        if length == 0 || length > MAX_MESSAGE_SIZE {
            warn!(%peer, length, "bad frame length, closing connection");
            break;
        }

        let mut payload = vec![0u8; length];
        match timeout(IDLE_TIMEOUT, reader.read_exact(&mut payload)).await {
            Err(_) | Ok(Err(_)) => break,
            Ok(Ok(_)) => {}
        }

        let packet = IncomingPacket {
            listener_name: listener_name.clone(),
            interface: None,
            source: peer,
            payload,
            marks: marks.clone(),
            link_address,
            relay_options: vec![],
            received_over_multicast: false,
            received_over_tcp: true,
            reply: ReplyHandle::Tcp {
                sender: reply_tx.clone(),
            },
        };
        enqueue(&queue, &counters, packet);
    }

    drop(reply_tx);
    let _ = writer_task.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener_with_allow_from(allow_from: Vec<Ipv6Prefix>) -> TcpListenerTask {
        // Binding to a throwaway port just for the policy check
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let listener = TcpListener::bind("[::1]:0").await.unwrap();
            TcpListenerTask {
                name: "tcp:test".into(),
                listener,
                link_address: Ipv6Addr::UNSPECIFIED,
                marks: vec![],
                max_connections: 10,
                allow_from,
            }
        })
    }

    #[test]
    fn test_empty_allow_from_denies() {
        let listener = listener_with_allow_from(vec![]);
        let peer: SocketAddr = "[2001:db8::1]:1234".parse().unwrap();
        assert!(!listener.peer_allowed(&peer));
    }

    #[test]
    fn test_allow_from_prefix_match() {
        let listener = listener_with_allow_from(vec!["2001:db8::/32".parse().unwrap()]);
        let inside: SocketAddr = "[2001:db8::1]:1234".parse().unwrap();
        let outside: SocketAddr = "[2001:db9::1]:1234".parse().unwrap();
        assert!(listener.peer_allowed(&inside));
        assert!(!listener.peer_allowed(&outside));
    }
}
