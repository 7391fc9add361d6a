//! Workers: one pipeline instance each, one bundle at a time
//!
//! Workers share nothing but the queue receiver and their counter set. Each
//! builds its own pipeline from the plan, pulls packets, runs them through
//! the pipeline and sends the replies directly over the packet's reply
//! handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use dhcp6d_core::{
    DropReason, Pipeline, PipelineOutcome, PipelinePlan, Result, TransactionBundle,
};
use dhcp6d_wire::Message;

use crate::listeners::{IncomingPacket, ReplyHandle};
use crate::stats::WorkerCounters;

/// The queue end workers pull from; a shared receiver behind a lock so any
/// free worker can pick up the next packet
pub type PacketQueue = Arc<Mutex<mpsc::Receiver<IncomingPacket>>>;

pub struct Worker {
    pub id: usize,
    pipeline: Pipeline,
    queue: PacketQueue,
    counters: Arc<WorkerCounters>,
    deadline: Duration,
    /// Set when this worker's generation is retired (reload, shutdown)
    retire: Arc<AtomicBool>,
}

impl Worker {
    /// Instantiate a worker from the plan. Called after privilege drop.
    pub fn new(
        id: usize,
        plan: &PipelinePlan,
        queue: PacketQueue,
        counters: Arc<WorkerCounters>,
        deadline: Duration,
        retire: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut pipeline = dhcp6d_handlers::assemble(plan)?;
        pipeline.worker_init()?;
        Ok(Self {
            id,
            pipeline,
            queue,
            counters,
            deadline,
            retire,
        })
    }

    /// Pull packets until the queue closes or the generation is retired
    pub async fn run(mut self) {
        debug!(worker = self.id, "worker started");
        loop {
            if self.retire.load(Ordering::Relaxed) {
                break;
            }
            let packet = {
                let mut queue = self.queue.lock().await;
                queue.recv().await
            };
            match packet {
                Some(packet) => self.process(packet).await,
                None => break,
            }
        }
        debug!(worker = self.id, "worker finished");
    }

    async fn process(&mut self, packet: IncomingPacket) {
        self.counters
            .incoming_packets
            .fetch_add(1, Ordering::Relaxed);

        let incoming = match Message::parse(&packet.payload) {
            Ok((_, message)) => message,
            Err(error) => {
                debug!(
                    listener = %packet.listener_name,
                    source = %packet.source,
                    %error,
                    "dropping unparsable packet"
                );
                self.counters
                    .unparsable_packets
                    .fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        if let Err(error) = incoming.validate() {
            debug!(
                listener = %packet.listener_name,
                source = %packet.source,
                %error,
                "dropping invalid packet"
            );
            self.counters
                .unparsable_packets
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let bundle = TransactionBundle::new(
            incoming,
            packet.source_address(),
            packet.link_address,
            packet.relay_options.clone(),
            packet.received_over_multicast,
            packet.received_over_tcp,
            packet.marks.iter().cloned(),
        );
        let mut bundle = match bundle {
            Some(bundle) => bundle,
            None => {
                // No client message inside: nothing to answer
                self.counters.do_not_respond.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.counters
            .count_message_in(bundle.request.message_type.code());
        debug!(worker = self.id, bundle = %bundle, "handling");

        let started = Instant::now();
        let outcome = self.pipeline.run(&mut bundle);
        if started.elapsed() > self.deadline {
            warn!(
                worker = self.id,
                elapsed = ?started.elapsed(),
                "bundle exceeded soft deadline, dropping response"
            );
            self.counters
                .deadline_exceeded
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        match outcome {
            PipelineOutcome::Respond | PipelineOutcome::RespondWithStatus(_) => {}
            PipelineOutcome::RespondUseMulticast => {
                self.counters.use_multicast.fetch_add(1, Ordering::Relaxed);
            }
            PipelineOutcome::Drop(reason) => {
                match reason {
                    DropReason::Incomplete => {
                        self.counters
                            .incomplete_messages
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::ForOtherServer => {
                        self.counters
                            .for_other_server
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::HandlerFailure(error) => {
                        error!(worker = self.id, %error, "handler failure");
                        self.counters
                            .handling_errors
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    DropReason::Ignored
                    | DropReason::CannotRespond(_)
                    | DropReason::NoResponseShape => {
                        self.counters.do_not_respond.fetch_add(1, Ordering::Relaxed);
                    }
                }
                return;
            }
        }

        for message in bundle.into_outgoing_messages() {
            self.send_reply(&packet, message).await;
        }
    }

    /// Peel the virtual relay shell off and put the payload on the wire
    async fn send_reply(&self, packet: &IncomingPacket, outgoing: Message) {
        let payload = match &outgoing {
            Message::Relay(shell) => match shell.relayed_message() {
                Some(inner) => {
                    self.counters
                        .count_message_out(inner.message_type().map(|t| t.code()).unwrap_or(0));
                    inner.to_bytes()
                }
                None => {
                    error!(worker = self.id, "outgoing shell contains no message");
                    return;
                }
            },
            _ => {
                error!(worker = self.id, "outgoing message is not wrapped in a shell");
                return;
            }
        };

        let result = match &packet.reply {
            ReplyHandle::Udp {
                socket,
                destination,
            } => socket.send_to(&payload, destination).await.map(|_| ()),
            ReplyHandle::Tcp { sender } => sender
                .send(payload)
                .await
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone")),
        };

        match result {
            Ok(()) => {
                self.counters
                    .outgoing_packets
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                warn!(worker = self.id, %error, "could not send reply");
                self.counters
                    .handling_errors
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
