//! The message-handling pipeline
//!
//! A pipeline is an ordered tree of nodes: handlers at the leaves, filters
//! at interior nodes gating their subtrees. Each bundle is driven through
//! three phases. The pre walk evaluates filters against the bundle's current
//! state and records the realized visit order; the handle phase replays that
//! order; the post phase replays it in reverse and never aborts.

use tracing::{debug, error, warn};

use dhcp6d_wire::message::{ClientMessage, MessageType};
use dhcp6d_wire::options::{codes, status, Dhcp6Option, ServerIdOption, StatusCodeOption};
use dhcp6d_wire::Duid;

use crate::bundle::TransactionBundle;
use crate::error::{Abort, Error};
use crate::handler::{Filter, Handler};

/// One node of the pipeline tree
pub enum PipelineNode {
    Handler(Box<dyn Handler>),
    Filter {
        filter: Box<dyn Filter>,
        children: Vec<PipelineNode>,
    },
}

impl PipelineNode {
    fn handler_mut(&mut self) -> &mut dyn Handler {
        match self {
            PipelineNode::Handler(handler) => handler.as_mut(),
            PipelineNode::Filter { filter, .. } => filter.as_mut(),
        }
    }
}

/// Why a bundle produced no reply
#[derive(Debug)]
pub enum DropReason {
    /// A handler decided the request is not ours
    Ignored,
    /// The request was recognizably truncated junk
    Incomplete,
    /// A handler refused with a recorded reason
    CannotRespond(String),
    /// The request carries another server's server-id
    ForOtherServer,
    /// The request type has no response shape (Reconfigure, server messages)
    NoResponseShape,
    /// A handler failed; counts toward the crash watchdog
    HandlerFailure(Error),
}

/// What the pipeline decided for a bundle
#[derive(Debug)]
pub enum PipelineOutcome {
    /// Send the response(s) in the bundle
    Respond,
    /// Send the synthesized use-multicast refusal
    RespondUseMulticast,
    /// Send a bare status reply with this status code
    RespondWithStatus(u16),
    /// Send nothing
    Drop(DropReason),
}

/// An ordered handler/filter tree plus the server identity it speaks with
pub struct Pipeline {
    server_duid: Duid,
    nodes: Vec<PipelineNode>,
}

impl Pipeline {
    pub fn new(server_duid: Duid, nodes: Vec<PipelineNode>) -> Self {
        Self { server_duid, nodes }
    }

    pub fn server_duid(&self) -> &Duid {
        &self.server_duid
    }

    /// Cascade per-worker initialisation through every node, matched or not
    pub fn worker_init(&mut self) -> crate::error::Result<()> {
        fn walk(nodes: &mut [PipelineNode]) -> crate::error::Result<()> {
            for node in nodes {
                match node {
                    PipelineNode::Handler(handler) => handler.worker_init()?,
                    PipelineNode::Filter { filter, children } => {
                        filter.worker_init()?;
                        walk(children)?;
                    }
                }
            }
            Ok(())
        }
        walk(&mut self.nodes)
    }

    /// Drive one bundle through all phases
    pub fn run(&mut self, bundle: &mut TransactionBundle) -> PipelineOutcome {
        // Pre phase: evaluate filters and record the realized visit order
        let mut realized: Vec<Vec<usize>> = Vec::new();
        let mut prefix = Vec::new();
        if let Err(abort) = walk_pre(&mut self.nodes, bundle, &mut prefix, &mut realized) {
            return self.aborted(bundle, abort);
        }

        // Choose the response shape before any handler builds on it
        match init_response(bundle) {
            Ok(true) => {}
            Ok(false) => {
                debug!(request = bundle.request.message_type.name(), "no response shape");
                return PipelineOutcome::Drop(DropReason::NoResponseShape);
            }
            Err(abort) => return self.aborted(bundle, abort),
        }

        // Handle phase: same order as the realized pre walk
        for path in &realized {
            let node = node_mut(&mut self.nodes, path);
            if let Err(abort) = node.handle(bundle) {
                return self.aborted(bundle, abort);
            }
        }

        // Post phase: reverse order; errors are logged and swallowed so the
        // response is still sent
        for path in realized.iter().rev() {
            let node = node_mut(&mut self.nodes, path);
            if let Err(abort) = node.post(bundle) {
                warn!(handler = node.name(), ?abort, "error in post phase, response kept");
            }
        }

        if bundle.response.is_some() {
            PipelineOutcome::Respond
        } else {
            PipelineOutcome::Drop(DropReason::Ignored)
        }
    }

    fn aborted(&self, bundle: &mut TransactionBundle, abort: Abort) -> PipelineOutcome {
        match abort {
            Abort::Ignore => {
                debug!("ignoring message");
                bundle.response = None;
                PipelineOutcome::Drop(DropReason::Ignored)
            }
            Abort::Incomplete => {
                debug!("ignoring incomplete message");
                bundle.response = None;
                PipelineOutcome::Drop(DropReason::Incomplete)
            }
            Abort::CannotRespond(reason) => {
                debug!(reason = %reason, "cannot respond to this message");
                bundle.response = None;
                PipelineOutcome::Drop(DropReason::CannotRespond(reason))
            }
            Abort::ForOtherServer => {
                debug!("message is for another server");
                bundle.response = None;
                PipelineOutcome::Drop(DropReason::ForOtherServer)
            }
            Abort::Failure(error) => {
                error!(error = %error, "handler failed while processing bundle");
                bundle.response = None;
                PipelineOutcome::Drop(DropReason::HandlerFailure(error))
            }
            Abort::UseMulticast => {
                if bundle.received_over_multicast {
                    error!("not telling client to use multicast, they already did");
                    bundle.response = None;
                    return PipelineOutcome::Drop(DropReason::CannotRespond(
                        "use-multicast for a multicast request".to_string(),
                    ));
                }
                let reply = self.status_reply(
                    bundle,
                    StatusCodeOption::new(
                        status::USE_MULTICAST,
                        "You cannot send requests directly to this server, \
                         please use the proper multicast addresses",
                    ),
                );
                bundle.init_response(reply);
                PipelineOutcome::RespondUseMulticast
            }
            Abort::ReplyWithStatus(option) => {
                let code = option.status_code;
                let reply = self.status_reply(bundle, option);
                bundle.init_response(reply);
                PipelineOutcome::RespondWithStatus(code)
            }
        }
    }

    /// A reply carrying only the identification options and a status
    fn status_reply(&self, bundle: &TransactionBundle, option: StatusCodeOption) -> ClientMessage {
        let reply_type = match bundle.request.message_type {
            MessageType::Leasequery => MessageType::LeasequeryReply,
            _ => MessageType::Reply,
        };
        let mut reply = ClientMessage::new(reply_type, bundle.request.transaction_id);
        if let Some(client_id) = bundle.request.option(codes::CLIENT_ID) {
            reply.options.push(client_id.clone());
        }
        reply.options.push(Dhcp6Option::ServerId(ServerIdOption::new(
            self.server_duid.clone(),
        )));
        reply.options.push(Dhcp6Option::StatusCode(option));
        reply
    }
}

fn walk_pre(
    nodes: &mut [PipelineNode],
    bundle: &mut TransactionBundle,
    prefix: &mut Vec<usize>,
    realized: &mut Vec<Vec<usize>>,
) -> Result<(), Abort> {
    for (index, node) in nodes.iter_mut().enumerate() {
        match node {
            PipelineNode::Handler(handler) => {
                handler.pre(bundle)?;
                prefix.push(index);
                realized.push(prefix.clone());
                prefix.pop();
            }
            PipelineNode::Filter { filter, children } => {
                if !filter.matches(bundle) {
                    continue;
                }
                debug!(filter = %filter.description(), "filter matched");
                filter.pre(bundle)?;
                prefix.push(index);
                realized.push(prefix.clone());
                walk_pre(children, bundle, prefix, realized)?;
                prefix.pop();
            }
        }
    }
    Ok(())
}

fn node_mut<'a>(nodes: &'a mut [PipelineNode], path: &[usize]) -> &'a mut dyn Handler {
    let (first, rest) = path.split_first().expect("pipeline path cannot be empty");
    match &mut nodes[*first] {
        PipelineNode::Handler(handler) => handler.as_mut(),
        PipelineNode::Filter { filter, children } => {
            if rest.is_empty() {
                filter.as_mut()
            } else {
                node_mut(children, rest)
            }
        }
    }
}

/// Choose the response shape for the request type.
///
/// Returns Ok(false) when the type has no reply at all. A Confirm without a
/// single address in any IA must not be answered.
fn init_response(bundle: &mut TransactionBundle) -> Result<bool, Abort> {
    let transaction_id = bundle.request.transaction_id;
    let response_type = match bundle.request.message_type {
        MessageType::Solicit => MessageType::Advertise,
        MessageType::Request
        | MessageType::Renew
        | MessageType::Rebind
        | MessageType::Release
        | MessageType::Decline
        | MessageType::InformationRequest => MessageType::Reply,
        MessageType::Confirm => {
            let has_address = bundle.request.options.iter().any(|option| {
                option
                    .ia_options()
                    .map(|children| {
                        children.iter().any(|child| {
                            matches!(
                                child,
                                Dhcp6Option::IaAddress(_) | Dhcp6Option::IaPrefix(_)
                            )
                        })
                    })
                    .unwrap_or(false)
            });
            if !has_address {
                return Err(Abort::cannot_respond(
                    "confirm carries no addresses in any IA",
                ));
            }
            MessageType::Reply
        }
        MessageType::Leasequery => MessageType::LeasequeryReply,
        _ => return Ok(false),
    };

    bundle.init_response(ClientMessage::new(response_type, transaction_id));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use dhcp6d_wire::message::Message;
    use dhcp6d_wire::options::{ClientIdOption, ElapsedTimeOption, IaAddressOption, IaNaOption};
    use dhcp6d_wire::TransactionId;
    use std::net::Ipv6Addr;
    use std::sync::{Arc, Mutex};

    fn test_duid() -> Duid {
        Duid::LinkLayer {
            hardware_type: 1,
            link_layer_address: vec![2, 2, 2, 2, 2, 2],
        }
    }

    fn solicit_bundle() -> TransactionBundle {
        let message = Message::Client(
            ClientMessage::new(MessageType::Solicit, TransactionId([1, 2, 3])).with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::ElapsedTime(ElapsedTimeOption::new(0)),
            ]),
        );
        TransactionBundle::new(
            message,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            vec![],
            true,
            false,
            [],
        )
        .unwrap()
    }

    /// Records the phase calls it sees into a shared log
    struct Recorder {
        tag: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Handler for Recorder {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn pre(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            self.log.lock().unwrap().push(format!("pre:{}", self.tag));
            Ok(())
        }

        fn handle(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            self.log.lock().unwrap().push(format!("handle:{}", self.tag));
            Ok(())
        }

        fn post(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            self.log.lock().unwrap().push(format!("post:{}", self.tag));
            Ok(())
        }
    }

    struct MarkFilter {
        mark: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Handler for MarkFilter {
        fn name(&self) -> &'static str {
            "mark-filter"
        }
    }

    impl Filter for MarkFilter {
        fn matches(&self, bundle: &TransactionBundle) -> bool {
            let matched = bundle.has_mark(self.mark);
            self.log
                .lock()
                .unwrap()
                .push(format!("matches:{}={}", self.mark, matched));
            matched
        }
    }

    fn recorder(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> PipelineNode {
        PipelineNode::Handler(Box::new(Recorder {
            tag,
            log: log.clone(),
        }))
    }

    #[test]
    fn test_post_runs_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![
                recorder("a", &log),
                recorder("b", &log),
                recorder("c", &log),
            ],
        );
        let mut bundle = solicit_bundle();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(outcome, PipelineOutcome::Respond));

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "pre:a", "pre:b", "pre:c", "handle:a", "handle:b", "handle:c", "post:c", "post:b",
                "post:a",
            ]
        );
    }

    #[test]
    fn test_filter_skip_hides_subtree() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![
                recorder("outer", &log),
                PipelineNode::Filter {
                    filter: Box::new(MarkFilter {
                        mark: "absent",
                        log: log.clone(),
                    }),
                    children: vec![recorder("inner", &log)],
                },
            ],
        );
        let mut bundle = solicit_bundle();
        pipeline.run(&mut bundle);

        let entries = log.lock().unwrap().clone();
        assert!(entries.iter().any(|e| e == "matches:absent=false"));
        assert!(!entries.iter().any(|e| e.contains("inner")));
    }

    #[test]
    fn test_filter_match_runs_subtree() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![PipelineNode::Filter {
                filter: Box::new(MarkFilter {
                    mark: "lan",
                    log: log.clone(),
                }),
                children: vec![recorder("inner", &log)],
            }],
        );
        let mut bundle = solicit_bundle();
        bundle.add_mark("lan");
        pipeline.run(&mut bundle);

        let entries = log.lock().unwrap().clone();
        assert!(entries.iter().any(|e| e == "handle:inner"));
    }

    struct AbortingHandler {
        abort_in_pre: bool,
    }

    impl Handler for AbortingHandler {
        fn name(&self) -> &'static str {
            "aborting"
        }

        fn pre(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            if self.abort_in_pre {
                Err(Abort::Ignore)
            } else {
                Ok(())
            }
        }

        fn handle(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            Err(Abort::cannot_respond("test refusal"))
        }
    }

    #[test]
    fn test_abort_in_pre_skips_everything() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![
                PipelineNode::Handler(Box::new(AbortingHandler { abort_in_pre: true })),
                recorder("after", &log),
            ],
        );
        let mut bundle = solicit_bundle();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(
            outcome,
            PipelineOutcome::Drop(DropReason::Ignored)
        ));
        assert!(bundle.response.is_none());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_cannot_respond_drops_response() {
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![PipelineNode::Handler(Box::new(AbortingHandler {
                abort_in_pre: false,
            }))],
        );
        let mut bundle = solicit_bundle();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(
            outcome,
            PipelineOutcome::Drop(DropReason::CannotRespond(_))
        ));
        assert!(bundle.response.is_none());
    }

    struct UnicastRejector;

    impl Handler for UnicastRejector {
        fn name(&self) -> &'static str {
            "unicast-rejector"
        }

        fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
            if !bundle.received_over_multicast {
                return Err(Abort::UseMulticast);
            }
            Ok(())
        }
    }

    #[test]
    fn test_use_multicast_reply() {
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![PipelineNode::Handler(Box::new(UnicastRejector))],
        );
        let message = Message::Client(
            ClientMessage::new(MessageType::Request, TransactionId([1, 2, 3])).with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
            ]),
        );
        let mut bundle = TransactionBundle::new(
            message,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            vec![],
            false,
            false,
            [],
        )
        .unwrap();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(outcome, PipelineOutcome::RespondUseMulticast));

        let response = bundle.response.as_ref().unwrap();
        assert_eq!(response.message_type, MessageType::Reply);
        match response.option(codes::STATUS_CODE) {
            Some(Dhcp6Option::StatusCode(option)) => {
                assert_eq!(option.status_code, status::USE_MULTICAST)
            }
            other => panic!("missing status code: {:?}", other),
        }
    }

    #[test]
    fn test_solicit_becomes_advertise() {
        let mut pipeline = Pipeline::new(test_duid(), vec![]);
        let mut bundle = solicit_bundle();
        pipeline.run(&mut bundle);
        assert_eq!(
            bundle.response.as_ref().map(|r| r.message_type),
            Some(MessageType::Advertise)
        );
    }

    #[test]
    fn test_reconfigure_has_no_response_shape() {
        let mut pipeline = Pipeline::new(test_duid(), vec![]);
        let message = Message::Client(ClientMessage::new(
            MessageType::Reconfigure,
            TransactionId([0, 0, 0]),
        ));
        let mut bundle = TransactionBundle::new(
            message,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            vec![],
            true,
            false,
            [],
        )
        .unwrap();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(
            outcome,
            PipelineOutcome::Drop(DropReason::NoResponseShape)
        ));
    }

    #[test]
    fn test_confirm_without_addresses_not_answered() {
        let mut pipeline = Pipeline::new(test_duid(), vec![]);
        let message = Message::Client(
            ClientMessage::new(MessageType::Confirm, TransactionId([1, 2, 3])).with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::IaNa(IaNaOption::new(1, 0, 0, vec![])),
            ]),
        );
        let mut bundle = TransactionBundle::new(
            message,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            vec![],
            true,
            false,
            [],
        )
        .unwrap();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(
            outcome,
            PipelineOutcome::Drop(DropReason::CannotRespond(_))
        ));
    }

    #[test]
    fn test_confirm_with_address_answered() {
        let mut pipeline = Pipeline::new(test_duid(), vec![]);
        let message = Message::Client(
            ClientMessage::new(MessageType::Confirm, TransactionId([1, 2, 3])).with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::IaNa(IaNaOption::new(
                    1,
                    0,
                    0,
                    vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                        "2001:db8::1".parse().unwrap(),
                        3600,
                        7200,
                    ))],
                )),
            ]),
        );
        let mut bundle = TransactionBundle::new(
            message,
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            vec![],
            true,
            false,
            [],
        )
        .unwrap();
        let outcome = pipeline.run(&mut bundle);
        assert!(matches!(outcome, PipelineOutcome::Respond));
        assert_eq!(
            bundle.response.as_ref().map(|r| r.message_type),
            Some(MessageType::Reply)
        );
    }

    struct PostFailure;

    impl Handler for PostFailure {
        fn name(&self) -> &'static str {
            "post-failure"
        }

        fn post(&mut self, _bundle: &mut TransactionBundle) -> HandlerResult {
            Err(Abort::Failure(Error::handler("boom")))
        }
    }

    #[test]
    fn test_post_errors_are_swallowed() {
        let mut pipeline = Pipeline::new(
            test_duid(),
            vec![PipelineNode::Handler(Box::new(PostFailure))],
        );
        let mut bundle = solicit_bundle();
        let outcome = pipeline.run(&mut bundle);
        // The failure in post did not kill the response
        assert!(matches!(outcome, PipelineOutcome::Respond));
        assert!(bundle.response.is_some());
    }
}
