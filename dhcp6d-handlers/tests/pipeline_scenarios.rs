//! End-to-end pipeline scenarios: a request goes in, a wire-ready reply
//! comes out.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;

use dhcp6d_core::{PipelineOutcome, PipelinePlan, PlanNode, TransactionBundle};
use dhcp6d_handlers::factories::{RateLimitFactory, StaticAssignmentFactory, TimingLimitsFactory};
use dhcp6d_handlers::{assemble, Assignment, AssignmentLifetimes, RateLimitCounters, RateLimitKey, TimingLimits};
use dhcp6d_wire::message::{ClientMessage, Message, MessageType, RelayMessage};
use dhcp6d_wire::options::{
    codes, status, ClientIdOption, Dhcp6Option, ElapsedTimeOption, IaNaOption, InterfaceIdOption,
    RapidCommitOption, RelayMessageOption,
};
use dhcp6d_wire::{Duid, TransactionId};

fn client_duid() -> Duid {
    Duid::LinkLayer {
        hardware_type: 1,
        link_layer_address: vec![0x00, 0x24, 0x36, 0xef, 0x1d, 0x89],
    }
}

fn server_duid() -> Duid {
    Duid::LinkLayer {
        hardware_type: 1,
        link_layer_address: vec![0x02, 0x00, 0x00, 0x00, 0x00, 0x01],
    }
}

fn solicit(rapid_commit: bool) -> Message {
    let mut options = vec![
        Dhcp6Option::ClientId(ClientIdOption::new(client_duid())),
        Dhcp6Option::ElapsedTime(ElapsedTimeOption::new(0)),
        Dhcp6Option::IaNa(IaNaOption::new(1, 0, 0, vec![])),
    ];
    if rapid_commit {
        options.push(Dhcp6Option::RapidCommit(RapidCommitOption));
    }
    Message::Client(
        ClientMessage::new(MessageType::Solicit, TransactionId([0x11, 0x22, 0x33]))
            .with_options(options),
    )
}

fn bundle(message: Message) -> TransactionBundle {
    TransactionBundle::new(
        message,
        "fe80::2".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        true,
        false,
        ["multicast".to_string()],
    )
    .unwrap()
}

fn assignment_mapping() -> Arc<HashMap<String, Assignment>> {
    let mut mapping = HashMap::new();
    mapping.insert(
        "duid:00030001002436ef1d89".to_string(),
        Assignment {
            address: Some("2001:db8::42".parse().unwrap()),
            prefix: None,
        },
    );
    Arc::new(mapping)
}

fn plan(allow_rapid_commit: bool, nodes: Vec<PlanNode>) -> PipelinePlan {
    PipelinePlan {
        server_duid: server_duid(),
        allow_rapid_commit,
        rapid_commit_rejections: false,
        authoritative: false,
        nodes,
    }
}

fn assignment_plan(allow_rapid_commit: bool) -> PipelinePlan {
    plan(
        allow_rapid_commit,
        vec![
            PlanNode::Handler(Arc::new(StaticAssignmentFactory {
                mapping: assignment_mapping(),
                lifetimes: AssignmentLifetimes::default(),
            })),
            PlanNode::Handler(Arc::new(TimingLimitsFactory {
                limits: TimingLimits::default(),
                prefix_delegation: false,
            })),
        ],
    )
}

/// Peel the virtual relay shell like the worker does before sending
fn unwrap_reply(bundle: TransactionBundle) -> ClientMessage {
    let messages = bundle.into_outgoing_messages();
    assert_eq!(messages.len(), 1);
    match messages.into_iter().next().unwrap() {
        Message::Relay(shell) => match shell.relayed_message().unwrap() {
            Message::Client(client) => client.clone(),
            other => panic!("expected client message, got {:?}", other),
        },
        other => panic!("expected relay shell, got {:?}", other),
    }
}

#[test]
fn solicit_with_matching_assignment_gets_advertise() {
    let mut pipeline = assemble(&assignment_plan(false)).unwrap();
    let mut bundle = bundle(solicit(false));
    let outcome = pipeline.run(&mut bundle);
    assert!(matches!(outcome, PipelineOutcome::Respond));

    let reply = unwrap_reply(bundle);
    assert_eq!(reply.message_type, MessageType::Advertise);
    assert_eq!(reply.transaction_id, TransactionId([0x11, 0x22, 0x33]));
    assert_eq!(reply.client_id(), Some(&client_duid()));
    assert_eq!(reply.server_id(), Some(&server_duid()));

    match reply.option(codes::IA_NA) {
        Some(Dhcp6Option::IaNa(ia)) => {
            assert_eq!(ia.iaid, 1);
            assert_eq!(ia.t1, 1800);
            assert_eq!(ia.t2, 2880);
            match &ia.options[0] {
                Dhcp6Option::IaAddress(address) => {
                    assert_eq!(address.address, "2001:db8::42".parse::<Ipv6Addr>().unwrap());
                    assert_eq!(address.preferred_lifetime, 3600);
                    assert_eq!(address.valid_lifetime, 7200);
                }
                other => panic!("expected an address, got {:?}", other),
            }
        }
        other => panic!("expected IA-NA, got {:?}", other),
    }
}

#[test]
fn rapid_commit_upgrades_advertise_to_reply() {
    let mut pipeline = assemble(&assignment_plan(true)).unwrap();
    let mut bundle = bundle(solicit(true));
    let outcome = pipeline.run(&mut bundle);
    assert!(matches!(outcome, PipelineOutcome::Respond));

    let reply = unwrap_reply(bundle);
    assert_eq!(reply.message_type, MessageType::Reply);
    assert!(reply.has_option(codes::RAPID_COMMIT));
}

#[test]
fn unmatched_client_gets_no_addrs_avail() {
    let mut pipeline = assemble(&plan(false, vec![])).unwrap();
    let mut bundle = bundle(solicit(false));
    let outcome = pipeline.run(&mut bundle);
    assert!(matches!(outcome, PipelineOutcome::Respond));

    let reply = unwrap_reply(bundle);
    assert_eq!(reply.message_type, MessageType::Advertise);
    match reply.option(codes::IA_NA) {
        Some(Dhcp6Option::IaNa(ia)) => {
            assert_eq!(ia.iaid, 1);
            assert!(ia.addresses().is_empty());
            assert_eq!(ia.status().unwrap().status_code, status::NO_ADDRS_AVAIL);
        }
        other => panic!("expected refused IA-NA, got {:?}", other),
    }
}

#[test]
fn sixth_solicit_in_window_is_dropped() {
    let counters = Arc::new(RateLimitCounters::new(5, 30, None));
    let mut pipeline = assemble(&plan(
        false,
        vec![PlanNode::Handler(Arc::new(RateLimitFactory {
            key: RateLimitKey::Duid,
            counters,
        }))],
    ))
    .unwrap();

    for _ in 0..5 {
        let mut bundle = bundle(solicit(false));
        assert!(matches!(
            pipeline.run(&mut bundle),
            PipelineOutcome::Respond
        ));
    }

    let mut sixth = bundle(solicit(false));
    let outcome = pipeline.run(&mut sixth);
    assert!(matches!(
        outcome,
        PipelineOutcome::Drop(dhcp6d_core::DropReason::Ignored)
    ));
    assert!(sixth.response.is_none());
}

#[test]
fn relay_echo_mirrors_interface_id() {
    let inner = solicit(false);
    let mut relay = RelayMessage::new(
        MessageType::RelayForward,
        0,
        "2001:db8::1".parse().unwrap(),
        "fe80::2".parse().unwrap(),
    );
    relay.options.push(Dhcp6Option::InterfaceId(
        InterfaceIdOption::new(b"ge-0/0/0.100".to_vec()),
    ));
    relay
        .options
        .push(Dhcp6Option::RelayMessage(RelayMessageOption::new(inner)));

    let mut pipeline = assemble(&assignment_plan(false)).unwrap();
    let mut bundle = bundle(Message::Relay(relay));
    let outcome = pipeline.run(&mut bundle);
    assert!(matches!(outcome, PipelineOutcome::Respond));

    let messages = bundle.into_outgoing_messages();
    let virtual_shell = messages[0].as_relay().unwrap();
    let real_shell = virtual_shell.relayed_message().unwrap().as_relay().unwrap();
    assert_eq!(real_shell.message_type, MessageType::RelayReply);
    match real_shell.option(codes::INTERFACE_ID) {
        Some(Dhcp6Option::InterfaceId(option)) => {
            assert_eq!(option.interface_id, b"ge-0/0/0.100")
        }
        other => panic!("interface-id not mirrored: {:?}", other),
    }
}

#[test]
fn unknown_option_is_preserved_on_parse() {
    let mut packet = solicit(false).to_bytes();
    packet.extend_from_slice(&[0xfd, 0xe9, 0x00, 0x04, 0xde, 0xad, 0xbe, 0xef]);

    let (_, message) = Message::parse(&packet).unwrap();
    let client = message.as_client().unwrap();
    let unknown = client
        .options
        .iter()
        .find(|option| option.code() == 65001)
        .unwrap();
    match unknown {
        Dhcp6Option::Unknown(option) => assert_eq!(option.data, vec![0xde, 0xad, 0xbe, 0xef]),
        other => panic!("expected opaque option, got {:?}", other),
    }
    assert_eq!(message.to_bytes(), packet);

    // The pipeline answers the request and leaves the unknown option out
    let mut pipeline = assemble(&assignment_plan(false)).unwrap();
    let mut bundle = bundle(message);
    pipeline.run(&mut bundle);
    let reply = unwrap_reply(bundle);
    assert!(reply.options.iter().all(|option| option.code() != 65001));
}
