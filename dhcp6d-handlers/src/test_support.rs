//! Shared fixtures for handler tests

use std::net::Ipv6Addr;

use dhcp6d_core::TransactionBundle;
use dhcp6d_wire::message::{ClientMessage, Message, MessageType, RelayMessage};
use dhcp6d_wire::options::{
    ClientIdOption, Dhcp6Option, ElapsedTimeOption, IaAddressOption, IaNaOption, InterfaceIdOption,
    LqQueryOption, RapidCommitOption, RelayMessageOption, ServerIdOption,
};
use dhcp6d_wire::options::query_types;
use dhcp6d_wire::{Duid, TransactionId};

pub(crate) fn test_duid() -> Duid {
    Duid::LinkLayer {
        hardware_type: 1,
        link_layer_address: vec![0x00, 0x24, 0x36, 0xef, 0x1d, 0x89],
    }
}

pub(crate) fn solicit() -> Message {
    Message::Client(
        ClientMessage::new(MessageType::Solicit, TransactionId([0x11, 0x22, 0x33])).with_options(
            vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::ElapsedTime(ElapsedTimeOption::new(0)),
            ],
        ),
    )
}

pub(crate) fn solicit_with_elapsed(elapsed_time: u16) -> Message {
    Message::Client(
        ClientMessage::new(MessageType::Solicit, TransactionId([0x11, 0x22, 0x33])).with_options(
            vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::ElapsedTime(ElapsedTimeOption::new(elapsed_time)),
            ],
        ),
    )
}

pub(crate) fn solicit_with_ia(iaid: u32) -> Message {
    match solicit() {
        Message::Client(mut client) => {
            client
                .options
                .push(Dhcp6Option::IaNa(IaNaOption::new(iaid, 0, 0, vec![])));
            Message::Client(client)
        }
        _ => unreachable!(),
    }
}

pub(crate) fn solicit_with_rapid_commit() -> Message {
    match solicit() {
        Message::Client(mut client) => {
            client
                .options
                .push(Dhcp6Option::RapidCommit(RapidCommitOption));
            Message::Client(client)
        }
        _ => unreachable!(),
    }
}

pub(crate) fn with_server_id(message: Message, duid: Duid) -> Message {
    match message {
        Message::Client(mut client) => {
            client
                .options
                .push(Dhcp6Option::ServerId(ServerIdOption::new(duid)));
            Message::Client(client)
        }
        other => other,
    }
}

/// A renew-style request carrying an IA with one address worth renewing
pub(crate) fn request_of_type(message_type: MessageType, iaid: u32) -> Message {
    Message::Client(
        ClientMessage::new(message_type, TransactionId([0x11, 0x22, 0x33])).with_options(vec![
            Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
            Dhcp6Option::ElapsedTime(ElapsedTimeOption::new(0)),
            Dhcp6Option::IaNa(IaNaOption::new(
                iaid,
                0,
                0,
                vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                    "2001:db8::bad".parse().unwrap(),
                    3600,
                    7200,
                ))],
            )),
        ]),
    )
}

pub(crate) fn leasequery_of_type(query_type: u8) -> Message {
    Message::Client(
        ClientMessage::new(MessageType::Leasequery, TransactionId([0x11, 0x22, 0x33]))
            .with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::LeasequeryQuery(LqQueryOption::new(
                    query_type,
                    Ipv6Addr::UNSPECIFIED,
                    vec![],
                )),
            ]),
    )
}

pub(crate) fn leasequery_by_address(address: Ipv6Addr) -> Message {
    Message::Client(
        ClientMessage::new(MessageType::Leasequery, TransactionId([0x11, 0x22, 0x33]))
            .with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::LeasequeryQuery(LqQueryOption::new(
                    query_types::BY_ADDRESS,
                    Ipv6Addr::UNSPECIFIED,
                    vec![Dhcp6Option::IaAddress(IaAddressOption::new(address, 0, 0))],
                )),
            ]),
    )
}

pub(crate) fn leasequery_by_client_id(duid: Duid) -> Message {
    Message::Client(
        ClientMessage::new(MessageType::Leasequery, TransactionId([0x11, 0x22, 0x33]))
            .with_options(vec![
                Dhcp6Option::ClientId(ClientIdOption::new(test_duid())),
                Dhcp6Option::LeasequeryQuery(LqQueryOption::new(
                    query_types::BY_CLIENT_ID,
                    Ipv6Addr::UNSPECIFIED,
                    vec![Dhcp6Option::ClientId(ClientIdOption::new(duid))],
                )),
            ]),
    )
}

pub(crate) fn bundle_for(message: Message) -> TransactionBundle {
    TransactionBundle::new(
        message,
        "fe80::1".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        true,
        false,
        [],
    )
    .unwrap()
}

pub(crate) fn unicast_bundle_for(message: Message) -> TransactionBundle {
    TransactionBundle::new(
        message,
        "2001:db8:cafe::2".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        false,
        false,
        [],
    )
    .unwrap()
}

pub(crate) fn tcp_bundle_for(message: Message) -> TransactionBundle {
    TransactionBundle::new(
        message,
        "2001:db8:cafe::2".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        false,
        true,
        [],
    )
    .unwrap()
}

/// Wrap the message in a real relay carrying an interface-id
pub(crate) fn bundle_for_relayed(message: Message, interface_id: Vec<u8>) -> TransactionBundle {
    let mut relay = RelayMessage::new(
        MessageType::RelayForward,
        0,
        "2001:db8::1".parse().unwrap(),
        "fe80::2".parse().unwrap(),
    );
    relay
        .options
        .push(Dhcp6Option::InterfaceId(InterfaceIdOption::new(interface_id)));
    relay
        .options
        .push(Dhcp6Option::RelayMessage(RelayMessageOption::new(message)));

    TransactionBundle::new(
        Message::Relay(relay),
        "fe80::2".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        false,
        false,
        [],
    )
    .unwrap()
}

/// Wrap the message in a relay with the given link address
pub(crate) fn bundle_with_link_address(
    message: Message,
    link_address: Ipv6Addr,
) -> TransactionBundle {
    let mut relay = RelayMessage::new(MessageType::RelayForward, 0, link_address, "fe80::2".parse().unwrap());
    relay
        .options
        .push(Dhcp6Option::RelayMessage(RelayMessageOption::new(message)));

    TransactionBundle::new(
        Message::Relay(relay),
        "fe80::2".parse().unwrap(),
        Ipv6Addr::UNSPECIFIED,
        vec![],
        false,
        false,
        [],
    )
    .unwrap()
}
