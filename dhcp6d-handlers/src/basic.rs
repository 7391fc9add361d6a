//! Handlers for the basic identification and control options

use dhcp6d_core::{Abort, Handler, HandlerResult, TransactionBundle};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::options::{
    codes, Dhcp6Option, PreferenceOption, ServerIdOption, ServerUnicastOption,
};
use dhcp6d_wire::Duid;
use std::net::Ipv6Addr;
use tracing::info;

/// Checks whether a server-id in the request names us, and puts our
/// server-id in the response so the client knows who is answering.
pub struct ServerIdHandler {
    duid: Duid,
}

impl ServerIdHandler {
    pub fn new(duid: Duid) -> Self {
        Self { duid }
    }
}

impl Handler for ServerIdHandler {
    fn name(&self) -> &'static str {
        "server-id"
    }

    fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if let Some(server_id) = bundle.request.server_id() {
            if *server_id != self.duid {
                return Err(Abort::ForOtherServer);
            }
        }
        Ok(())
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        bundle.force_response_option(Dhcp6Option::ServerId(ServerIdOption::new(self.duid.clone())));
        Ok(())
    }
}

/// Copies the client-id from the request into the response
pub struct ClientIdHandler;

impl Handler for ClientIdHandler {
    fn name(&self) -> &'static str {
        "client-id"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if let Some(client_id) = bundle.request.option(codes::CLIENT_ID).cloned() {
            bundle.add_response_option(client_id);
        }
        Ok(())
    }
}

/// Adds a preference option to Advertise responses
pub struct PreferenceHandler {
    preference: u8,
}

impl PreferenceHandler {
    pub fn new(preference: u8) -> Self {
        Self { preference }
    }
}

impl Handler for PreferenceHandler {
    fn name(&self) -> &'static str {
        "preference"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let advertising = bundle
            .response
            .as_ref()
            .map(|r| r.message_type == MessageType::Advertise)
            .unwrap_or(false);
        if advertising {
            bundle.force_response_option(Dhcp6Option::Preference(PreferenceOption::new(
                self.preference,
            )));
        }
        Ok(())
    }
}

/// Tells the server to stop processing and ignore the request, optionally
/// only for the given message types
pub struct IgnoreRequestHandler {
    pub message_types: Vec<MessageType>,
}

impl IgnoreRequestHandler {
    pub fn new(message_types: Vec<MessageType>) -> Self {
        Self { message_types }
    }
}

impl Handler for IgnoreRequestHandler {
    fn name(&self) -> &'static str {
        "ignore"
    }

    fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if self.message_types.is_empty()
            || self.message_types.contains(&bundle.request.message_type)
        {
            info!(bundle = %bundle, "configured to ignore request");
            return Err(Abort::Ignore);
        }
        Ok(())
    }
}

/// Tells the client to use multicast unless something welcomed unicast.
///
/// Requests arriving through a real relay are fine: relays talk unicast to
/// servers by design of the protocol.
pub struct RejectUnwantedUnicastHandler;

impl Handler for RejectUnwantedUnicastHandler {
    fn name(&self) -> &'static str {
        "reject-unwanted-unicast"
    }

    fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        // Leasequery is a unicast protocol by definition
        if bundle.request.message_type == MessageType::Leasequery {
            return Ok(());
        }
        if !bundle.allow_unicast
            && !bundle.received_over_multicast
            && !bundle.received_over_tcp
            && bundle.relay_count() < 2
        {
            info!(bundle = %bundle, "rejecting unicast request");
            return Err(Abort::UseMulticast);
        }
        Ok(())
    }
}

/// Tells the client it may use unicast to contact this server
pub struct ServerUnicastHandler {
    address: Ipv6Addr,
}

impl ServerUnicastHandler {
    pub fn new(address: Ipv6Addr) -> Self {
        Self { address }
    }
}

impl Handler for ServerUnicastHandler {
    fn name(&self) -> &'static str {
        "server-unicast"
    }

    fn pre(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        // Welcome unicast so the reject handler leaves it alone
        bundle.allow_unicast = true;
        Ok(())
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        bundle.force_response_option(Dhcp6Option::ServerUnicast(ServerUnicastOption::new(
            self.address,
        )));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, solicit, with_server_id};
    use dhcp6d_wire::message::ClientMessage;
    use dhcp6d_wire::TransactionId;

    fn other_duid() -> Duid {
        Duid::LinkLayer {
            hardware_type: 1,
            link_layer_address: vec![9; 6],
        }
    }

    fn our_duid() -> Duid {
        Duid::LinkLayer {
            hardware_type: 1,
            link_layer_address: vec![1, 2, 3, 4, 5, 6],
        }
    }

    #[test]
    fn test_server_id_mismatch_is_for_other_server() {
        let mut handler = ServerIdHandler::new(our_duid());
        let mut bundle = bundle_for(with_server_id(solicit(), other_duid()));
        assert!(matches!(
            handler.pre(&mut bundle),
            Err(Abort::ForOtherServer)
        ));
    }

    #[test]
    fn test_server_id_match_accepted() {
        let mut handler = ServerIdHandler::new(our_duid());
        let mut bundle = bundle_for(with_server_id(solicit(), our_duid()));
        assert!(handler.pre(&mut bundle).is_ok());
    }

    #[test]
    fn test_server_id_inserted() {
        let mut handler = ServerIdHandler::new(our_duid());
        let mut bundle = bundle_for(solicit());
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert!(bundle.has_response_option(codes::SERVER_ID));
    }

    #[test]
    fn test_client_id_copied() {
        let mut handler = ClientIdHandler;
        let mut bundle = bundle_for(solicit());
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert_eq!(
            bundle.get_response_option(codes::CLIENT_ID),
            bundle.request.option(codes::CLIENT_ID).cloned().as_ref()
        );
    }

    #[test]
    fn test_preference_only_on_advertise() {
        let mut handler = PreferenceHandler::new(255);
        let mut bundle = bundle_for(solicit());
        bundle.init_response(ClientMessage::new(
            MessageType::Reply,
            TransactionId([1, 2, 3]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert!(!bundle.has_response_option(codes::PREFERENCE));

        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert!(bundle.has_response_option(codes::PREFERENCE));
    }

    #[test]
    fn test_ignore_all_types() {
        let mut handler = IgnoreRequestHandler::new(vec![]);
        let mut bundle = bundle_for(solicit());
        assert!(matches!(handler.pre(&mut bundle), Err(Abort::Ignore)));
    }

    #[test]
    fn test_ignore_specific_type_only() {
        let mut handler = IgnoreRequestHandler::new(vec![MessageType::InformationRequest]);
        let mut bundle = bundle_for(solicit());
        assert!(handler.pre(&mut bundle).is_ok());
    }

    #[test]
    fn test_unicast_rejected_without_permission() {
        let mut handler = RejectUnwantedUnicastHandler;
        let mut bundle = crate::test_support::unicast_bundle_for(solicit());
        assert!(matches!(handler.pre(&mut bundle), Err(Abort::UseMulticast)));
    }

    #[test]
    fn test_unicast_allowed_after_server_unicast() {
        let mut unicast = ServerUnicastHandler::new("2001:db8::1".parse().unwrap());
        let mut reject = RejectUnwantedUnicastHandler;
        let mut bundle = crate::test_support::unicast_bundle_for(solicit());
        unicast.pre(&mut bundle).unwrap();
        assert!(reject.pre(&mut bundle).is_ok());
    }
}
