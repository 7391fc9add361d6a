//! Terminal handlers that make sure nothing in the request stays unanswered

use dhcp6d_core::{Abort, Handler, HandlerResult, TransactionBundle};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::options::{
    codes, status, Dhcp6Option, IaAddressOption, IaKind, IaNaOption, IaPdOption, IaPrefixOption,
    IaTaOption, StatusCodeOption,
};
use tracing::warn;

/// Answers every IA no handler claimed.
///
/// Authoritative servers withdraw unknown bindings with zero lifetimes and
/// reject confirms with NotOnLink; non-authoritative servers answer
/// NoBinding where the protocol allows and stay silent where it doesn't.
pub struct UnansweredIaHandler {
    authoritative: bool,
}

impl UnansweredIaHandler {
    pub fn new(authoritative: bool) -> Self {
        Self { authoritative }
    }

    fn refusal(kind: IaKind, iaid: u32) -> Dhcp6Option {
        match kind {
            IaKind::Na => Dhcp6Option::IaNa(IaNaOption::new(
                iaid,
                0,
                0,
                vec![Dhcp6Option::StatusCode(StatusCodeOption::new(
                    status::NO_ADDRS_AVAIL,
                    "No addresses available",
                ))],
            )),
            IaKind::Ta => Dhcp6Option::IaTa(IaTaOption::new(
                iaid,
                vec![Dhcp6Option::StatusCode(StatusCodeOption::new(
                    status::NO_ADDRS_AVAIL,
                    "No addresses available",
                ))],
            )),
            IaKind::Pd => Dhcp6Option::IaPd(IaPdOption::new(
                iaid,
                0,
                0,
                vec![Dhcp6Option::StatusCode(StatusCodeOption::new(
                    status::NO_PREFIX_AVAIL,
                    "No prefixes available",
                ))],
            )),
        }
    }

    fn no_binding(kind: IaKind, iaid: u32) -> Dhcp6Option {
        let status_option = Dhcp6Option::StatusCode(StatusCodeOption::new(
            status::NO_BINDING,
            "No addresses assigned to you",
        ));
        match kind {
            IaKind::Na => Dhcp6Option::IaNa(IaNaOption::new(iaid, 0, 0, vec![status_option])),
            IaKind::Ta => Dhcp6Option::IaTa(IaTaOption::new(iaid, vec![status_option])),
            IaKind::Pd => Dhcp6Option::IaPd(IaPdOption::new(iaid, 0, 0, vec![status_option])),
        }
    }

    /// The IA echoed back with every lease's lifetimes forced to zero
    fn withdrawal(option: &Dhcp6Option) -> Dhcp6Option {
        let kind = option.ia_kind().expect("withdrawal needs an IA option");
        let iaid = option.iaid().unwrap_or(0);
        let children = option.ia_options().unwrap_or(&[]);

        let withdrawn: Vec<Dhcp6Option> = children
            .iter()
            .filter_map(|child| match child {
                Dhcp6Option::IaAddress(a) => Some(Dhcp6Option::IaAddress(IaAddressOption::new(
                    a.address, 0, 0,
                ))),
                Dhcp6Option::IaPrefix(p) => Some(Dhcp6Option::IaPrefix(IaPrefixOption::new(
                    p.prefix, 0, 0,
                ))),
                _ => None,
            })
            .collect();

        match kind {
            IaKind::Na => Dhcp6Option::IaNa(IaNaOption::new(iaid, 0, 0, withdrawn)),
            IaKind::Ta => Dhcp6Option::IaTa(IaTaOption::new(iaid, withdrawn)),
            IaKind::Pd => Dhcp6Option::IaPd(IaPdOption::new(iaid, 0, 0, withdrawn)),
        }
    }
}

impl Handler for UnansweredIaHandler {
    fn name(&self) -> &'static str {
        "unanswered-ia"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let unhandled = bundle.get_unhandled_options(&[IaKind::Na, IaKind::Ta, IaKind::Pd]);
        if unhandled.is_empty() {
            return Ok(());
        }

        for handle in unhandled {
            let option = bundle.request_option(handle).clone();
            let kind = option.ia_kind().expect("unhandled options are IAs");
            let iaid = option.iaid().unwrap_or(0);

            match bundle.request.message_type {
                MessageType::Solicit | MessageType::Request => {
                    bundle.add_response_option(Self::refusal(kind, iaid));
                }
                MessageType::Confirm => {
                    // If we cannot check the link, we must not answer at all
                    if !self.authoritative {
                        return Err(Abort::cannot_respond(
                            "not authoritative, cannot reject confirm",
                        ));
                    }
                    warn!(iaid, "no handler confirmed IA, sending not-on-link");
                    if !bundle.has_response_option(codes::STATUS_CODE) {
                        bundle.add_response_option(Dhcp6Option::StatusCode(
                            StatusCodeOption::new(
                                status::NOT_ON_LINK,
                                "Those addresses are not appropriate on this link",
                            ),
                        ));
                    }
                }
                MessageType::Renew => {
                    if self.authoritative {
                        warn!(iaid, "no handler renewed IA, withdrawing leases");
                        bundle.add_response_option(Self::withdrawal(&option));
                    } else {
                        warn!(iaid, "no handler renewed IA, sending no-binding");
                        bundle.add_response_option(Self::no_binding(kind, iaid));
                    }
                }
                MessageType::Rebind => {
                    // Silence is the only safe answer when we are not sure
                    if !self.authoritative {
                        return Err(Abort::cannot_respond(
                            "not authoritative, cannot reject rebind",
                        ));
                    }
                    warn!(iaid, "no handler answered rebind, withdrawing leases");
                    bundle.add_response_option(Self::withdrawal(&option));
                }
                MessageType::Release | MessageType::Decline => {
                    bundle.add_response_option(Self::no_binding(kind, iaid));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Replies to Confirm, Release and Decline always need a status; add a
/// success status when every handler was happy and nobody set one.
pub struct AddMissingStatusHandler;

impl Handler for AddMissingStatusHandler {
    fn name(&self) -> &'static str {
        "add-missing-status"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let needs_status = matches!(
            bundle.request.message_type,
            MessageType::Confirm | MessageType::Release | MessageType::Decline
        );
        if needs_status && !bundle.has_response_option(codes::STATUS_CODE) {
            let message = match bundle.request.message_type {
                MessageType::Confirm => "Your addresses are still appropriate for this link",
                _ => "Thank you for letting us know",
            };
            bundle.add_response_option(Dhcp6Option::StatusCode(StatusCodeOption::new(
                status::SUCCESS,
                message,
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, request_of_type, solicit_with_ia};
    use dhcp6d_wire::message::ClientMessage;
    use dhcp6d_wire::TransactionId;

    fn run(handler: &mut UnansweredIaHandler, mut bundle: TransactionBundle) -> TransactionBundle {
        let response_type = match bundle.request.message_type {
            MessageType::Solicit => MessageType::Advertise,
            _ => MessageType::Reply,
        };
        bundle.init_response(ClientMessage::new(
            response_type,
            bundle.request.transaction_id,
        ));
        handler.handle(&mut bundle).unwrap();
        bundle
    }

    #[test]
    fn test_solicit_gets_no_addrs_avail() {
        let mut handler = UnansweredIaHandler::new(false);
        let bundle = run(&mut handler, bundle_for(solicit_with_ia(1)));
        let response = bundle.response.as_ref().unwrap();
        match response.option(codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.iaid, 1);
                assert!(ia.addresses().is_empty());
                assert_eq!(ia.status().unwrap().status_code, status::NO_ADDRS_AVAIL);
            }
            other => panic!("expected refused IA-NA, got {:?}", other),
        }
    }

    #[test]
    fn test_every_ia_answered() {
        let mut handler = UnansweredIaHandler::new(false);
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle
            .request
            .options
            .push(Dhcp6Option::IaPd(IaPdOption::new(9, 0, 0, vec![])));
        let bundle = run(&mut handler, bundle);

        let response = bundle.response.as_ref().unwrap();
        assert!(response.option(codes::IA_NA).is_some());
        match response.option(codes::IA_PD) {
            Some(Dhcp6Option::IaPd(ia)) => {
                assert_eq!(ia.status().unwrap().status_code, status::NO_PREFIX_AVAIL)
            }
            other => panic!("expected refused IA-PD, got {:?}", other),
        }
    }

    #[test]
    fn test_handled_ia_left_alone() {
        let mut handler = UnansweredIaHandler::new(false);
        let mut bundle = bundle_for(solicit_with_ia(1));
        let handles = bundle.get_unhandled_options(&[IaKind::Na]);
        bundle.mark_handled(handles[0]);
        let bundle = run(&mut handler, bundle);
        assert!(bundle.response.as_ref().unwrap().option(codes::IA_NA).is_none());
    }

    #[test]
    fn test_renew_nonauthoritative_no_binding() {
        let mut handler = UnansweredIaHandler::new(false);
        let bundle = run(
            &mut handler,
            bundle_for(request_of_type(MessageType::Renew, 5)),
        );
        let response = bundle.response.as_ref().unwrap();
        match response.option(codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.status().unwrap().status_code, status::NO_BINDING)
            }
            other => panic!("expected no-binding IA-NA, got {:?}", other),
        }
    }

    #[test]
    fn test_renew_authoritative_withdraws() {
        let mut handler = UnansweredIaHandler::new(true);
        let bundle = run(
            &mut handler,
            bundle_for(request_of_type(MessageType::Renew, 5)),
        );
        let response = bundle.response.as_ref().unwrap();
        match response.option(codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert!(ia.status().is_none());
                let withdrawn: Vec<_> = ia
                    .options
                    .iter()
                    .filter_map(|o| match o {
                        Dhcp6Option::IaAddress(a) => Some(a),
                        _ => None,
                    })
                    .collect();
                assert!(!withdrawn.is_empty());
                assert!(withdrawn.iter().all(|a| a.valid_lifetime == 0));
            }
            other => panic!("expected withdrawal IA-NA, got {:?}", other),
        }
    }

    #[test]
    fn test_rebind_nonauthoritative_stays_silent() {
        let mut handler = UnansweredIaHandler::new(false);
        let mut bundle = bundle_for(request_of_type(MessageType::Rebind, 5));
        bundle.init_response(ClientMessage::new(
            MessageType::Reply,
            TransactionId([0, 0, 2]),
        ));
        assert!(matches!(
            handler.handle(&mut bundle),
            Err(Abort::CannotRespond(_))
        ));
    }

    #[test]
    fn test_missing_status_added_for_release() {
        let mut handler = AddMissingStatusHandler;
        let mut bundle = bundle_for(request_of_type(MessageType::Release, 5));
        bundle.init_response(ClientMessage::new(
            MessageType::Reply,
            TransactionId([0, 0, 2]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert!(bundle.has_response_option(codes::STATUS_CODE));
    }
}
