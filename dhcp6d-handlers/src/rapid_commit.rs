//! Rapid commit (RFC 8415 section 18.3.1)

use dhcp6d_core::{Handler, HandlerResult, TransactionBundle};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::options::{codes, status, Dhcp6Option, IaKind, RapidCommitOption};

/// Upgrades an Advertise to a Reply when the client solicited rapid commit.
///
/// Runs in the post phase so every assignment handler has spoken. With
/// `commit_rejections` off, the upgrade is skipped when any IA went
/// unanswered or was refused; some client implementations get confused by a
/// rapid-commit Reply that refuses them.
pub struct RapidCommitHandler {
    commit_rejections: bool,
}

impl RapidCommitHandler {
    pub fn new(commit_rejections: bool) -> Self {
        Self { commit_rejections }
    }

    fn was_refused(bundle: &TransactionBundle) -> bool {
        let response = match &bundle.response {
            Some(response) => response,
            None => return true,
        };
        for option in &response.options {
            let status = match option {
                Dhcp6Option::IaNa(ia) => ia.status(),
                Dhcp6Option::IaTa(ia) => ia.status(),
                Dhcp6Option::IaPd(ia) => ia.status(),
                _ => None,
            };
            if let Some(status) = status {
                if status.status_code == status::NO_ADDRS_AVAIL
                    || status.status_code == status::NO_PREFIX_AVAIL
                {
                    return true;
                }
            }
        }
        false
    }
}

impl Handler for RapidCommitHandler {
    fn name(&self) -> &'static str {
        "rapid-commit"
    }

    fn post(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if !bundle.allow_rapid_commit {
            return Ok(());
        }

        // Only a solicited rapid commit on a pending Advertise qualifies
        if bundle.request.message_type != MessageType::Solicit
            || !bundle.request.has_option(codes::RAPID_COMMIT)
        {
            return Ok(());
        }
        let is_advertise = bundle
            .response
            .as_ref()
            .map(|r| r.message_type == MessageType::Advertise)
            .unwrap_or(false);
        if !is_advertise {
            return Ok(());
        }

        if !self.commit_rejections {
            if !bundle
                .get_unhandled_options(&[IaKind::Na, IaKind::Ta, IaKind::Pd])
                .is_empty()
            {
                // Unanswered IAs at post time will never be answered now
                return Ok(());
            }
            if Self::was_refused(bundle) {
                return Ok(());
            }
        }

        if let Some(response) = &mut bundle.response {
            response.message_type = MessageType::Reply;
            response
                .options
                .insert(0, Dhcp6Option::RapidCommit(RapidCommitOption));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, solicit, solicit_with_rapid_commit};
    use dhcp6d_wire::message::ClientMessage;
    use dhcp6d_wire::options::{IaNaOption, StatusCodeOption};
    use dhcp6d_wire::TransactionId;

    fn advertise() -> ClientMessage {
        ClientMessage::new(MessageType::Advertise, TransactionId([0x11, 0x22, 0x33]))
    }

    #[test]
    fn test_upgrade_to_reply() {
        let mut handler = RapidCommitHandler::new(false);
        let mut bundle = bundle_for(solicit_with_rapid_commit());
        bundle.init_response(advertise());
        handler.post(&mut bundle).unwrap();

        let response = bundle.response.as_ref().unwrap();
        assert_eq!(response.message_type, MessageType::Reply);
        assert!(response.has_option(codes::RAPID_COMMIT));
    }

    #[test]
    fn test_no_upgrade_without_request_option() {
        let mut handler = RapidCommitHandler::new(false);
        let mut bundle = bundle_for(solicit());
        bundle.init_response(advertise());
        handler.post(&mut bundle).unwrap();
        assert_eq!(
            bundle.response.as_ref().unwrap().message_type,
            MessageType::Advertise
        );
    }

    #[test]
    fn test_no_upgrade_when_handler_cleared_flag() {
        let mut handler = RapidCommitHandler::new(false);
        let mut bundle = bundle_for(solicit_with_rapid_commit());
        bundle.allow_rapid_commit = false;
        bundle.init_response(advertise());
        handler.post(&mut bundle).unwrap();
        assert_eq!(
            bundle.response.as_ref().unwrap().message_type,
            MessageType::Advertise
        );
    }

    #[test]
    fn test_no_upgrade_on_refusal() {
        let mut handler = RapidCommitHandler::new(false);
        let mut bundle = bundle_for(solicit_with_rapid_commit());
        // The solicit has no IA, so nothing is unhandled; refuse explicitly
        bundle.init_response(advertise());
        bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
            1,
            0,
            0,
            vec![Dhcp6Option::StatusCode(StatusCodeOption::new(
                status::NO_ADDRS_AVAIL,
                "No addresses available",
            ))],
        )));
        handler.post(&mut bundle).unwrap();
        assert_eq!(
            bundle.response.as_ref().unwrap().message_type,
            MessageType::Advertise
        );
    }

    #[test]
    fn test_refusal_committed_when_configured() {
        let mut handler = RapidCommitHandler::new(true);
        let mut bundle = bundle_for(solicit_with_rapid_commit());
        bundle.init_response(advertise());
        bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
            1,
            0,
            0,
            vec![Dhcp6Option::StatusCode(StatusCodeOption::new(
                status::NO_ADDRS_AVAIL,
                "No addresses available",
            ))],
        )));
        handler.post(&mut bundle).unwrap();
        assert_eq!(
            bundle.response.as_ref().unwrap().message_type,
            MessageType::Reply
        );
    }
}
