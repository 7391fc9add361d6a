//! Static address and prefix assignment
//!
//! Clients are looked up by DUID, or by the interface-id, remote-id,
//! subscriber-id or link-layer address provided by the relay closest to
//! them. The mappings come from a CSV file (`id,address,prefix`) or a JSON
//! file with the same keys.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use dhcp6d_core::store::hex_encode;
use dhcp6d_core::{Error, Handler, HandlerResult, OptionHandle, Result, TransactionBundle};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::options::{
    codes, Dhcp6Option, IaAddressOption, IaKind, IaNaOption, IaPdOption, IaPrefixOption,
};
use dhcp6d_wire::Ipv6Prefix;

/// What one client is entitled to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub address: Option<Ipv6Addr>,
    pub prefix: Option<Ipv6Prefix>,
}

/// The lease lifetimes this handler hands out
#[derive(Debug, Clone)]
pub struct AssignmentLifetimes {
    pub address_preferred: u32,
    pub address_valid: u32,
    pub prefix_preferred: u32,
    pub prefix_valid: u32,
}

impl Default for AssignmentLifetimes {
    fn default() -> Self {
        Self {
            address_preferred: 3600,
            address_valid: 7200,
            prefix_preferred: 43200,
            prefix_valid: 86400,
        }
    }
}

/// Gives a static address and/or prefix to known clients
pub struct StaticAssignmentHandler {
    mapping: Arc<HashMap<String, Assignment>>,
    lifetimes: AssignmentLifetimes,
}

impl StaticAssignmentHandler {
    pub fn new(mapping: Arc<HashMap<String, Assignment>>, lifetimes: AssignmentLifetimes) -> Self {
        Self { mapping, lifetimes }
    }

    /// Load `id,address,prefix` rows. The first row is the header; empty
    /// cells mean "nothing of that kind for this client".
    pub fn load_csv(path: &Path) -> Result<HashMap<String, Assignment>> {
        let content = std::fs::read_to_string(path)?;
        let mut lines = content.lines();
        let header = lines
            .next()
            .ok_or_else(|| Error::config(format!("{}: empty assignments file", path.display())))?;
        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        if columns != ["id", "address", "prefix"] {
            return Err(Error::config(format!(
                "{}: expected header 'id,address,prefix', got '{}'",
                path.display(),
                header
            )));
        }

        let mut mapping = HashMap::new();
        for (number, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let cells: Vec<&str> = line.split(',').map(str::trim).collect();
            if cells.len() != 3 {
                return Err(Error::config(format!(
                    "{}:{}: expected 3 columns",
                    path.display(),
                    number + 2
                )));
            }
            let address = match cells[1] {
                "" => None,
                text => Some(text.parse::<Ipv6Addr>().map_err(|_| {
                    Error::config(format!("{}:{}: bad address '{}'", path.display(), number + 2, text))
                })?),
            };
            let prefix = match cells[2] {
                "" => None,
                text => Some(text.parse::<Ipv6Prefix>().map_err(|_| {
                    Error::config(format!("{}:{}: bad prefix '{}'", path.display(), number + 2, text))
                })?),
            };
            mapping.insert(normalise_key(cells[0]), Assignment { address, prefix });
        }

        info!(count = mapping.len(), file = %path.display(), "loaded static assignments");
        Ok(mapping)
    }

    /// Load a JSON object of `id -> {address, prefix}`
    pub fn load_json(path: &Path) -> Result<HashMap<String, Assignment>> {
        #[derive(Deserialize)]
        struct JsonAssignment {
            address: Option<Ipv6Addr>,
            prefix: Option<String>,
        }

        let content = std::fs::read_to_string(path)?;
        let raw: HashMap<String, JsonAssignment> = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        let mut mapping = HashMap::new();
        for (key, value) in raw {
            let prefix = match value.prefix {
                Some(text) => Some(text.parse::<Ipv6Prefix>().map_err(|_| {
                    Error::config(format!("{}: bad prefix '{}'", path.display(), text))
                })?),
                None => None,
            };
            mapping.insert(
                normalise_key(&key),
                Assignment {
                    address: value.address,
                    prefix,
                },
            );
        }

        info!(count = mapping.len(), file = %path.display(), "loaded static assignments");
        Ok(mapping)
    }

    /// Look up by DUID first, then by what the relay closest to the client
    /// can tell us.
    fn get_assignment(&self, bundle: &TransactionBundle) -> Assignment {
        if let Some(duid) = bundle.request.client_id() {
            if let Some(found) = self.mapping.get(&format!("duid:{}", duid)) {
                return found.clone();
            }
        }

        if let Some(Dhcp6Option::InterfaceId(option)) =
            bundle.get_relay_option(codes::INTERFACE_ID, true)
        {
            let key = format!("interface-id:{}", hex_encode(&option.interface_id));
            if let Some(found) = self.mapping.get(&key) {
                return found.clone();
            }
        }

        if let Some(Dhcp6Option::RemoteId(option)) = bundle.get_relay_option(codes::REMOTE_ID, true)
        {
            let key = format!(
                "remote-id:{}:{}",
                option.enterprise_number,
                hex_encode(&option.remote_id)
            );
            if let Some(found) = self.mapping.get(&key) {
                return found.clone();
            }
        }

        if let Some(Dhcp6Option::SubscriberId(option)) =
            bundle.get_relay_option(codes::SUBSCRIBER_ID, true)
        {
            let key = format!("subscriber-id:{}", hex_encode(&option.subscriber_id));
            if let Some(found) = self.mapping.get(&key) {
                return found.clone();
            }
        }

        if let Some(Dhcp6Option::ClientLinkLayerAddress(option)) =
            bundle.get_relay_option(codes::CLIENT_LINKLAYER_ADDRESS, true)
        {
            let key = format!(
                "linklayer-id:{}:{}",
                option.hardware_type,
                hex_encode(&option.address)
            );
            if let Some(found) = self.mapping.get(&key) {
                return found.clone();
            }
        }

        Assignment::default()
    }

    /// The unhandled IA_NA that already asks for this address, or the first
    fn find_iana_for_address(
        bundle: &TransactionBundle,
        address: Ipv6Addr,
    ) -> Option<OptionHandle> {
        let handles = bundle.get_unhandled_options(&[IaKind::Na]);
        handles
            .iter()
            .copied()
            .find(|handle| match bundle.request_option(*handle) {
                Dhcp6Option::IaNa(ia) => ia.addresses().contains(&address),
                _ => false,
            })
            .or_else(|| handles.first().copied())
    }

    /// The unhandled IA_PD that already asks for this prefix, or the first
    fn find_iapd_for_prefix(bundle: &TransactionBundle, prefix: Ipv6Prefix) -> Option<OptionHandle> {
        let handles = bundle.get_unhandled_options(&[IaKind::Pd]);
        handles
            .iter()
            .copied()
            .find(|handle| match bundle.request_option(*handle) {
                Dhcp6Option::IaPd(ia) => ia.prefixes().contains(&prefix),
                _ => false,
            })
            .or_else(|| handles.first().copied())
    }

    fn handle_request(&self, bundle: &mut TransactionBundle, assignment: &Assignment) {
        // The prefix goes first, it doesn't depend on the link
        if let Some(prefix) = assignment.prefix {
            if let Some(handle) = Self::find_iapd_for_prefix(bundle, prefix) {
                debug!(%prefix, "assigning prefix");
                let iaid = bundle.request_option(handle).iaid().unwrap_or(0);
                bundle.add_response_option(Dhcp6Option::IaPd(IaPdOption::new(
                    iaid,
                    0,
                    0,
                    vec![Dhcp6Option::IaPrefix(IaPrefixOption::new(
                        prefix,
                        self.lifetimes.prefix_preferred,
                        self.lifetimes.prefix_valid,
                    ))],
                )));
                bundle.mark_handled(handle);
            } else {
                debug!(%prefix, "prefix reserved but client did not ask for delegation");
            }
        }

        if let Some(address) = assignment.address {
            if let Some(handle) = Self::find_iana_for_address(bundle, address) {
                debug!(%address, "assigning address");
                let iaid = bundle.request_option(handle).iaid().unwrap_or(0);
                bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
                    iaid,
                    0,
                    0,
                    vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                        address,
                        self.lifetimes.address_preferred,
                        self.lifetimes.address_valid,
                    ))],
                )));
                bundle.mark_handled(handle);
            } else {
                debug!(%address, "address reserved but client did not ask for one");
            }
        }
    }

    fn handle_confirm(&self, bundle: &mut TransactionBundle, assignment: &Assignment) {
        let Some(address) = assignment.address else {
            return;
        };
        for handle in bundle.get_unhandled_options(&[IaKind::Na]) {
            if let Dhcp6Option::IaNa(ia) = bundle.request_option(handle) {
                if ia.addresses().contains(&address) {
                    bundle.mark_handled(handle);
                }
            }
        }
    }

    fn handle_renew_rebind(&self, bundle: &mut TransactionBundle, assignment: &Assignment) {
        for handle in bundle.get_unhandled_options(&[IaKind::Pd]) {
            let Some(prefix) = assignment.prefix else {
                break;
            };
            let Dhcp6Option::IaPd(ia) = bundle.request_option(handle).clone() else {
                continue;
            };
            if !ia.prefixes().iter().any(|p| prefix.overlaps(p)) {
                continue;
            }

            // Renew our prefix, withdraw whatever else the client asked about
            let mut suboptions = Vec::new();
            for child in &ia.options {
                if let Dhcp6Option::IaPrefix(p) = child {
                    if p.prefix == prefix {
                        debug!(%prefix, "renewing prefix");
                        suboptions.push(Dhcp6Option::IaPrefix(IaPrefixOption::new(
                            prefix,
                            self.lifetimes.prefix_preferred,
                            self.lifetimes.prefix_valid,
                        )));
                    } else {
                        debug!(prefix = %p.prefix, "withdrawing prefix");
                        suboptions.push(Dhcp6Option::IaPrefix(IaPrefixOption::new(
                            p.prefix, 0, 0,
                        )));
                    }
                }
            }
            bundle.add_response_option(Dhcp6Option::IaPd(IaPdOption::new(
                ia.iaid, 0, 0, suboptions,
            )));
            bundle.mark_handled(handle);
        }

        for handle in bundle.get_unhandled_options(&[IaKind::Na]) {
            let Dhcp6Option::IaNa(ia) = bundle.request_option(handle).clone() else {
                continue;
            };
            let mut suboptions = Vec::new();
            for child in &ia.options {
                if let Dhcp6Option::IaAddress(a) = child {
                    if Some(a.address) == assignment.address {
                        debug!(address = %a.address, "renewing address");
                        suboptions.push(Dhcp6Option::IaAddress(IaAddressOption::new(
                            a.address,
                            self.lifetimes.address_preferred,
                            self.lifetimes.address_valid,
                        )));
                    } else {
                        debug!(address = %a.address, "withdrawing address");
                        suboptions.push(Dhcp6Option::IaAddress(IaAddressOption::new(
                            a.address, 0, 0,
                        )));
                    }
                }
            }
            bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
                ia.iaid, 0, 0, suboptions,
            )));
            bundle.mark_handled(handle);
        }
    }

    fn handle_release_decline(&self, bundle: &mut TransactionBundle, assignment: &Assignment) {
        // Assignments are static, there is nothing to release; claim the
        // matching IAs so the fallback doesn't complain about them
        for handle in bundle.get_unhandled_options(&[IaKind::Pd]) {
            if let (Some(prefix), Dhcp6Option::IaPd(ia)) =
                (assignment.prefix, bundle.request_option(handle))
            {
                if ia.prefixes().iter().any(|p| prefix.overlaps(p)) {
                    bundle.mark_handled(handle);
                }
            }
        }
        for handle in bundle.get_unhandled_options(&[IaKind::Na]) {
            if let (Some(address), Dhcp6Option::IaNa(ia)) =
                (assignment.address, bundle.request_option(handle))
            {
                if ia.addresses().contains(&address) {
                    bundle.mark_handled(handle);
                }
            }
        }
    }
}

impl Handler for StaticAssignmentHandler {
    fn name(&self) -> &'static str {
        "static-assignment"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        let assignment = self.get_assignment(bundle);
        match bundle.request.message_type {
            MessageType::Solicit | MessageType::Request => {
                self.handle_request(bundle, &assignment)
            }
            MessageType::Confirm => self.handle_confirm(bundle, &assignment),
            MessageType::Renew | MessageType::Rebind => {
                self.handle_renew_rebind(bundle, &assignment)
            }
            MessageType::Release | MessageType::Decline => {
                self.handle_release_decline(bundle, &assignment)
            }
            _ => {}
        }
        Ok(())
    }
}

/// Normalise a mapping key: lowercase the kind, strip separators from the
/// hex part so `00:24:36` and `002436` match.
fn normalise_key(key: &str) -> String {
    let Some((kind, rest)) = key.split_once(':') else {
        return key.trim().to_ascii_lowercase();
    };
    let kind = kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        // These carry a structural numeric field before the hex part
        "remote-id" | "linklayer-id" => match rest.split_once(':') {
            Some((number, hex)) => format!("{}:{}:{}", kind, number.trim(), normalise_hex(hex)),
            None => format!("{}:{}", kind, normalise_hex(rest)),
        },
        _ => format!("{}:{}", kind, normalise_hex(rest)),
    }
}

fn normalise_hex(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, request_of_type, solicit_with_ia};
    use dhcp6d_wire::message::ClientMessage;
    use dhcp6d_wire::TransactionId;

    fn mapping_for_test_duid() -> Arc<HashMap<String, Assignment>> {
        // The DUID used by test_support::solicit fixtures
        let mut mapping = HashMap::new();
        mapping.insert(
            "duid:00030001002436ef1d89".to_string(),
            Assignment {
                address: Some("2001:db8::42".parse().unwrap()),
                prefix: Some("2001:db8:1200::/56".parse().unwrap()),
            },
        );
        Arc::new(mapping)
    }

    fn handler() -> StaticAssignmentHandler {
        StaticAssignmentHandler::new(mapping_for_test_duid(), AssignmentLifetimes::default())
    }

    #[test]
    fn test_solicit_assigns_reserved_address() {
        let mut handler = handler();
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([0x11, 0x22, 0x33]),
        ));
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.iaid, 1);
                assert_eq!(ia.addresses(), vec!["2001:db8::42".parse::<Ipv6Addr>().unwrap()]);
                match &ia.options[0] {
                    Dhcp6Option::IaAddress(a) => {
                        assert_eq!(a.preferred_lifetime, 3600);
                        assert_eq!(a.valid_lifetime, 7200);
                    }
                    other => panic!("expected address, got {:?}", other),
                }
            }
            other => panic!("expected IA-NA in response, got {:?}", other),
        }
        assert!(bundle.get_unhandled_options(&[IaKind::Na]).is_empty());
    }

    #[test]
    fn test_unknown_client_gets_nothing() {
        let mut handler = StaticAssignmentHandler::new(
            Arc::new(HashMap::new()),
            AssignmentLifetimes::default(),
        );
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([0x11, 0x22, 0x33]),
        ));
        handler.handle(&mut bundle).unwrap();
        assert!(bundle.get_response_option(codes::IA_NA).is_none());
        assert_eq!(bundle.get_unhandled_options(&[IaKind::Na]).len(), 1);
    }

    #[test]
    fn test_renew_withdraws_foreign_address() {
        let mut handler = handler();
        let mut bundle = bundle_for(request_of_type(MessageType::Renew, 1));
        bundle.init_response(ClientMessage::new(
            MessageType::Reply,
            TransactionId([0x11, 0x22, 0x33]),
        ));
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                // The fixture renews 2001:db8::bad which is not assigned
                match &ia.options[0] {
                    Dhcp6Option::IaAddress(a) => {
                        assert_eq!(a.preferred_lifetime, 0);
                        assert_eq!(a.valid_lifetime, 0);
                    }
                    other => panic!("expected address, got {:?}", other),
                }
            }
            other => panic!("expected IA-NA in response, got {:?}", other),
        }
    }

    #[test]
    fn test_csv_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assignments.csv");
        std::fs::write(
            &path,
            "id,address,prefix\n\
             duid:00030001002436ef1d89,2001:db8::42,\n\
             interface-id:4661737445746865726e6574302f30,,2001:db8:1200::/56\n",
        )
        .unwrap();

        let mapping = StaticAssignmentHandler::load_csv(&path).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping["duid:00030001002436ef1d89"].address,
            Some("2001:db8::42".parse().unwrap())
        );
        assert_eq!(
            mapping["interface-id:4661737445746865726e6574302f30"].prefix,
            Some("2001:db8:1200::/56".parse().unwrap())
        );
    }

    #[test]
    fn test_csv_bad_header_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assignments.csv");
        std::fs::write(&path, "duid,addr\n").unwrap();
        assert!(StaticAssignmentHandler::load_csv(&path).is_err());
    }

    #[test]
    fn test_json_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assignments.json");
        std::fs::write(
            &path,
            r#"{"duid:00030001002436ef1d89": {"address": "2001:db8::42", "prefix": null}}"#,
        )
        .unwrap();

        let mapping = StaticAssignmentHandler::load_json(&path).unwrap();
        assert_eq!(
            mapping["duid:00030001002436ef1d89"].address,
            Some("2001:db8::42".parse().unwrap())
        );
    }

    #[test]
    fn test_key_normalisation() {
        assert_eq!(
            normalise_key("duid:00:03:00:01:00:24:36:EF:1D:89"),
            "duid:00030001002436ef1d89"
        );
    }
}
