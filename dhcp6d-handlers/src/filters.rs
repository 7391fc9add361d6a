//! Built-in filters for routing bundles to handler subtrees

use dhcp6d_core::{Filter, Handler, TransactionBundle};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::options::{codes, Dhcp6Option};
use dhcp6d_wire::Ipv6Prefix;

/// Matches bundles carrying a given mark
pub struct MarkedWithFilter {
    pub mark: String,
}

impl MarkedWithFilter {
    pub fn new(mark: impl Into<String>) -> Self {
        Self { mark: mark.into() }
    }
}

impl Handler for MarkedWithFilter {
    fn name(&self) -> &'static str {
        "marked-with"
    }
}

impl Filter for MarkedWithFilter {
    fn matches(&self, bundle: &TransactionBundle) -> bool {
        bundle.has_mark(&self.mark)
    }

    fn description(&self) -> String {
        format!("marked-with={}", self.mark)
    }
}

/// Matches bundles whose link address falls in one of the given prefixes
pub struct SubnetFilter {
    pub prefixes: Vec<Ipv6Prefix>,
}

impl SubnetFilter {
    pub fn new(prefixes: Vec<Ipv6Prefix>) -> Self {
        Self { prefixes }
    }
}

impl Handler for SubnetFilter {
    fn name(&self) -> &'static str {
        "subnet"
    }
}

impl Filter for SubnetFilter {
    fn matches(&self, bundle: &TransactionBundle) -> bool {
        let link_address = bundle.link_address();
        self.prefixes
            .iter()
            .any(|prefix| prefix.contains(&link_address))
    }

    fn description(&self) -> String {
        let prefixes: Vec<String> = self.prefixes.iter().map(|p| p.to_string()).collect();
        format!("subnet in [{}]", prefixes.join(", "))
    }
}

/// Matches bundles whose elapsed-time option is at or above a threshold.
///
/// Standby servers use this to only answer clients the primary has been
/// ignoring for a while.
pub struct ElapsedTimeFilter {
    /// Threshold in centiseconds
    pub min_elapsed_time: u16,
}

impl ElapsedTimeFilter {
    pub fn new(min_elapsed_time: u16) -> Self {
        Self { min_elapsed_time }
    }
}

impl Handler for ElapsedTimeFilter {
    fn name(&self) -> &'static str {
        "elapsed-time"
    }
}

impl Filter for ElapsedTimeFilter {
    fn matches(&self, bundle: &TransactionBundle) -> bool {
        match bundle.request.option(codes::ELAPSED_TIME) {
            Some(Dhcp6Option::ElapsedTime(option)) => {
                option.elapsed_time >= self.min_elapsed_time
            }
            _ => false,
        }
    }

    fn description(&self) -> String {
        format!("elapsed-time>={}", self.min_elapsed_time)
    }
}

/// Matches bundles whose request has one of the given message types
pub struct MessageTypeFilter {
    pub message_types: Vec<MessageType>,
}

impl MessageTypeFilter {
    pub fn new(message_types: Vec<MessageType>) -> Self {
        Self { message_types }
    }
}

impl Handler for MessageTypeFilter {
    fn name(&self) -> &'static str {
        "message-type"
    }
}

impl Filter for MessageTypeFilter {
    fn matches(&self, bundle: &TransactionBundle) -> bool {
        self.message_types.contains(&bundle.request.message_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, bundle_with_link_address, solicit, solicit_with_elapsed};

    #[test]
    fn test_marked_with() {
        let filter = MarkedWithFilter::new("lan");
        let mut bundle = bundle_for(solicit());
        assert!(!filter.matches(&bundle));
        bundle.add_mark("lan");
        assert!(filter.matches(&bundle));
    }

    #[test]
    fn test_subnet_filter() {
        let filter = SubnetFilter::new(vec!["2001:db8::/32".parse().unwrap()]);
        let inside = bundle_with_link_address(solicit(), "2001:db8::1".parse().unwrap());
        let outside = bundle_with_link_address(solicit(), "2001:db9::1".parse().unwrap());
        assert!(filter.matches(&inside));
        assert!(!filter.matches(&outside));
    }

    #[test]
    fn test_elapsed_time_filter() {
        let filter = ElapsedTimeFilter::new(1000);
        assert!(!filter.matches(&bundle_for(solicit_with_elapsed(500))));
        assert!(filter.matches(&bundle_for(solicit_with_elapsed(1500))));
    }

    #[test]
    fn test_message_type_filter() {
        let filter = MessageTypeFilter::new(vec![MessageType::Solicit]);
        assert!(filter.matches(&bundle_for(solicit())));
        let other = MessageTypeFilter::new(vec![MessageType::InformationRequest]);
        assert!(!other.matches(&bundle_for(solicit())));
    }
}
