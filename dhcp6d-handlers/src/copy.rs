//! Handlers that mirror options from the request side to the response side

use dhcp6d_core::{Handler, HandlerResult, TransactionBundle};
use dhcp6d_wire::options::codes;

/// Copies all options of one code from the request into the response.
///
/// When `always_send` is false the option is only copied if the client asked
/// for it in an option-request option.
pub struct CopyOptionHandler {
    pub option_code: u16,
    pub always_send: bool,
}

impl CopyOptionHandler {
    pub fn new(option_code: u16, always_send: bool) -> Self {
        Self {
            option_code,
            always_send,
        }
    }

    fn requested(&self, bundle: &TransactionBundle) -> bool {
        use dhcp6d_wire::options::Dhcp6Option;
        match bundle.request.option(codes::OPTION_REQUEST) {
            Some(Dhcp6Option::OptionRequest(oro)) => oro.requests(self.option_code),
            _ => false,
        }
    }
}

impl Handler for CopyOptionHandler {
    fn name(&self) -> &'static str {
        "copy-option"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if !self.always_send && !self.requested(bundle) {
            return Ok(());
        }
        let options: Vec<_> = bundle
            .request
            .options_of(self.option_code)
            .cloned()
            .collect();
        for option in options {
            bundle.add_response_option(option);
        }
        Ok(())
    }
}

/// Mirrors an option from each incoming relay shell onto the matching
/// outgoing relay-reply shell.
pub struct CopyRelayOptionHandler {
    pub option_code: u16,
}

impl CopyRelayOptionHandler {
    pub fn new(option_code: u16) -> Self {
        Self { option_code }
    }
}

impl Handler for CopyRelayOptionHandler {
    fn name(&self) -> &'static str {
        "copy-relay-option"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        for position in 0..bundle.relay_count() {
            if let Some(option) = bundle.relay_option(position, self.option_code).cloned() {
                bundle.add_response_relay_option(position, option);
            }
        }
        Ok(())
    }
}

/// The interface-id echo: relays expect their interface-id back verbatim
pub struct InterfaceIdEchoHandler {
    inner: CopyRelayOptionHandler,
}

impl InterfaceIdEchoHandler {
    pub fn new() -> Self {
        Self {
            inner: CopyRelayOptionHandler::new(codes::INTERFACE_ID),
        }
    }
}

impl Default for InterfaceIdEchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for InterfaceIdEchoHandler {
    fn name(&self) -> &'static str {
        "interface-id-echo"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        self.inner.handle(bundle)
    }
}
