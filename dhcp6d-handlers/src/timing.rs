//! Handlers that bound the T1/T2 renewal timers in replies

use dhcp6d_core::{Error, Handler, HandlerResult, Result, TransactionBundle};
use dhcp6d_wire::options::Dhcp6Option;
use dhcp6d_wire::INFINITY;

/// The timer policy: hard bounds plus optional factors applied to the
/// shortest preferred lifetime when the assigning handler left a timer at 0.
#[derive(Debug, Clone)]
pub struct TimingLimits {
    min_t1: u32,
    max_t1: u32,
    factor_t1: Option<f64>,
    min_t2: u32,
    max_t2: u32,
    factor_t2: Option<f64>,
}

impl Default for TimingLimits {
    fn default() -> Self {
        // T1 at half and T2 at 80% of the shortest preferred lifetime
        Self {
            min_t1: 0,
            max_t1: INFINITY,
            factor_t1: Some(0.5),
            min_t2: 0,
            max_t2: INFINITY,
            factor_t2: Some(0.8),
        }
    }
}

impl TimingLimits {
    pub fn new(
        min_t1: u32,
        max_t1: u32,
        factor_t1: Option<f64>,
        min_t2: u32,
        max_t2: u32,
        factor_t2: Option<f64>,
    ) -> Result<Self> {
        // Keep the bounds mutually consistent
        let max_t1 = max_t1.min(max_t2);
        let min_t2 = min_t2.max(min_t1);

        if min_t1 > max_t2 {
            return Err(Error::invalid_parameter("min-t1", "larger than max-t2"));
        }
        let factor_t1 = factor_t1.map(|f| f.clamp(0.0, 1.0));
        let factor_t2 = factor_t2.map(|f| f.clamp(0.0, 1.0));
        if let (Some(f1), Some(f2)) = (factor_t1, factor_t2) {
            if f1 > f2 {
                return Err(Error::invalid_parameter("factor-t1", "larger than factor-t2"));
            }
        }

        Ok(Self {
            min_t1,
            max_t1,
            factor_t1,
            min_t2,
            max_t2,
            factor_t2,
        })
    }

    fn from_factor(shortest: u32, factor: f64) -> u32 {
        if shortest == INFINITY {
            INFINITY
        } else {
            (shortest as f64 * factor) as u32
        }
    }

    /// The clamped timers for an IA with the given shortest preferred lifetime
    fn apply(&self, t1: u32, t2: u32, shortest: u32) -> (u32, u32) {
        let mut t1 = t1;
        let mut t2 = t2;

        if t1 == 0 {
            if let Some(factor) = self.factor_t1 {
                t1 = Self::from_factor(shortest, factor);
            }
        }
        if t2 == 0 {
            if let Some(factor) = self.factor_t2 {
                t2 = Self::from_factor(shortest, factor);
            }
        }

        // Bound to the configured window and to the shortest preferred
        // lifetime, keeping t1 <= t2
        t2 = t2.max(self.min_t2).min(self.max_t2).min(shortest);
        t1 = t1.max(self.min_t1).min(self.max_t1).min(t2);
        (t1, t2)
    }
}

/// Applies the timer policy to every IA_NA in the response
pub struct IanaTimingLimitsHandler {
    limits: TimingLimits,
}

impl IanaTimingLimitsHandler {
    pub fn new(limits: TimingLimits) -> Self {
        Self { limits }
    }
}

impl Handler for IanaTimingLimitsHandler {
    fn name(&self) -> &'static str {
        "ia-na-timing-limits"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if let Some(response) = &mut bundle.response {
            for option in &mut response.options {
                if let Dhcp6Option::IaNa(ia) = option {
                    let shortest = ia
                        .options
                        .iter()
                        .filter_map(|child| match child {
                            Dhcp6Option::IaAddress(a) => Some(a.preferred_lifetime),
                            _ => None,
                        })
                        .min();
                    // Don't touch the timers of an IA without leases
                    if let Some(shortest) = shortest {
                        let (t1, t2) = self.limits.apply(ia.t1, ia.t2, shortest);
                        ia.t1 = t1;
                        ia.t2 = t2;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Applies the timer policy to every IA_PD in the response
pub struct IapdTimingLimitsHandler {
    limits: TimingLimits,
}

impl IapdTimingLimitsHandler {
    pub fn new(limits: TimingLimits) -> Self {
        Self { limits }
    }
}

impl Handler for IapdTimingLimitsHandler {
    fn name(&self) -> &'static str {
        "ia-pd-timing-limits"
    }

    fn handle(&mut self, bundle: &mut TransactionBundle) -> HandlerResult {
        if let Some(response) = &mut bundle.response {
            for option in &mut response.options {
                if let Dhcp6Option::IaPd(ia) = option {
                    let shortest = ia
                        .options
                        .iter()
                        .filter_map(|child| match child {
                            Dhcp6Option::IaPrefix(p) => Some(p.preferred_lifetime),
                            _ => None,
                        })
                        .min();
                    if let Some(shortest) = shortest {
                        let (t1, t2) = self.limits.apply(ia.t1, ia.t2, shortest);
                        ia.t1 = t1;
                        ia.t2 = t2;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bundle_for, solicit_with_ia};
    use dhcp6d_wire::message::{ClientMessage, MessageType};
    use dhcp6d_wire::options::{IaAddressOption, IaNaOption};
    use dhcp6d_wire::TransactionId;

    fn bundle_with_lease(preferred: u32) -> dhcp6d_core::TransactionBundle {
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
            1,
            0,
            0,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::42".parse().unwrap(),
                preferred,
                preferred.saturating_mul(2),
            ))],
        )));
        bundle
    }

    #[test]
    fn test_default_factors() {
        let mut handler = IanaTimingLimitsHandler::new(TimingLimits::default());
        let mut bundle = bundle_with_lease(3600);
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(dhcp6d_wire::options::codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.t1, 1800);
                assert_eq!(ia.t2, 2880);
            }
            other => panic!("missing IA-NA: {:?}", other),
        }
    }

    #[test]
    fn test_infinite_preferred_gives_infinite_timers() {
        let mut handler = IanaTimingLimitsHandler::new(TimingLimits::default());
        let mut bundle = bundle_with_lease(INFINITY);
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(dhcp6d_wire::options::codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.t1, INFINITY);
                assert_eq!(ia.t2, INFINITY);
            }
            other => panic!("missing IA-NA: {:?}", other),
        }
    }

    #[test]
    fn test_explicit_timers_kept_within_bounds() {
        let limits = TimingLimits::new(0, 1000, Some(0.5), 0, 2000, Some(0.8)).unwrap();
        let mut handler = IanaTimingLimitsHandler::new(limits);
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(
            1,
            5000,
            6000,
            vec![Dhcp6Option::IaAddress(IaAddressOption::new(
                "2001:db8::42".parse().unwrap(),
                3600,
                7200,
            ))],
        )));
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(dhcp6d_wire::options::codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.t2, 2000);
                assert_eq!(ia.t1, 1000);
                assert!(ia.t1 <= ia.t2);
            }
            other => panic!("missing IA-NA: {:?}", other),
        }
    }

    #[test]
    fn test_ia_without_leases_untouched() {
        let mut handler = IanaTimingLimitsHandler::new(TimingLimits::default());
        let mut bundle = bundle_for(solicit_with_ia(1));
        bundle.init_response(ClientMessage::new(
            MessageType::Advertise,
            TransactionId([1, 2, 3]),
        ));
        bundle.add_response_option(Dhcp6Option::IaNa(IaNaOption::new(1, 0, 0, vec![])));
        handler.handle(&mut bundle).unwrap();

        match bundle.get_response_option(dhcp6d_wire::options::codes::IA_NA) {
            Some(Dhcp6Option::IaNa(ia)) => {
                assert_eq!(ia.t1, 0);
                assert_eq!(ia.t2, 0);
            }
            other => panic!("missing IA-NA: {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_factors_rejected() {
        assert!(TimingLimits::new(0, INFINITY, Some(0.9), 0, INFINITY, Some(0.5)).is_err());
    }
}
