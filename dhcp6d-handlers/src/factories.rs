//! Factories turning configuration data into per-worker handler instances

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;

use dhcp6d_core::{Filter, FilterFactory, Handler, HandlerFactory, LeaseStore, Result};
use dhcp6d_wire::message::MessageType;
use dhcp6d_wire::Ipv6Prefix;

use crate::basic::{IgnoreRequestHandler, PreferenceHandler, ServerUnicastHandler};
use crate::copy::{CopyOptionHandler, CopyRelayOptionHandler};
use crate::filters::{ElapsedTimeFilter, MarkedWithFilter, MessageTypeFilter, SubnetFilter};
use crate::leasequery::{LeaseRecorderHandler, LeasequeryHandler};
use crate::rate_limit::{RateLimitCounters, RateLimitHandler, RateLimitKey};
use crate::static_assignment::{Assignment, AssignmentLifetimes, StaticAssignmentHandler};
use crate::timing::{IanaTimingLimitsHandler, IapdTimingLimitsHandler, TimingLimits};

pub struct StaticAssignmentFactory {
    /// Loaded once at configuration time, shared read-only by all workers
    pub mapping: Arc<HashMap<String, Assignment>>,
    pub lifetimes: AssignmentLifetimes,
}

impl HandlerFactory for StaticAssignmentFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(StaticAssignmentHandler::new(
            self.mapping.clone(),
            self.lifetimes.clone(),
        )))
    }
}

pub struct RateLimitFactory {
    pub key: RateLimitKey,
    /// One counter table for the whole server, not per worker
    pub counters: Arc<RateLimitCounters>,
}

impl HandlerFactory for RateLimitFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(RateLimitHandler::new(
            self.key,
            self.counters.clone(),
        )))
    }
}

pub struct TimingLimitsFactory {
    pub limits: TimingLimits,
    /// false bounds IA_NA timers, true bounds IA_PD timers
    pub prefix_delegation: bool,
}

impl HandlerFactory for TimingLimitsFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        if self.prefix_delegation {
            Ok(Box::new(IapdTimingLimitsHandler::new(self.limits.clone())))
        } else {
            Ok(Box::new(IanaTimingLimitsHandler::new(self.limits.clone())))
        }
    }
}

pub struct PreferenceFactory {
    pub preference: u8,
}

impl HandlerFactory for PreferenceFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(PreferenceHandler::new(self.preference)))
    }
}

pub struct IgnoreFactory {
    pub message_types: Vec<MessageType>,
}

impl HandlerFactory for IgnoreFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(IgnoreRequestHandler::new(
            self.message_types.clone(),
        )))
    }
}

pub struct ServerUnicastFactory {
    pub address: Ipv6Addr,
}

impl HandlerFactory for ServerUnicastFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(ServerUnicastHandler::new(self.address)))
    }
}

pub struct CopyOptionFactory {
    pub option_code: u16,
    pub always_send: bool,
}

impl HandlerFactory for CopyOptionFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(CopyOptionHandler::new(
            self.option_code,
            self.always_send,
        )))
    }
}

pub struct CopyRelayOptionFactory {
    pub option_code: u16,
}

impl HandlerFactory for CopyRelayOptionFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(CopyRelayOptionHandler::new(self.option_code)))
    }
}

pub struct LeasequeryFactory {
    pub store: Arc<dyn LeaseStore>,
    pub allow_from: Vec<Ipv6Prefix>,
}

impl HandlerFactory for LeasequeryFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(LeasequeryHandler::new(
            self.store.clone(),
            self.allow_from.clone(),
        )))
    }
}

pub struct LeaseRecorderFactory {
    pub store: Arc<dyn LeaseStore>,
}

impl HandlerFactory for LeaseRecorderFactory {
    fn build(&self) -> Result<Box<dyn Handler>> {
        Ok(Box::new(LeaseRecorderHandler::new(self.store.clone())))
    }
}

pub struct MarkedWithFactory {
    pub mark: String,
}

impl FilterFactory for MarkedWithFactory {
    fn build(&self) -> Result<Box<dyn Filter>> {
        Ok(Box::new(MarkedWithFilter::new(self.mark.clone())))
    }
}

pub struct SubnetFactory {
    pub prefixes: Vec<Ipv6Prefix>,
}

impl FilterFactory for SubnetFactory {
    fn build(&self) -> Result<Box<dyn Filter>> {
        Ok(Box::new(SubnetFilter::new(self.prefixes.clone())))
    }
}

pub struct ElapsedTimeFactory {
    pub min_elapsed_time: u16,
}

impl FilterFactory for ElapsedTimeFactory {
    fn build(&self) -> Result<Box<dyn Filter>> {
        Ok(Box::new(ElapsedTimeFilter::new(self.min_elapsed_time)))
    }
}

pub struct MessageTypeFactory {
    pub message_types: Vec<MessageType>,
}

impl FilterFactory for MessageTypeFactory {
    fn build(&self) -> Result<Box<dyn Filter>> {
        Ok(Box::new(MessageTypeFilter::new(self.message_types.clone())))
    }
}
