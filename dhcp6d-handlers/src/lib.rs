//! Built-in handlers and filters for dhcp6d
//!
//! Everything here runs inside the pipeline from `dhcp6d-core`: the
//! identification handlers and relay echo that frame every pipeline, the
//! policy handlers (static assignment, rate limit, timing limits, rapid
//! commit, preference), the terminal fallbacks that answer whatever is left,
//! and the filters that route bundles into handler subtrees.

pub mod basic;
pub mod copy;
pub mod factories;
pub mod filters;
pub mod leasequery;
pub mod rapid_commit;
pub mod rate_limit;
pub mod static_assignment;
pub mod timing;
pub mod unanswered;

#[cfg(test)]
pub(crate) mod test_support;

pub use basic::{
    ClientIdHandler, IgnoreRequestHandler, PreferenceHandler, RejectUnwantedUnicastHandler,
    ServerIdHandler, ServerUnicastHandler,
};
pub use copy::{CopyOptionHandler, CopyRelayOptionHandler, InterfaceIdEchoHandler};
pub use filters::{ElapsedTimeFilter, MarkedWithFilter, MessageTypeFilter, SubnetFilter};
pub use leasequery::{
    FileLeaseStore, LeaseRecorderHandler, LeasequeryHandler, UnansweredLeasequeryHandler,
};
pub use rapid_commit::RapidCommitHandler;
pub use rate_limit::{RateLimitCounters, RateLimitHandler, RateLimitKey};
pub use static_assignment::{Assignment, AssignmentLifetimes, StaticAssignmentHandler};
pub use timing::{IanaTimingLimitsHandler, IapdTimingLimitsHandler, TimingLimits};
pub use unanswered::{AddMissingStatusHandler, UnansweredIaHandler};

use dhcp6d_core::{Pipeline, PipelineNode, PipelinePlan, Result};

/// Build the full pipeline a worker runs: the standard setup handlers, the
/// configured tree from the plan, and the cleanup handlers that guarantee
/// every IA and every leasequery gets an answer.
pub fn assemble(plan: &PipelinePlan) -> Result<Pipeline> {
    let mut nodes: Vec<PipelineNode> = Vec::new();

    // Setup: rapid commit first so its post phase runs last
    if plan.allow_rapid_commit {
        nodes.push(PipelineNode::Handler(Box::new(RapidCommitHandler::new(
            plan.rapid_commit_rejections,
        ))));
    }
    nodes.push(PipelineNode::Handler(Box::new(ServerIdHandler::new(
        plan.server_duid.clone(),
    ))));
    nodes.push(PipelineNode::Handler(Box::new(ClientIdHandler)));
    nodes.push(PipelineNode::Handler(Box::new(InterfaceIdEchoHandler::new())));

    // The configured tree
    nodes.extend(plan.instantiate_nodes()?);

    // Cleanup: everything that must run after the configured handlers
    nodes.push(PipelineNode::Handler(Box::new(RejectUnwantedUnicastHandler)));
    nodes.push(PipelineNode::Handler(Box::new(UnansweredIaHandler::new(
        plan.authoritative,
    ))));
    nodes.push(PipelineNode::Handler(Box::new(UnansweredLeasequeryHandler)));
    nodes.push(PipelineNode::Handler(Box::new(AddMissingStatusHandler)));

    Ok(Pipeline::new(plan.server_duid.clone(), nodes))
}
