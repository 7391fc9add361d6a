//! The handler plan: configuration output, worker input
//!
//! Parsing the configuration happens once, in the master, possibly with
//! elevated privileges. What comes out is a plan: an immutable tree of
//! factories plus the knobs the pipeline frame needs. Workers instantiate
//! their own handlers from the plan after privileges are dropped, so nothing
//! stateful ever crosses between workers.

use std::sync::Arc;

use dhcp6d_wire::Duid;

use crate::error::Result;
use crate::handler::{Filter, Handler};
use crate::pipeline::PipelineNode;

/// Builds one handler instance per worker
pub trait HandlerFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn Handler>>;
}

/// Builds one filter instance per worker
pub trait FilterFactory: Send + Sync {
    fn build(&self) -> Result<Box<dyn Filter>>;
}

/// One node of the configured handler tree
#[derive(Clone)]
pub enum PlanNode {
    Handler(Arc<dyn HandlerFactory>),
    Filter {
        factory: Arc<dyn FilterFactory>,
        children: Vec<PlanNode>,
    },
}

impl PlanNode {
    /// Instantiate this node and its subtree
    pub fn instantiate(&self) -> Result<PipelineNode> {
        match self {
            PlanNode::Handler(factory) => Ok(PipelineNode::Handler(factory.build()?)),
            PlanNode::Filter { factory, children } => Ok(PipelineNode::Filter {
                filter: factory.build()?,
                children: children
                    .iter()
                    .map(PlanNode::instantiate)
                    .collect::<Result<Vec<_>>>()?,
            }),
        }
    }
}

/// Everything a worker needs to build its pipeline
#[derive(Clone)]
pub struct PipelinePlan {
    /// The DUID this server identifies itself with
    pub server_duid: Duid,
    /// Whether rapid commit is enabled at all
    pub allow_rapid_commit: bool,
    /// Whether refusals may still be rapid-committed
    pub rapid_commit_rejections: bool,
    /// Whether this server is authoritative for its links
    pub authoritative: bool,
    /// The configured handler tree, in declared order
    pub nodes: Vec<PlanNode>,
}

impl PipelinePlan {
    /// Instantiate the configured nodes (the pipeline frame is added by the
    /// standard assembly in the handlers crate)
    pub fn instantiate_nodes(&self) -> Result<Vec<PipelineNode>> {
        self.nodes.iter().map(PlanNode::instantiate).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;

    struct NoopHandler;

    impl Handler for NoopHandler {
        fn name(&self) -> &'static str {
            "noop"
        }
    }

    struct NoopFactory;

    impl HandlerFactory for NoopFactory {
        fn build(&self) -> Result<Box<dyn Handler>> {
            Ok(Box::new(NoopHandler))
        }
    }

    #[test]
    fn test_plan_instantiates_fresh_handlers() {
        let plan = PipelinePlan {
            server_duid: Duid::LinkLayer {
                hardware_type: 1,
                link_layer_address: vec![0; 6],
            },
            allow_rapid_commit: false,
            rapid_commit_rejections: false,
            authoritative: true,
            nodes: vec![PlanNode::Handler(Arc::new(NoopFactory))],
        };

        // Each instantiation yields an independent set
        let first = plan.instantiate_nodes().unwrap();
        let second = plan.instantiate_nodes().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
