//! Error taxonomy for the topology control plane.

use crate::protocol::ProtocolError;
use crate::topology::{PipelineId, Stage, WidgetId};
use std::collections::TryReserveError;
use thiserror::Error;

/// Budgeted DSP resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Memory pages, reserved per pipeline.
    MemoryPages,
    /// Compute budget (mcps), reserved per module.
    Compute,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::MemoryPages => write!(f, "memory pages"),
            Resource::Compute => write!(f, "compute budget"),
        }
    }
}

/// Errors surfaced by discovery, admission and pipeline sequencing.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A budget would be exceeded. Not retried: capacity only changes when
    /// other pipelines are torn down.
    #[error("{resource} denied: requested {requested}, available {available}")]
    ResourceDenied {
        /// Which budget was exhausted.
        resource: Resource,
        /// Size of the rejected request.
        requested: u32,
        /// Headroom left at the time of the request.
        available: u32,
    },

    /// The DSP rejected a request.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Host-side storage for a discovery list could not be grown.
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// Teardown ran to completion but some protocol steps failed.
    #[error("teardown of pipeline {pipeline} finished with {} failed step(s)", .failures.len())]
    Teardown {
        /// Pipeline that was torn down.
        pipeline: PipelineId,
        /// Every step failure, in the order they happened.
        failures: Vec<ProtocolError>,
    },

    /// No pipeline with this id exists.
    #[error("unknown pipeline {0}")]
    UnknownPipeline(PipelineId),

    /// A pipeline with this id was already registered.
    #[error("pipeline {0} already exists")]
    DuplicatePipeline(PipelineId),

    /// Widget index out of range or removed.
    #[error("unknown widget {0}")]
    UnknownWidget(WidgetId),

    /// Widget has no DSP module payload.
    #[error("widget {0} is not a DSP module")]
    NotAModule(WidgetId),

    /// Operation not allowed in the pipeline's current stage.
    #[error("cannot {operation} pipeline {pipeline} in stage {stage:?}")]
    InvalidStage {
        /// Pipeline the operation targeted.
        pipeline: PipelineId,
        /// Stage the pipeline was in.
        stage: Stage,
        /// Operation that was refused.
        operation: &'static str,
    },

    /// The two widgets are not a bound adjacent pair of one pipeline.
    #[error("widgets {src} and {dst} are not a bound adjacent pair")]
    NotAdjacent {
        /// Source widget.
        src: WidgetId,
        /// Sink widget.
        dst: WidgetId,
    },
}

impl TopologyError {
    /// True for budget denials, which callers handle by not starting the pipeline.
    pub fn is_resource_denied(&self) -> bool {
        matches!(self, TopologyError::ResourceDenied { .. })
    }
}
