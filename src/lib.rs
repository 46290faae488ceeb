//! Auxide topology control plane: admits DSP audio pipelines against a fixed
//! memory and compute budget, resolves module formats, and sequences module
//! instantiate/bind/unbind against the DSP.

pub mod buffer;
pub mod config;
pub mod dsl;
pub mod error;
pub mod format;
#[doc(hidden)]
pub mod harness;
#[doc(hidden)]
pub mod invariant_ppt;
pub mod ledger;
pub mod orchestrator;
pub mod protocol;
pub mod topology;

pub use config::{ConfigError, DspConfig};
pub use error::{Resource, TopologyError};
pub use ledger::ResourceLedger;
pub use orchestrator::{ControlPlane, Orchestrator, PowerEvent};
pub use protocol::{DspProtocol, ProtocolError, ProtocolOp};
pub use topology::{Module, ModuleId, Pipeline, PipelineId, Topology, WidgetId};
