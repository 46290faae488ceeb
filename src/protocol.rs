//! DSP protocol boundary.
//!
//! The transport that carries these requests to firmware (mailbox, IPC ring)
//! lives outside this crate. Implementations block until the DSP replies.

use crate::topology::{Module, Pipeline};
use thiserror::Error;

/// A request kind sent to the DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolOp {
    /// Create a pipeline and its memory on the DSP.
    CreatePipeline,
    /// Instantiate a module.
    InstantiateModule,
    /// Connect two instantiated modules.
    Bind,
    /// Disconnect two bound modules.
    Unbind,
    /// Set a pipeline running.
    RunPipeline,
    /// Pause a pipeline.
    StopPipeline,
    /// Delete a pipeline on the DSP.
    DeletePipeline,
}

impl std::fmt::Display for ProtocolOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProtocolOp::CreatePipeline => "create pipeline",
            ProtocolOp::InstantiateModule => "instantiate module",
            ProtocolOp::Bind => "bind",
            ProtocolOp::Unbind => "unbind",
            ProtocolOp::RunPipeline => "run pipeline",
            ProtocolOp::StopPipeline => "stop pipeline",
            ProtocolOp::DeletePipeline => "delete pipeline",
        };
        f.write_str(name)
    }
}

/// The DSP rejected a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} rejected by DSP (status {status})")]
pub struct ProtocolError {
    /// Request that failed.
    pub op: ProtocolOp,
    /// Firmware status code.
    pub status: i32,
}

impl ProtocolError {
    /// Create a protocol error.
    pub fn new(op: ProtocolOp, status: i32) -> Self {
        Self { op, status }
    }
}

/// Synchronous request/response calls into the DSP firmware.
pub trait DspProtocol {
    /// Create `pipeline` with its memory pages, priority and power mode.
    fn create_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError>;

    /// Instantiate `module` with its resolved formats and buffer sizes.
    fn instantiate_module(&mut self, module: &Module) -> Result<(), ProtocolError>;

    /// Route `src` output into `dst` input.
    fn bind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError>;

    /// Remove the `src` to `dst` route.
    fn unbind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError>;

    /// Move `pipeline` to running.
    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError>;

    /// Move `pipeline` to paused.
    fn stop_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError>;

    /// Delete `pipeline` and free its DSP-side memory.
    fn delete_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError>;
}

impl<T: DspProtocol + ?Sized> DspProtocol for Box<T> {
    fn create_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        (**self).create_pipeline(pipeline)
    }

    fn instantiate_module(&mut self, module: &Module) -> Result<(), ProtocolError> {
        (**self).instantiate_module(module)
    }

    fn bind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError> {
        (**self).bind(src, dst)
    }

    fn unbind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError> {
        (**self).unbind(src, dst)
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        (**self).run_pipeline(pipeline)
    }

    fn stop_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        (**self).stop_pipeline(pipeline)
    }

    fn delete_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        (**self).delete_pipeline(pipeline)
    }
}
