//! Recording DSP: an in-memory [`DspProtocol`] that logs every request and
//! rejects the ones it is told to.

use crate::protocol::{DspProtocol, ProtocolError, ProtocolOp};
use crate::topology::{Module, ModuleId, Pipeline, PipelineId};

/// One request as seen by the DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DspCall {
    /// `create_pipeline`.
    Create(PipelineId),
    /// `instantiate_module`.
    Instantiate(ModuleId),
    /// `bind(src, dst)`.
    Bind(ModuleId, ModuleId),
    /// `unbind(src, dst)`.
    Unbind(ModuleId, ModuleId),
    /// `run_pipeline`.
    Run(PipelineId),
    /// `stop_pipeline`.
    Stop(PipelineId),
    /// `delete_pipeline`.
    Delete(PipelineId),
}

impl DspCall {
    fn op(&self) -> ProtocolOp {
        match self {
            DspCall::Create(_) => ProtocolOp::CreatePipeline,
            DspCall::Instantiate(_) => ProtocolOp::InstantiateModule,
            DspCall::Bind(..) => ProtocolOp::Bind,
            DspCall::Unbind(..) => ProtocolOp::Unbind,
            DspCall::Run(_) => ProtocolOp::RunPipeline,
            DspCall::Stop(_) => ProtocolOp::StopPipeline,
            DspCall::Delete(_) => ProtocolOp::DeletePipeline,
        }
    }
}

/// Scripted DSP for tests and benches.
#[derive(Debug, Default)]
pub struct RecordingDsp {
    /// Every request received, rejected ones included.
    pub calls: Vec<DspCall>,
    failures: Vec<(DspCall, i32)>,
    /// Modules instantiated and not yet released by a pipeline delete.
    pub instantiated: Vec<(PipelineId, ModuleId)>,
}

impl RecordingDsp {
    /// Create a DSP that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every future occurrence of `call` with `status`.
    pub fn fail_on(&mut self, call: DspCall, status: i32) {
        self.failures.push((call, status));
    }

    /// Accept everything again.
    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    /// Drop the recorded call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Recorded binds, in order.
    pub fn binds(&self) -> Vec<(ModuleId, ModuleId)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DspCall::Bind(a, b) => Some((*a, *b)),
                _ => None,
            })
            .collect()
    }

    /// Recorded unbinds, in order.
    pub fn unbinds(&self) -> Vec<(ModuleId, ModuleId)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DspCall::Unbind(a, b) => Some((*a, *b)),
                _ => None,
            })
            .collect()
    }

    fn record(&mut self, call: DspCall) -> Result<(), ProtocolError> {
        self.calls.push(call);
        match self.failures.iter().find(|(c, _)| *c == call) {
            Some((_, status)) => Err(ProtocolError::new(call.op(), *status)),
            None => Ok(()),
        }
    }
}

impl DspProtocol for RecordingDsp {
    fn create_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        self.record(DspCall::Create(pipeline.id))
    }

    fn instantiate_module(&mut self, module: &Module) -> Result<(), ProtocolError> {
        self.record(DspCall::Instantiate(module.id))?;
        self.instantiated.push((module.pipeline, module.id));
        Ok(())
    }

    fn bind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError> {
        self.record(DspCall::Bind(src.id, dst.id))
    }

    fn unbind(&mut self, src: &Module, dst: &Module) -> Result<(), ProtocolError> {
        self.record(DspCall::Unbind(src.id, dst.id))
    }

    fn run_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        self.record(DspCall::Run(pipeline.id))
    }

    fn stop_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        self.record(DspCall::Stop(pipeline.id))
    }

    fn delete_pipeline(&mut self, pipeline: &Pipeline) -> Result<(), ProtocolError> {
        self.record(DspCall::Delete(pipeline.id))?;
        self.instantiated.retain(|(owner, _)| *owner != pipeline.id);
        Ok(())
    }
}
