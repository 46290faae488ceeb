//! Pipeline lifecycle: admission, module instantiation, binding and teardown.
//!
//! Every operation takes `&mut self`, so one [`Orchestrator`] serializes all
//! ledger and DSP traffic. [`ControlPlane`] adds a lock for callers that share
//! it across threads.
//!
//! Init order per pipeline: memory admission, `create_pipeline`, then per
//! module compute admission, format fixup, `instantiate_module`. Teardown
//! never stops early: it unbinds what is bound, deletes the pipeline and
//! releases the ledger even when individual DSP steps fail.

use crate::config::DspConfig;
use crate::error::{Resource, TopologyError};
use crate::format::{update_module_params, StreamParams};
use crate::invariant_ppt::{assert_invariant, BIND_ADJACENT, TEARDOWN_RELEASES_ALL};
use crate::ledger::{Reservation, ResourceLedger};
use crate::protocol::DspProtocol;
use crate::topology::{ModuleState, PipeState, Pipeline, PipelineId, Stage, Topology, WidgetId};
use std::sync::{Mutex, MutexGuard};

/// DAPM power transitions delivered for a pipeline's widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// About to power up: discover, admit, instantiate, bind.
    PreUp,
    /// Powered up: run.
    PostUp,
    /// About to power down: pause.
    PreDown,
    /// Powered down: tear down.
    PostDown,
}

/// Sequences pipelines against the DSP and owns the resource ledger.
#[derive(Debug)]
pub struct Orchestrator<P: DspProtocol> {
    ledger: ResourceLedger,
    protocol: P,
}

impl<P: DspProtocol> Orchestrator<P> {
    /// Create an orchestrator over an existing ledger.
    pub fn new(ledger: ResourceLedger, protocol: P) -> Self {
        Self { ledger, protocol }
    }

    /// Create an orchestrator with a fresh ledger sized from `config`.
    pub fn from_config(config: &DspConfig, protocol: P) -> Self {
        Self::new(ResourceLedger::from_config(config), protocol)
    }

    /// The resource ledger.
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// The DSP protocol.
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Mutable access to the DSP protocol.
    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    /// Split into ledger and protocol.
    pub fn into_parts(self) -> (ResourceLedger, P) {
        (self.ledger, self.protocol)
    }

    /// Record stream parameters negotiated for `pipeline`. They are applied to
    /// module formats at the next init.
    pub fn update_stream_params(
        &mut self,
        topology: &mut Topology,
        pipeline: PipelineId,
        params: StreamParams,
    ) -> Result<(), TopologyError> {
        topology.pipeline_mut(pipeline)?.params = Some(params);
        tracing::debug!(%pipeline, ?params, "stream params updated");
        Ok(())
    }

    /// Reserve memory, create the pipeline and instantiate its modules in
    /// discovery order.
    ///
    /// A compute denial or DSP rejection stops at the failing module. What was
    /// reserved for the pipeline and the earlier modules stays reserved until
    /// [`Orchestrator::teardown_pipeline`].
    pub fn admit_and_init_pipeline(
        &mut self,
        topology: &mut Topology,
        pipeline: PipelineId,
    ) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        if pipe.stage != Stage::Uninitialized || pipe.created {
            return Err(TopologyError::InvalidStage {
                pipeline,
                stage: pipe.stage,
                operation: "initialize",
            });
        }

        let pages = pipe.memory_pages;
        if !self.ledger.try_reserve_memory(pipeline, pages) {
            return Err(TopologyError::ResourceDenied {
                resource: Resource::MemoryPages,
                requested: pages,
                available: self.ledger.memory_available(),
            });
        }

        if let Err(e) = self.protocol.create_pipeline(pipe) {
            let released = self.ledger.release_memory(pipeline);
            tracing::warn!(%pipeline, error = %e, released, "create pipeline failed, memory returned");
            return Err(e.into());
        }
        let pipe = topology.pipeline_mut(pipeline)?;
        pipe.created = true;
        pipe.state = PipeState::Paused;

        self.init_pipe_modules(topology, pipeline)?;

        let pipe = topology.pipeline_mut(pipeline)?;
        pipe.stage = Stage::ModulesInitialized;
        tracing::info!(
            %pipeline,
            modules = pipe.modules.len(),
            memory_pages = pages,
            "pipeline initialized"
        );
        Ok(())
    }

    fn init_pipe_modules(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        let modules = pipe.modules.clone();
        let params = pipe.params;
        let is_front_end = pipe.is_front_end();

        for widget in modules {
            let cost = topology.module(widget)?.compute_cost;
            if !self.ledger.try_reserve_compute(widget, cost) {
                return Err(TopologyError::ResourceDenied {
                    resource: Resource::Compute,
                    requested: cost,
                    available: self.ledger.compute_available(),
                });
            }

            let module = topology.module_mut(widget)?;
            match params {
                Some(params) => update_module_params(module, &params, is_front_end),
                None if !module.fixup.is_empty() => {
                    tracing::debug!(module = %module.id, "no stream params yet, keeping topology formats");
                }
                None => {}
            }

            self.protocol.instantiate_module(module)?;
            module.state = ModuleState::InitDone;
            tracing::debug!(%pipeline, module = %module.id, cost, "module instantiated");
        }
        Ok(())
    }

    /// Bind every unbound adjacent pair in discovery order.
    ///
    /// Stops at the first rejected bind. Pairs bound before it stay bound.
    pub fn bind_pipeline(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        if !matches!(pipe.stage, Stage::ModulesInitialized | Stage::Unbound) {
            return Err(TopologyError::InvalidStage {
                pipeline,
                stage: pipe.stage,
                operation: "bind",
            });
        }

        let pending: Vec<usize> = pipe
            .links
            .iter()
            .enumerate()
            .filter(|(_, bound)| !**bound)
            .map(|(i, _)| i)
            .collect();
        for index in pending {
            self.bind_pair(topology, pipeline, index)?;
        }

        topology.pipeline_mut(pipeline)?.stage = Stage::Bound;
        tracing::info!(%pipeline, "pipeline bound");
        Ok(())
    }

    fn bind_pair(&mut self, topology: &mut Topology, pipeline: PipelineId, index: usize) -> Result<(), TopologyError> {
        let (src, dst) = adjacent_pair(topology.pipeline(pipeline)?, index);
        let src_module = topology.module(src)?;
        let dst_module = topology.module(dst)?;
        assert_invariant(
            BIND_ADJACENT,
            src_module.pipeline == pipeline && dst_module.pipeline == pipeline,
            "bind targets adjacent modules of one pipeline",
            Some("bind_pair"),
        );

        self.protocol.bind(src_module, dst_module)?;
        tracing::debug!(%pipeline, src = %src_module.id, dst = %dst_module.id, "modules bound");
        topology.pipeline_mut(pipeline)?.links[index] = true;
        refresh_module_state(topology, pipeline, src)?;
        refresh_module_state(topology, pipeline, dst)?;
        Ok(())
    }

    /// Stop the pipeline owning the source module of pair `index`.
    fn stop_source(&mut self, topology: &mut Topology, pipeline: PipelineId, index: usize) -> Result<(), TopologyError> {
        let (src, _) = adjacent_pair(topology.pipeline(pipeline)?, index);
        let src_pipe = topology.owning_pipeline(src)?;
        let src_pipe_id = src_pipe.id;
        self.protocol.stop_pipeline(src_pipe)?;
        topology.pipeline_mut(src_pipe_id)?.state = PipeState::Paused;
        Ok(())
    }

    /// Unbind pair `index`. The link stays marked bound when the DSP rejects it.
    fn unbind_pair(&mut self, topology: &mut Topology, pipeline: PipelineId, index: usize) -> Result<(), TopologyError> {
        let (src, dst) = adjacent_pair(topology.pipeline(pipeline)?, index);
        let src_module = topology.module(src)?;
        let dst_module = topology.module(dst)?;
        assert_invariant(
            BIND_ADJACENT,
            src_module.pipeline == pipeline && dst_module.pipeline == pipeline,
            "unbind targets adjacent modules of one pipeline",
            Some("unbind_pair"),
        );
        self.protocol.unbind(src_module, dst_module)?;
        tracing::debug!(%pipeline, src = %src_module.id, dst = %dst_module.id, "modules unbound");
        topology.pipeline_mut(pipeline)?.links[index] = false;
        refresh_module_state(topology, pipeline, src)?;
        refresh_module_state(topology, pipeline, dst)?;
        Ok(())
    }

    /// Run a bound pipeline.
    pub fn start_pipeline(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        if pipe.stage != Stage::Bound {
            return Err(TopologyError::InvalidStage {
                pipeline,
                stage: pipe.stage,
                operation: "start",
            });
        }
        self.protocol.run_pipeline(pipe)?;
        topology.pipeline_mut(pipeline)?.state = PipeState::Running;
        tracing::info!(%pipeline, "pipeline running");
        Ok(())
    }

    /// Pause a created pipeline.
    pub fn pause_pipeline(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        if !pipe.created {
            return Err(TopologyError::InvalidStage {
                pipeline,
                stage: pipe.stage,
                operation: "pause",
            });
        }
        self.protocol.stop_pipeline(pipe)?;
        topology.pipeline_mut(pipeline)?.state = PipeState::Paused;
        tracing::info!(%pipeline, "pipeline paused");
        Ok(())
    }

    /// Disconnect one bound adjacent pair, as for a DAPM path disconnect:
    /// stop the source's pipeline, then unbind.
    ///
    /// A rejected stop aborts before the unbind. Either way the stage ends up
    /// matching the links: `Unbound` once any pair is unbound.
    pub fn disconnect_pair(
        &mut self,
        topology: &mut Topology,
        src: WidgetId,
        dst: WidgetId,
    ) -> Result<(), TopologyError> {
        let pipeline = topology.module(src)?.pipeline;
        let pipe = topology.pipeline(pipeline)?;
        let index = pipe
            .pair_index(src, dst)
            .filter(|&i| pipe.links[i])
            .ok_or(TopologyError::NotAdjacent { src, dst })?;

        let result = self
            .stop_source(topology, pipeline, index)
            .and_then(|()| self.unbind_pair(topology, pipeline, index));
        if let Err(e) = &result {
            tracing::warn!(%pipeline, %src, %dst, error = %e, "disconnect failed");
        }

        let pipe = topology.pipeline_mut(pipeline)?;
        if pipe.links.iter().any(|bound| !*bound) {
            pipe.stage = Stage::Unbound;
        }
        result
    }

    /// Tear a pipeline down: stop and unbind bound pairs in reverse discovery
    /// order, delete the DSP pipeline, release every reservation.
    ///
    /// Runs every step regardless of earlier failures; they come back together
    /// as [`TopologyError::Teardown`]. Calling it again on a torn-down pipeline
    /// issues no DSP requests.
    pub fn teardown_pipeline(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<(), TopologyError> {
        let pipe = topology.pipeline(pipeline)?;
        let bound: Vec<usize> = pipe
            .links
            .iter()
            .enumerate()
            .filter(|(_, bound)| **bound)
            .map(|(i, _)| i)
            .collect();

        let mut failures = Vec::new();
        for &index in bound.iter().rev() {
            let steps = [
                self.stop_source(topology, pipeline, index),
                self.unbind_pair(topology, pipeline, index),
            ];
            for step in steps {
                match step {
                    Ok(()) => {}
                    Err(TopologyError::Protocol(e)) => {
                        tracing::warn!(%pipeline, index, error = %e, "teardown step failed");
                        failures.push(e);
                    }
                    Err(e) => tracing::warn!(%pipeline, index, error = %e, "skipping inconsistent pair"),
                }
            }
        }

        let pipe = topology.pipeline(pipeline)?;
        if pipe.created {
            if let Err(e) = self.protocol.delete_pipeline(pipe) {
                tracing::warn!(%pipeline, error = %e, "delete pipeline failed");
                failures.push(e);
            }
        }

        let modules = pipe.modules.clone();
        let (memory_before, compute_before) = (self.ledger.memory_allocated(), self.ledger.compute_allocated());
        let mut released_compute = 0u32;
        for &widget in &modules {
            released_compute += self.ledger.release_compute(widget);
        }
        let released_pages = self.ledger.release_memory(pipeline);
        assert_invariant(
            TEARDOWN_RELEASES_ALL,
            memory_before.checked_sub(released_pages) == Some(self.ledger.memory_allocated())
                && compute_before.checked_sub(released_compute) == Some(self.ledger.compute_allocated())
                && self.ledger.reserved(Reservation::Pipeline(pipeline)) == 0
                && topology
                    .owned_modules(pipeline)
                    .all(|w| self.ledger.reserved(Reservation::Module(w)) == 0),
            "teardown left no reservation on any module the pipeline owns",
            Some("teardown_pipeline"),
        );

        let pipe = topology.pipeline_mut(pipeline)?;
        pipe.links.iter_mut().for_each(|l| *l = false);
        pipe.created = false;
        pipe.state = PipeState::Deleted;
        pipe.stage = Stage::Uninitialized;
        for &widget in &modules {
            if let Ok(module) = topology.module_mut(widget) {
                module.state = ModuleState::Uninit;
            }
        }

        tracing::info!(
            %pipeline,
            released_pages,
            released_compute,
            failed_steps = failures.len(),
            "pipeline torn down"
        );
        if failures.is_empty() {
            Ok(())
        } else {
            Err(TopologyError::Teardown { pipeline, failures })
        }
    }

    /// Tear a pipeline down and remove it, with its widgets, from the topology.
    ///
    /// The pipeline is removed even when teardown reports step failures.
    pub fn remove_pipeline(&mut self, topology: &mut Topology, pipeline: PipelineId) -> Result<Pipeline, TopologyError> {
        let torn_down = self.teardown_pipeline(topology, pipeline);
        let removed = topology.remove_pipeline(pipeline)?;
        torn_down.map(|()| removed)
    }

    /// Dispatch a DAPM power event for the pipeline owning `widget`.
    pub fn handle_power_event(
        &mut self,
        topology: &mut Topology,
        widget: WidgetId,
        event: PowerEvent,
    ) -> Result<(), TopologyError> {
        let pipeline = topology.module(widget)?.pipeline;
        tracing::debug!(%pipeline, %widget, ?event, "power event");
        match event {
            PowerEvent::PreUp => {
                if topology.pipeline(pipeline)?.modules.is_empty() {
                    topology.populate_pipeline(widget, pipeline)?;
                }
                self.admit_and_init_pipeline(topology, pipeline)?;
                self.bind_pipeline(topology, pipeline)
            }
            PowerEvent::PostUp => self.start_pipeline(topology, pipeline),
            PowerEvent::PreDown => {
                if topology.pipeline(pipeline)?.state == PipeState::Running {
                    self.pause_pipeline(topology, pipeline)
                } else {
                    Ok(())
                }
            }
            PowerEvent::PostDown => self.teardown_pipeline(topology, pipeline),
        }
    }
}

fn adjacent_pair(pipe: &Pipeline, index: usize) -> (WidgetId, WidgetId) {
    (pipe.modules[index], pipe.modules[index + 1])
}

fn refresh_module_state(topology: &mut Topology, pipeline: PipelineId, widget: WidgetId) -> Result<(), TopologyError> {
    let pipe = topology.pipeline(pipeline)?;
    let linked = pipe.bound_pairs().any(|(a, b)| a == widget || b == widget);
    let module = topology.module_mut(widget)?;
    module.state = if linked {
        ModuleState::BindDone
    } else {
        ModuleState::InitDone
    };
    Ok(())
}

/// Orchestrator and topology behind the control-plane lock.
#[derive(Debug)]
pub struct ControlState<P: DspProtocol> {
    /// Sequencer and ledger.
    pub orchestrator: Orchestrator<P>,
    /// Routing graph and pipelines.
    pub topology: Topology,
}

/// Shares one control plane between threads. Pipeline setup and teardown
/// never interleave: each runs under the lock.
#[derive(Debug)]
pub struct ControlPlane<P: DspProtocol> {
    inner: Mutex<ControlState<P>>,
}

impl<P: DspProtocol> ControlPlane<P> {
    /// Wrap an orchestrator and its topology.
    pub fn new(orchestrator: Orchestrator<P>, topology: Topology) -> Self {
        Self {
            inner: Mutex::new(ControlState {
                orchestrator,
                topology,
            }),
        }
    }

    /// Take the control-plane lock.
    pub fn lock(&self) -> MutexGuard<'_, ControlState<P>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&mut Orchestrator<P>, &mut Topology) -> R) -> R {
        let mut guard = self.lock();
        let state = &mut *guard;
        f(&mut state.orchestrator, &mut state.topology)
    }

    /// Unwrap the control plane.
    pub fn into_inner(self) -> ControlState<P> {
        self.inner.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ModuleType;
    use crate::format::{AttrSet, AudioFormat, Direction, FormatAttr, SampleFormat};
    use crate::harness::{DspCall, RecordingDsp};
    use crate::protocol::ProtocolOp;
    use crate::topology::{ConnType, Module, ModuleId, WidgetKind};

    const P1: PipelineId = PipelineId(1);

    fn module(id: u16, cost: u32) -> Module {
        Module::new(
            ModuleId::new(id, 0),
            ModuleType::Mixer,
            P1,
            AudioFormat::new(48000, 2, 16),
            AudioFormat::new(48000, 2, 16),
        )
        .with_compute_cost(cost)
    }

    fn setup(max_pages: u32, max_compute: u32) -> (Orchestrator<RecordingDsp>, Topology, Vec<WidgetId>) {
        let mut t = Topology::new();
        t.add_pipeline(Pipeline::new(P1, ConnType::FrontEnd, 4)).unwrap();
        let a = t.add_module("a", WidgetKind::Pga, module(1, 10)).unwrap();
        let b = t.add_module("b", WidgetKind::Effect, module(2, 20)).unwrap();
        let c = t.add_module("c", WidgetKind::Mixer, module(3, 30)).unwrap();
        t.connect(a, b).unwrap();
        t.connect(b, c).unwrap();
        t.populate_pipeline(a, P1).unwrap();
        let orch = Orchestrator::new(ResourceLedger::new(max_pages, max_compute), RecordingDsp::new());
        (orch, t, vec![a, b, c])
    }

    #[test]
    fn init_reserves_and_instantiates_in_order() {
        let (mut orch, mut t, _) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        assert_eq!(orch.ledger().memory_allocated(), 4);
        assert_eq!(orch.ledger().compute_allocated(), 60);
        assert_eq!(
            orch.protocol().calls,
            vec![
                DspCall::Create(P1),
                DspCall::Instantiate(ModuleId::new(1, 0)),
                DspCall::Instantiate(ModuleId::new(2, 0)),
                DspCall::Instantiate(ModuleId::new(3, 0)),
            ]
        );
        let pipe = t.pipeline(P1).unwrap();
        assert_eq!(pipe.stage(), Stage::ModulesInitialized);
        assert_eq!(pipe.state(), PipeState::Paused);
    }

    #[test]
    fn compute_denial_stops_before_the_module() {
        let (mut orch, mut t, w) = setup(16, 40);
        let err = orch.admit_and_init_pipeline(&mut t, P1).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::ResourceDenied {
                resource: Resource::Compute,
                requested: 30,
                available: 10
            }
        ));
        assert_eq!(orch.ledger().reserved(Reservation::Module(w[2])), 0);
        assert_eq!(orch.ledger().compute_allocated(), 30);
        assert!(!orch
            .protocol()
            .calls
            .contains(&DspCall::Instantiate(ModuleId::new(3, 0))));
        assert_eq!(t.module(w[2]).unwrap().state(), ModuleState::Uninit);
    }

    #[test]
    fn instantiate_failure_keeps_earlier_reservations_until_teardown() {
        let (mut orch, mut t, _) = setup(16, 100);
        orch.protocol_mut()
            .fail_on(DspCall::Instantiate(ModuleId::new(2, 0)), -12);
        let err = orch.admit_and_init_pipeline(&mut t, P1).unwrap_err();
        assert!(matches!(err, TopologyError::Protocol(_)));
        assert_eq!(orch.ledger().compute_allocated(), 30);
        assert_eq!(t.pipeline(P1).unwrap().stage(), Stage::Uninitialized);

        let err = orch.admit_and_init_pipeline(&mut t, P1).unwrap_err();
        assert!(matches!(err, TopologyError::InvalidStage { .. }));

        orch.teardown_pipeline(&mut t, P1).unwrap();
        assert!(orch.ledger().is_idle());
    }

    #[test]
    fn fixup_applied_before_instantiate() {
        let (mut orch, mut t, w) = setup(16, 100);
        t.module_mut(w[0]).unwrap().fixup = AttrSet::of(&[FormatAttr::Rate, FormatAttr::Channels]);
        orch.update_stream_params(
            &mut t,
            P1,
            StreamParams::new(Direction::Playback, 96000, 4, SampleFormat::S32Le),
        )
        .unwrap();
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        let m = t.module(w[0]).unwrap();
        assert_eq!(m.in_fmt, AudioFormat::new(96000, 4, 16));
        assert_eq!(m.ibs, 96 * 4 * 2);
        assert_eq!(t.module(w[1]).unwrap().in_fmt, AudioFormat::new(48000, 2, 16));
    }

    #[test]
    fn bind_requires_initialized_modules() {
        let (mut orch, mut t, _) = setup(16, 100);
        let err = orch.bind_pipeline(&mut t, P1).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::InvalidStage {
                operation: "bind",
                ..
            }
        ));
        assert!(orch.protocol().calls.is_empty());
    }

    #[test]
    fn module_states_follow_links() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        assert_eq!(t.module(w[0]).unwrap().state(), ModuleState::InitDone);
        orch.bind_pipeline(&mut t, P1).unwrap();
        assert!(w
            .iter()
            .all(|&id| t.module(id).unwrap().state() == ModuleState::BindDone));
        orch.disconnect_pair(&mut t, w[1], w[2]).unwrap();
        assert_eq!(t.module(w[1]).unwrap().state(), ModuleState::BindDone);
        assert_eq!(t.module(w[2]).unwrap().state(), ModuleState::InitDone);
        assert_eq!(t.pipeline(P1).unwrap().stage(), Stage::Unbound);
    }

    #[test]
    fn disconnect_rejects_non_adjacent_pair() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        let err = orch.disconnect_pair(&mut t, w[0], w[2]).unwrap_err();
        assert!(matches!(err, TopologyError::NotAdjacent { .. }));
    }

    #[test]
    fn rebind_after_disconnect_only_binds_missing_pair() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        orch.disconnect_pair(&mut t, w[0], w[1]).unwrap();
        orch.protocol_mut().clear_calls();
        orch.bind_pipeline(&mut t, P1).unwrap();
        assert_eq!(
            orch.protocol().binds(),
            vec![(ModuleId::new(1, 0), ModuleId::new(2, 0))]
        );
    }

    #[test]
    fn create_failure_returns_memory() {
        let (mut orch, mut t, _) = setup(16, 100);
        orch.protocol_mut().fail_on(DspCall::Create(P1), -12);
        let err = orch.admit_and_init_pipeline(&mut t, P1).unwrap_err();
        assert!(matches!(err, TopologyError::Protocol(ref e) if e.op == ProtocolOp::CreatePipeline));
        assert!(orch.ledger().is_idle());
        assert!(!t.pipeline(P1).unwrap().is_created());

        orch.protocol_mut().clear_failures();
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        assert_eq!(orch.ledger().memory_allocated(), 4);
    }

    #[test]
    fn failed_stop_aborts_disconnect() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        orch.protocol_mut().clear_calls();
        orch.protocol_mut().fail_on(DspCall::Stop(P1), -5);

        let err = orch.disconnect_pair(&mut t, w[1], w[2]).unwrap_err();
        assert!(matches!(err, TopologyError::Protocol(ref e) if e.op == ProtocolOp::StopPipeline));
        assert!(orch.protocol().unbinds().is_empty());
        let pipe = t.pipeline(P1).unwrap();
        assert_eq!(pipe.stage(), Stage::Bound);
        assert_eq!(pipe.bound_pairs().count(), 2);
    }

    #[test]
    fn failed_unbind_still_marks_stage_from_links() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        orch.disconnect_pair(&mut t, w[0], w[1]).unwrap();
        orch.protocol_mut()
            .fail_on(DspCall::Unbind(ModuleId::new(2, 0), ModuleId::new(3, 0)), -5);

        assert!(orch.disconnect_pair(&mut t, w[1], w[2]).is_err());
        let pipe = t.pipeline(P1).unwrap();
        assert_eq!(pipe.stage(), Stage::Unbound);
        assert_eq!(pipe.bound_pairs().collect::<Vec<_>>(), vec![(w[1], w[2])]);

        orch.protocol_mut().clear_failures();
        orch.bind_pipeline(&mut t, P1).unwrap();
        assert_eq!(t.pipeline(P1).unwrap().bound_pairs().count(), 2);
    }

    #[test]
    fn start_and_pause() {
        let (mut orch, mut t, _) = setup(16, 100);
        assert!(orch.start_pipeline(&mut t, P1).is_err());
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        orch.start_pipeline(&mut t, P1).unwrap();
        assert_eq!(t.pipeline(P1).unwrap().state(), PipeState::Running);
        orch.pause_pipeline(&mut t, P1).unwrap();
        assert_eq!(t.pipeline(P1).unwrap().state(), PipeState::Paused);
    }

    #[test]
    fn teardown_resets_pipeline() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        orch.bind_pipeline(&mut t, P1).unwrap();
        orch.teardown_pipeline(&mut t, P1).unwrap();
        let pipe = t.pipeline(P1).unwrap();
        assert_eq!(pipe.stage(), Stage::Uninitialized);
        assert_eq!(pipe.state(), PipeState::Deleted);
        assert!(!pipe.is_created());
        assert_eq!(pipe.bound_pairs().count(), 0);
        assert!(w.iter().all(|&id| t.module(id).unwrap().state() == ModuleState::Uninit));
        assert!(orch.protocol().instantiated.is_empty());

        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        assert_eq!(orch.ledger().memory_allocated(), 4);
    }

    #[test]
    fn remove_pipeline_releases_then_drops() {
        let (mut orch, mut t, w) = setup(16, 100);
        orch.admit_and_init_pipeline(&mut t, P1).unwrap();
        let removed = orch.remove_pipeline(&mut t, P1).unwrap();
        assert_eq!(removed.id, P1);
        assert!(orch.ledger().is_idle());
        assert!(t.pipeline(P1).is_err());
        assert!(t.widget(w[0]).is_err());
    }

    #[test]
    fn control_plane_serializes_access() {
        let (orch, t, _) = setup(16, 100);
        let plane = ControlPlane::new(orch, t);
        plane
            .with(|orch, t| orch.admit_and_init_pipeline(t, P1))
            .unwrap();
        assert_eq!(plane.lock().orchestrator.ledger().memory_allocated(), 4);
        let state = plane.into_inner();
        assert_eq!(state.topology.pipeline(P1).unwrap().stage(), Stage::ModulesInitialized);
    }
}
