//! Topology arena: widgets, signal paths, DSP modules and pipelines.
//!
//! Widgets live in an index-addressed arena. A module is the DSP payload of a
//! widget and names its owning pipeline by id (lookup only). A pipeline owns
//! the ordered list of its member widgets, filled by [`Topology::discover`].

#![forbid(unsafe_code)]

use crate::buffer::{update_buffer_sizes, ModuleType};
use crate::error::TopologyError;
use crate::format::{AttrSet, AudioFormat, Direction, StreamParams};
use crate::invariant_ppt::{assert_invariant, MODULE_OWNER_PRESENT};
use std::collections::BTreeMap;

/// Topology-declared pipeline identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineId(pub u32);

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a widget in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(pub usize);

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Index of a signal path in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(pub usize);

/// Firmware module identity: module type id plus instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    /// Firmware module id.
    pub module_id: u16,
    /// Instance of that module.
    pub instance_id: u16,
}

impl ModuleId {
    /// Create a module id.
    pub const fn new(module_id: u16, instance_id: u16) -> Self {
        Self {
            module_id,
            instance_id,
        }
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.module_id, self.instance_id)
    }
}

/// Role of a widget in the routing graph.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    /// Host-facing input stream endpoint.
    AifIn,
    /// Host-facing output stream endpoint.
    AifOut,
    /// Hardware DAI input.
    DaiIn,
    /// Hardware DAI output.
    DaiOut,
    /// DAI-to-DAI link.
    DaiLink,
    /// Routing switch.
    Switch,
    /// Mixer.
    Mixer,
    /// Programmable gain.
    Pga,
    /// Multiplexer.
    Mux,
    /// Demultiplexer.
    Demux,
    /// Effect.
    Effect,
}

impl WidgetKind {
    /// True for kinds the DSP model represents as modules. Links, adapters and
    /// switches are routing-only.
    pub const fn is_dsp(self) -> bool {
        matches!(
            self,
            WidgetKind::Mixer
                | WidgetKind::Pga
                | WidgetKind::Mux
                | WidgetKind::Demux
                | WidgetKind::Effect
        )
    }
}

/// Host-side lifecycle of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Not instantiated on the DSP.
    Uninit,
    /// Instantiated, no bound link.
    InitDone,
    /// Instantiated and bound to at least one neighbour.
    BindDone,
}

/// A DSP processing module.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Firmware identity.
    pub id: ModuleId,
    /// Module type.
    pub module_type: ModuleType,
    /// Input format.
    pub in_fmt: AudioFormat,
    /// Output format.
    pub out_fmt: AudioFormat,
    /// Attributes the pipeline may overwrite.
    pub fixup: AttrSet,
    /// Attributes this module converts between input and output.
    pub converter: AttrSet,
    /// Compute cost estimate (mcps).
    pub compute_cost: u32,
    /// Input buffer size in bytes per ms.
    pub ibs: u32,
    /// Output buffer size in bytes per ms.
    pub obs: u32,
    /// Owning pipeline.
    pub pipeline: PipelineId,
    pub(crate) state: ModuleState,
}

impl Module {
    /// Create a module with empty masks, zero cost and buffer sizes derived
    /// from the given formats.
    pub fn new(
        id: ModuleId,
        module_type: ModuleType,
        pipeline: PipelineId,
        in_fmt: AudioFormat,
        out_fmt: AudioFormat,
    ) -> Self {
        let mut module = Self {
            id,
            module_type,
            in_fmt,
            out_fmt,
            fixup: AttrSet::EMPTY,
            converter: AttrSet::EMPTY,
            compute_cost: 0,
            ibs: 0,
            obs: 0,
            pipeline,
            state: ModuleState::Uninit,
        };
        update_buffer_sizes(&mut module);
        module
    }

    /// Set the fixup mask.
    pub fn with_fixup(mut self, fixup: AttrSet) -> Self {
        self.fixup = fixup;
        self
    }

    /// Set the converter mask.
    pub fn with_converter(mut self, converter: AttrSet) -> Self {
        self.converter = converter;
        self
    }

    /// Set the compute cost estimate.
    pub fn with_compute_cost(mut self, cost: u32) -> Self {
        self.compute_cost = cost;
        self
    }

    /// Host-side lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.state
    }
}

/// A node of the routing graph.
#[derive(Debug, Clone)]
pub struct Widget {
    /// Topology name.
    pub name: String,
    /// Routing role.
    pub kind: WidgetKind,
    /// DSP payload, for module widgets.
    pub module: Option<Module>,
}

/// A signal-flow edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// Upstream widget.
    pub source: WidgetId,
    /// Downstream widget.
    pub sink: WidgetId,
    /// Whether the route is currently connected.
    pub connected: bool,
}

/// Which endpoint asserts a pipeline's stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnType {
    /// Host-facing pipeline.
    FrontEnd,
    /// Hardware-facing pipeline.
    BackEnd,
    /// Pipeline spanning host to hardware.
    FrontEndToBackEnd,
}

/// DSP-side pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeState {
    /// Not created on the DSP.
    Inactive,
    /// Created, not running.
    Paused,
    /// Running.
    Running,
    /// Torn down.
    Deleted,
}

/// Host-side sequencing stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Nothing reserved or instantiated.
    Uninitialized,
    /// All modules instantiated.
    ModulesInitialized,
    /// Every adjacent pair bound.
    Bound,
    /// Some adjacent pair was disconnected after binding.
    Unbound,
}

/// An ordered group of modules carrying one stream path.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline id.
    pub id: PipelineId,
    /// Which endpoint drives the stream parameters.
    pub conn_type: ConnType,
    /// Memory pages the pipeline needs on the DSP.
    pub memory_pages: u32,
    /// Scheduling priority.
    pub priority: u8,
    /// Low-power mode.
    pub lp_mode: bool,
    /// Stream parameters from the last hardware negotiation.
    pub params: Option<StreamParams>,
    pub(crate) modules: Vec<WidgetId>,
    pub(crate) links: Vec<bool>,
    pub(crate) state: PipeState,
    pub(crate) stage: Stage,
    pub(crate) created: bool,
}

impl Pipeline {
    /// Create an inactive pipeline with no modules.
    pub fn new(id: PipelineId, conn_type: ConnType, memory_pages: u32) -> Self {
        Self {
            id,
            conn_type,
            memory_pages,
            priority: 0,
            lp_mode: false,
            params: None,
            modules: Vec::new(),
            links: Vec::new(),
            state: PipeState::Inactive,
            stage: Stage::Uninitialized,
            created: false,
        }
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set low-power mode.
    pub fn with_lp_mode(mut self, lp_mode: bool) -> Self {
        self.lp_mode = lp_mode;
        self
    }

    /// Member widgets in discovery order.
    pub fn modules(&self) -> &[WidgetId] {
        &self.modules
    }

    /// DSP-side state.
    pub fn state(&self) -> PipeState {
        self.state
    }

    /// Host-side stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True once `create_pipeline` succeeded and until it is deleted.
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Front-end pipelines take their formats from the host stream.
    pub fn is_front_end(&self) -> bool {
        self.conn_type == ConnType::FrontEnd
    }

    /// Adjacent pairs currently bound, in discovery order.
    pub fn bound_pairs(&self) -> impl Iterator<Item = (WidgetId, WidgetId)> + '_ {
        self.links
            .iter()
            .enumerate()
            .filter(|(_, bound)| **bound)
            .map(|(i, _)| (self.modules[i], self.modules[i + 1]))
    }

    pub(crate) fn set_modules(&mut self, modules: Vec<WidgetId>) {
        self.links = vec![false; modules.len().saturating_sub(1)];
        self.modules = modules;
    }

    /// Index of the pair `(src, dst)` if they are adjacent in discovery order.
    pub(crate) fn pair_index(&self, src: WidgetId, dst: WidgetId) -> Option<usize> {
        self.modules
            .windows(2)
            .position(|pair| pair[0] == src && pair[1] == dst)
    }
}

/// The routing graph plus its pipelines.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    widgets: Vec<Option<Widget>>,
    paths: Vec<Option<Path>>,
    pipelines: BTreeMap<PipelineId, Pipeline>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline.
    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<PipelineId, TopologyError> {
        let id = pipeline.id;
        if self.pipelines.contains_key(&id) {
            return Err(TopologyError::DuplicatePipeline(id));
        }
        self.pipelines.insert(id, pipeline);
        Ok(id)
    }

    /// Add a routing-only widget.
    pub fn add_widget(&mut self, name: impl Into<String>, kind: WidgetKind) -> WidgetId {
        let id = WidgetId(self.widgets.len());
        self.widgets.push(Some(Widget {
            name: name.into(),
            kind,
            module: None,
        }));
        id
    }

    /// Add a module widget. Its pipeline must already exist.
    pub fn add_module(
        &mut self,
        name: impl Into<String>,
        kind: WidgetKind,
        module: Module,
    ) -> Result<WidgetId, TopologyError> {
        if !self.pipelines.contains_key(&module.pipeline) {
            return Err(TopologyError::UnknownPipeline(module.pipeline));
        }
        let id = WidgetId(self.widgets.len());
        self.widgets.push(Some(Widget {
            name: name.into(),
            kind,
            module: Some(module),
        }));
        Ok(id)
    }

    /// Add a connected path from `source` to `sink`.
    pub fn connect(&mut self, source: WidgetId, sink: WidgetId) -> Result<PathId, TopologyError> {
        self.widget(source)?;
        self.widget(sink)?;
        let id = PathId(self.paths.len());
        self.paths.push(Some(Path {
            source,
            sink,
            connected: true,
        }));
        Ok(id)
    }

    /// Mark a path connected or disconnected. Returns false for unknown paths.
    pub fn set_connected(&mut self, path: PathId, connected: bool) -> bool {
        match self.paths.get_mut(path.0).and_then(|p| p.as_mut()) {
            Some(p) => {
                p.connected = connected;
                true
            }
            None => false,
        }
    }

    /// Look up a path.
    pub fn path(&self, path: PathId) -> Option<&Path> {
        self.paths.get(path.0).and_then(|p| p.as_ref())
    }

    /// Look up a widget.
    pub fn widget(&self, id: WidgetId) -> Result<&Widget, TopologyError> {
        self.widgets
            .get(id.0)
            .and_then(|w| w.as_ref())
            .ok_or(TopologyError::UnknownWidget(id))
    }

    /// Find a widget by name.
    pub fn find_widget(&self, name: &str) -> Option<WidgetId> {
        self.widgets
            .iter()
            .position(|w| w.as_ref().is_some_and(|w| w.name == name))
            .map(WidgetId)
    }

    /// Module payload of a widget.
    pub fn module(&self, id: WidgetId) -> Result<&Module, TopologyError> {
        self.widget(id)?
            .module
            .as_ref()
            .ok_or(TopologyError::NotAModule(id))
    }

    /// Mutable module payload of a widget.
    pub fn module_mut(&mut self, id: WidgetId) -> Result<&mut Module, TopologyError> {
        self.widgets
            .get_mut(id.0)
            .and_then(|w| w.as_mut())
            .ok_or(TopologyError::UnknownWidget(id))?
            .module
            .as_mut()
            .ok_or(TopologyError::NotAModule(id))
    }

    /// Look up a pipeline.
    pub fn pipeline(&self, id: PipelineId) -> Result<&Pipeline, TopologyError> {
        self.pipelines.get(&id).ok_or(TopologyError::UnknownPipeline(id))
    }

    /// Mutable pipeline lookup.
    pub fn pipeline_mut(&mut self, id: PipelineId) -> Result<&mut Pipeline, TopologyError> {
        self.pipelines.get_mut(&id).ok_or(TopologyError::UnknownPipeline(id))
    }

    /// All pipelines, by id.
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    /// Pipeline owning the module at `widget`.
    pub fn owning_pipeline(&self, widget: WidgetId) -> Result<&Pipeline, TopologyError> {
        let owner = self.module(widget)?.pipeline;
        self.pipeline(owner)
    }

    /// Module widgets owned by `pipeline`, listed or not.
    pub fn owned_modules(&self, pipeline: PipelineId) -> impl Iterator<Item = WidgetId> + '_ {
        self.widgets.iter().enumerate().filter_map(move |(i, w)| {
            w.as_ref()
                .and_then(|w| w.module.as_ref())
                .filter(|m| m.pipeline == pipeline)
                .map(|_| WidgetId(i))
        })
    }

    fn is_member(&self, id: WidgetId, pipeline: PipelineId) -> bool {
        match self.widgets.get(id.0).and_then(|w| w.as_ref()) {
            Some(w) => {
                w.kind.is_dsp() && w.module.as_ref().is_some_and(|m| m.pipeline == pipeline)
            }
            None => false,
        }
    }

    /// Modules of `pipeline` reachable from `start`, in depth-first pre-order.
    ///
    /// `start` heads the list when it is itself a module of `pipeline`. Only
    /// connected paths are followed, in insertion order. Routing-only widgets
    /// and modules of other pipelines are not listed and not walked through.
    pub fn discover(&self, start: WidgetId, pipeline: PipelineId) -> Result<Vec<WidgetId>, TopologyError> {
        self.widget(start)?;
        let mut list = Vec::new();
        if self.is_member(start, pipeline) {
            push_node(&mut list, start)?;
        }
        self.walk(start, pipeline, &mut list)?;
        tracing::debug!(%pipeline, %start, modules = list.len(), "pipeline discovered");
        Ok(list)
    }

    fn walk(&self, current: WidgetId, pipeline: PipelineId, list: &mut Vec<WidgetId>) -> Result<(), TopologyError> {
        for path in self.paths.iter().flatten() {
            if path.source != current || !path.connected {
                continue;
            }
            if !self.is_member(path.sink, pipeline) || list.contains(&path.sink) {
                continue;
            }
            push_node(list, path.sink)?;
            self.walk(path.sink, pipeline, list)?;
        }
        Ok(())
    }

    /// Replace the pipeline's module list with the discovery result from `start`.
    ///
    /// Only an uninitialized pipeline can be repopulated: the list and its
    /// link flags are what teardown unbinds and releases.
    pub fn populate_pipeline(&mut self, start: WidgetId, pipeline: PipelineId) -> Result<&[WidgetId], TopologyError> {
        let pipe = self.pipeline(pipeline)?;
        if pipe.stage != Stage::Uninitialized || pipe.created {
            return Err(TopologyError::InvalidStage {
                pipeline,
                stage: pipe.stage,
                operation: "populate",
            });
        }
        let modules = self.discover(start, pipeline)?;
        for &id in &modules {
            let owner = self.module(id)?.pipeline;
            assert_invariant(
                MODULE_OWNER_PRESENT,
                self.pipelines.contains_key(&owner),
                "module reachable from the graph has an owning pipeline",
                Some("populate_pipeline"),
            );
        }
        let pipe = self.pipeline_mut(pipeline)?;
        pipe.set_modules(modules);
        Ok(pipe.modules.as_slice())
    }

    /// The copier at the host end of a front-end pipeline: the first module
    /// for playback, the last for capture.
    pub fn front_end_module(&self, pipeline: PipelineId, direction: Direction) -> Result<Option<WidgetId>, TopologyError> {
        let pipe = self.pipeline(pipeline)?;
        if pipe.conn_type == ConnType::BackEnd {
            return Ok(None);
        }
        let candidate = match direction {
            Direction::Playback => pipe.modules.first(),
            Direction::Capture => pipe.modules.last(),
        };
        Ok(candidate.copied().filter(|&id| {
            self.module(id)
                .is_ok_and(|m| m.module_type == ModuleType::Copier)
        }))
    }

    /// Remove a pipeline with all of its module widgets and their paths.
    ///
    /// Callers release the pipeline's DSP resources first.
    pub fn remove_pipeline(&mut self, id: PipelineId) -> Result<Pipeline, TopologyError> {
        let pipeline = self.pipelines.remove(&id).ok_or(TopologyError::UnknownPipeline(id))?;
        let mut removed = Vec::new();
        for (i, slot) in self.widgets.iter_mut().enumerate() {
            let owned = slot
                .as_ref()
                .and_then(|w| w.module.as_ref())
                .is_some_and(|m| m.pipeline == id);
            if owned {
                *slot = None;
                removed.push(WidgetId(i));
            }
        }
        for slot in self.paths.iter_mut() {
            let dangling = slot
                .as_ref()
                .is_some_and(|p| removed.contains(&p.source) || removed.contains(&p.sink));
            if dangling {
                *slot = None;
            }
        }
        tracing::debug!(pipeline = %id, widgets = removed.len(), "pipeline removed from topology");
        Ok(pipeline)
    }
}

fn push_node(list: &mut Vec<WidgetId>, id: WidgetId) -> Result<(), TopologyError> {
    list.try_reserve(1)?;
    list.push(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FormatAttr;

    fn fmt() -> AudioFormat {
        AudioFormat::new(48000, 2, 16)
    }

    fn module(pipeline: u32, module_id: u16) -> Module {
        Module::new(
            ModuleId::new(module_id, 0),
            ModuleType::Mixer,
            PipelineId(pipeline),
            fmt(),
            fmt(),
        )
    }

    fn chain() -> (Topology, Vec<WidgetId>) {
        let mut t = Topology::new();
        t.add_pipeline(Pipeline::new(PipelineId(1), ConnType::FrontEnd, 4)).unwrap();
        let aif = t.add_widget("pcm0 in", WidgetKind::AifIn);
        let a = t.add_module("cpr 1", WidgetKind::Pga, module(1, 1)).unwrap();
        let b = t.add_module("src 1", WidgetKind::Effect, module(1, 2)).unwrap();
        let c = t.add_module("mix 1", WidgetKind::Mixer, module(1, 3)).unwrap();
        t.connect(aif, a).unwrap();
        t.connect(a, b).unwrap();
        t.connect(b, c).unwrap();
        (t, vec![aif, a, b, c])
    }

    #[test]
    fn discover_from_endpoint_skips_routing_widget() {
        let (t, w) = chain();
        assert_eq!(t.discover(w[0], PipelineId(1)).unwrap(), vec![w[1], w[2], w[3]]);
    }

    #[test]
    fn discover_from_module_includes_start() {
        let (t, w) = chain();
        assert_eq!(t.discover(w[1], PipelineId(1)).unwrap(), vec![w[1], w[2], w[3]]);
    }

    #[test]
    fn disconnected_path_stops_walk() {
        let (mut t, w) = chain();
        assert!(t.set_connected(PathId(2), false));
        assert_eq!(t.discover(w[1], PipelineId(1)).unwrap(), vec![w[1], w[2]]);
    }

    #[test]
    fn other_pipeline_is_not_entered() {
        let (mut t, w) = chain();
        t.add_pipeline(Pipeline::new(PipelineId(2), ConnType::BackEnd, 2)).unwrap();
        let d = t.add_module("cpr 2", WidgetKind::Pga, module(2, 4)).unwrap();
        t.connect(w[3], d).unwrap();
        assert_eq!(t.discover(w[1], PipelineId(1)).unwrap(), vec![w[1], w[2], w[3]]);
        assert_eq!(t.discover(w[3], PipelineId(2)).unwrap(), vec![d]);
    }

    #[test]
    fn switch_is_not_walked_through() {
        let (mut t, w) = chain();
        let sw = t.add_widget("sw", WidgetKind::Switch);
        let e = t.add_module("algo", WidgetKind::Effect, module(1, 5)).unwrap();
        t.connect(w[3], sw).unwrap();
        t.connect(sw, e).unwrap();
        assert_eq!(t.discover(w[1], PipelineId(1)).unwrap(), vec![w[1], w[2], w[3]]);
    }

    #[test]
    fn fan_out_is_pre_order_by_path_order() {
        let mut t = Topology::new();
        t.add_pipeline(Pipeline::new(PipelineId(1), ConnType::FrontEnd, 4)).unwrap();
        let a = t.add_module("a", WidgetKind::Mixer, module(1, 1)).unwrap();
        let b = t.add_module("b", WidgetKind::Mixer, module(1, 2)).unwrap();
        let c = t.add_module("c", WidgetKind::Mixer, module(1, 3)).unwrap();
        let d = t.add_module("d", WidgetKind::Mixer, module(1, 4)).unwrap();
        t.connect(a, c).unwrap();
        t.connect(a, b).unwrap();
        t.connect(c, d).unwrap();
        t.connect(b, d).unwrap();
        assert_eq!(t.discover(a, PipelineId(1)).unwrap(), vec![a, c, d, b]);
    }

    #[test]
    fn cycle_terminates() {
        let (mut t, w) = chain();
        t.connect(w[3], w[1]).unwrap();
        assert_eq!(t.discover(w[1], PipelineId(1)).unwrap(), vec![w[1], w[2], w[3]]);
    }

    #[test]
    fn module_requires_pipeline() {
        let mut t = Topology::new();
        let err = t.add_module("orphan", WidgetKind::Mixer, module(7, 1)).unwrap_err();
        assert!(matches!(err, TopologyError::UnknownPipeline(PipelineId(7))));
    }

    #[test]
    fn duplicate_pipeline_rejected() {
        let (mut t, _) = chain();
        let err = t
            .add_pipeline(Pipeline::new(PipelineId(1), ConnType::BackEnd, 1))
            .unwrap_err();
        assert!(matches!(err, TopologyError::DuplicatePipeline(PipelineId(1))));
    }

    #[test]
    fn populate_resets_links() {
        let (mut t, w) = chain();
        let modules = t.populate_pipeline(w[0], PipelineId(1)).unwrap().to_vec();
        assert_eq!(modules, vec![w[1], w[2], w[3]]);
        let pipe = t.pipeline(PipelineId(1)).unwrap();
        assert_eq!(pipe.links, vec![false, false]);
        assert_eq!(pipe.pair_index(w[2], w[3]), Some(1));
        assert_eq!(pipe.pair_index(w[1], w[3]), None);
    }

    #[test]
    fn populate_refused_once_initialized() {
        let (mut t, w) = chain();
        t.populate_pipeline(w[0], PipelineId(1)).unwrap();
        t.pipeline_mut(PipelineId(1)).unwrap().stage = Stage::Bound;
        t.pipeline_mut(PipelineId(1)).unwrap().created = true;
        assert!(t.set_connected(PathId(2), false));
        let err = t.populate_pipeline(w[0], PipelineId(1)).unwrap_err();
        assert!(matches!(
            err,
            TopologyError::InvalidStage {
                stage: Stage::Bound,
                operation: "populate",
                ..
            }
        ));
        assert_eq!(t.pipeline(PipelineId(1)).unwrap().modules(), &[w[1], w[2], w[3]]);

        // Created but failed before any stage change still holds DSP state.
        t.pipeline_mut(PipelineId(1)).unwrap().stage = Stage::Uninitialized;
        assert!(t.populate_pipeline(w[0], PipelineId(1)).is_err());
    }

    #[test]
    fn owned_modules_include_unlisted() {
        let (mut t, w) = chain();
        t.set_connected(PathId(2), false);
        t.populate_pipeline(w[0], PipelineId(1)).unwrap();
        assert_eq!(t.pipeline(PipelineId(1)).unwrap().modules(), &[w[1], w[2]]);
        assert_eq!(t.owned_modules(PipelineId(1)).collect::<Vec<_>>(), vec![w[1], w[2], w[3]]);
    }

    #[test]
    fn front_end_copier_by_direction() {
        let mut t = Topology::new();
        t.add_pipeline(Pipeline::new(PipelineId(1), ConnType::FrontEnd, 4)).unwrap();
        let cpr = Module::new(ModuleId::new(1, 0), ModuleType::Copier, PipelineId(1), fmt(), fmt())
            .with_fixup(AttrSet::of(&[FormatAttr::Rate]));
        let a = t.add_module("cpr", WidgetKind::Pga, cpr).unwrap();
        let b = t.add_module("mix", WidgetKind::Mixer, module(1, 2)).unwrap();
        t.connect(a, b).unwrap();
        t.populate_pipeline(a, PipelineId(1)).unwrap();
        assert_eq!(t.front_end_module(PipelineId(1), Direction::Playback).unwrap(), Some(a));
        assert_eq!(t.front_end_module(PipelineId(1), Direction::Capture).unwrap(), None);
    }

    #[test]
    fn remove_pipeline_drops_widgets_and_paths() {
        let (mut t, w) = chain();
        let removed = t.remove_pipeline(PipelineId(1)).unwrap();
        assert_eq!(removed.id, PipelineId(1));
        assert!(t.widget(w[0]).is_ok());
        assert!(matches!(t.widget(w[1]), Err(TopologyError::UnknownWidget(_))));
        assert!(t.path(PathId(0)).is_none());
        assert_eq!(t.discover(w[0], PipelineId(1)).unwrap(), vec![]);
    }

    #[test]
    fn find_widget_by_name() {
        let (t, w) = chain();
        assert_eq!(t.find_widget("src 1"), Some(w[2]));
        assert_eq!(t.find_widget("nope"), None);
    }
}
