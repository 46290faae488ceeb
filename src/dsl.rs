//! DSL module: builder API for topologies, addressed by widget name.

use crate::error::TopologyError;
use crate::topology::{Module, PathId, Pipeline, PipelineId, Topology, WidgetId, WidgetKind};
use std::collections::HashMap;
use thiserror::Error;

/// The topology builder.
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    topology: Topology,
    names: HashMap<String, WidgetId>,
    entries: Vec<(PipelineId, String)>,
}

impl TopologyBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline.
    pub fn pipeline(&mut self, pipeline: Pipeline) -> Result<PipelineId, DslError> {
        Ok(self.topology.add_pipeline(pipeline)?)
    }

    /// Add a routing-only widget.
    pub fn widget(&mut self, name: &str, kind: WidgetKind) -> Result<WidgetId, DslError> {
        self.check_name(name)?;
        let id = self.topology.add_widget(name, kind);
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Add a module widget.
    pub fn module(&mut self, name: &str, kind: WidgetKind, module: Module) -> Result<WidgetId, DslError> {
        self.check_name(name)?;
        let id = self.topology.add_module(name, kind, module)?;
        self.names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Connect two named widgets.
    pub fn route(&mut self, source: &str, sink: &str) -> Result<PathId, DslError> {
        let source = self.lookup(source)?;
        let sink = self.lookup(sink)?;
        Ok(self.topology.connect(source, sink)?)
    }

    /// Connect a chain of named widgets in order.
    pub fn chain(&mut self, names: &[&str]) -> Result<(), DslError> {
        for pair in names.windows(2) {
            self.route(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Discover `pipeline`'s modules from the named widget at build time.
    pub fn entry(&mut self, pipeline: PipelineId, widget: &str) -> &mut Self {
        self.entries.push((pipeline, widget.to_string()));
        self
    }

    /// Build the topology, populating every pipeline with an entry.
    pub fn build(mut self) -> Result<Topology, DslError> {
        for (pipeline, name) in std::mem::take(&mut self.entries) {
            let start = self.lookup(&name)?;
            self.topology.populate_pipeline(start, pipeline)?;
        }
        Ok(self.topology)
    }

    fn lookup(&self, name: &str) -> Result<WidgetId, DslError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| DslError::MissingNode(name.to_string()))
    }

    fn check_name(&self, name: &str) -> Result<(), DslError> {
        if self.names.contains_key(name) {
            return Err(DslError::DuplicateName(name.to_string()));
        }
        Ok(())
    }
}

/// DSL-specific errors.
#[derive(Debug, Error)]
pub enum DslError {
    /// The underlying topology rejected the operation.
    #[error(transparent)]
    Topology(#[from] TopologyError),
    /// No widget with this name.
    #[error("no widget named '{0}'")]
    MissingNode(String),
    /// A widget with this name already exists.
    #[error("widget name '{0}' already used")]
    DuplicateName(String),
}
