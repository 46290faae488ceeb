//! Resource ledger: memory-page and compute admission control.
//!
//! One ledger exists per DSP context. Every grant is recorded under a
//! [`Reservation`] key so release subtracts exactly what was added, no matter
//! what other pipelines did in between.

use crate::config::DspConfig;
use crate::invariant_ppt::{
    assert_invariant, LEDGER_COMPUTE_BOUND, LEDGER_MEMORY_BOUND, LEDGER_RELEASE_EXACT,
};
use crate::topology::{PipelineId, WidgetId};
use std::collections::BTreeMap;

/// Key under which a grant is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reservation {
    /// Memory pages held by a pipeline.
    Pipeline(PipelineId),
    /// Compute budget held by a module widget.
    Module(WidgetId),
}

#[derive(Debug, Clone, Default)]
struct Counter {
    allocated: u32,
    max: u32,
}

impl Counter {
    fn available(&self) -> u32 {
        self.max.saturating_sub(self.allocated)
    }

    fn release(&mut self, amount: u32, what: &str) {
        debug_assert!(
            amount <= self.allocated,
            "{what} release of {amount} underflows allocation {}",
            self.allocated
        );
        if amount > self.allocated {
            tracing::error!(
                amount,
                allocated = self.allocated,
                "{what} release underflow, saturating at zero"
            );
        }
        self.allocated = self.allocated.saturating_sub(amount);
    }
}

/// Process-wide DSP budget accounting.
#[derive(Debug, Clone)]
pub struct ResourceLedger {
    memory: Counter,
    compute: Counter,
    grants: BTreeMap<Reservation, u32>,
}

impl ResourceLedger {
    /// Create an empty ledger with fixed platform maxima.
    pub fn new(max_memory_pages: u32, max_compute: u32) -> Self {
        Self {
            memory: Counter {
                allocated: 0,
                max: max_memory_pages,
            },
            compute: Counter {
                allocated: 0,
                max: max_compute,
            },
            grants: BTreeMap::new(),
        }
    }

    /// Create a ledger sized from configuration.
    pub fn from_config(config: &DspConfig) -> Self {
        Self::new(config.resources.max_memory_pages, config.resources.max_compute)
    }

    /// Reserve `pages` for `pipeline` if they fit. Leaves the ledger untouched
    /// on denial.
    pub fn try_reserve_memory(&mut self, pipeline: PipelineId, pages: u32) -> bool {
        if pages > self.memory.available() {
            tracing::warn!(
                %pipeline,
                pages,
                available = self.memory.available(),
                "memory admission denied"
            );
            return false;
        }
        self.memory.allocated += pages;
        *self.grants.entry(Reservation::Pipeline(pipeline)).or_insert(0) += pages;
        assert_invariant(
            LEDGER_MEMORY_BOUND,
            self.memory.allocated <= self.memory.max,
            "allocated memory pages within maximum",
            Some("try_reserve_memory"),
        );
        tracing::debug!(%pipeline, pages, allocated = self.memory.allocated, "memory reserved");
        true
    }

    /// Reserve `cost` compute for the module at `widget` if it fits. Leaves
    /// the ledger untouched on denial.
    pub fn try_reserve_compute(&mut self, widget: WidgetId, cost: u32) -> bool {
        if cost > self.compute.available() {
            tracing::warn!(
                %widget,
                cost,
                available = self.compute.available(),
                "compute admission denied"
            );
            return false;
        }
        self.compute.allocated += cost;
        *self.grants.entry(Reservation::Module(widget)).or_insert(0) += cost;
        assert_invariant(
            LEDGER_COMPUTE_BOUND,
            self.compute.allocated <= self.compute.max,
            "allocated compute within maximum",
            Some("try_reserve_compute"),
        );
        tracing::debug!(%widget, cost, allocated = self.compute.allocated, "compute reserved");
        true
    }

    /// Release the pages held by `pipeline`. Returns the amount released; zero
    /// if nothing was held.
    pub fn release_memory(&mut self, pipeline: PipelineId) -> u32 {
        let amount = self.grants.remove(&Reservation::Pipeline(pipeline)).unwrap_or(0);
        self.memory.release(amount, "memory");
        self.check_release_exact("release_memory");
        amount
    }

    /// Release the compute held by the module at `widget`. Returns the amount
    /// released; zero if nothing was held.
    pub fn release_compute(&mut self, widget: WidgetId) -> u32 {
        let amount = self.grants.remove(&Reservation::Module(widget)).unwrap_or(0);
        self.compute.release(amount, "compute");
        self.check_release_exact("release_compute");
        amount
    }

    fn check_release_exact(&self, context: &str) {
        let (mem, mcps) = self.grants.iter().fold((0u64, 0u64), |(m, c), (key, v)| match key {
            Reservation::Pipeline(_) => (m + u64::from(*v), c),
            Reservation::Module(_) => (m, c + u64::from(*v)),
        });
        assert_invariant(
            LEDGER_RELEASE_EXACT,
            mem == u64::from(self.memory.allocated) && mcps == u64::from(self.compute.allocated),
            "ledger totals match outstanding reservations",
            Some(context),
        );
    }

    /// Amount currently held under `key`.
    pub fn reserved(&self, key: Reservation) -> u32 {
        self.grants.get(&key).copied().unwrap_or(0)
    }

    /// Allocated memory pages.
    pub fn memory_allocated(&self) -> u32 {
        self.memory.allocated
    }

    /// Maximum memory pages.
    pub fn memory_max(&self) -> u32 {
        self.memory.max
    }

    /// Memory pages still available.
    pub fn memory_available(&self) -> u32 {
        self.memory.available()
    }

    /// Allocated compute budget.
    pub fn compute_allocated(&self) -> u32 {
        self.compute.allocated
    }

    /// Maximum compute budget.
    pub fn compute_max(&self) -> u32 {
        self.compute.max
    }

    /// Compute budget still available.
    pub fn compute_available(&self) -> u32 {
        self.compute.available()
    }

    /// True when nothing is allocated and no reservation is outstanding.
    pub fn is_idle(&self) -> bool {
        self.memory.allocated == 0 && self.compute.allocated == 0 && self.grants.is_empty()
    }
}
