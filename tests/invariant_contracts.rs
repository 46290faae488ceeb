//! Contract tests for control-plane invariant signaling.
//!
//! Each test drives a deterministic lifecycle and then checks that the
//! invariants guarding it were actually asserted along the way.

use auxide_tplg::buffer::ModuleType;
use auxide_tplg::dsl::TopologyBuilder;
use auxide_tplg::format::AudioFormat;
use auxide_tplg::harness::RecordingDsp;
use auxide_tplg::invariant_ppt::{
    contract_test, BIND_ADJACENT, LEDGER_COMPUTE_BOUND, LEDGER_MEMORY_BOUND, LEDGER_RELEASE_EXACT,
    MODULE_OWNER_PRESENT, TEARDOWN_RELEASES_ALL,
};
use auxide_tplg::ledger::ResourceLedger;
use auxide_tplg::topology::{ConnType, Module, ModuleId, Pipeline, PipelineId, Topology, WidgetKind};
use auxide_tplg::Orchestrator;

const P1: PipelineId = PipelineId(1);

/// host -> cpr -> gain -> mix, one front-end pipeline.
fn create_chain() -> Topology {
    let fmt = AudioFormat::new(48000, 2, 32);
    let module = |n: u16, t: ModuleType| Module::new(ModuleId::new(n, 0), t, P1, fmt, fmt).with_compute_cost(25);
    let mut b = TopologyBuilder::new();
    b.pipeline(Pipeline::new(P1, ConnType::FrontEnd, 8)).unwrap();
    b.widget("host", WidgetKind::AifIn).unwrap();
    b.module("cpr", WidgetKind::Pga, module(1, ModuleType::Copier)).unwrap();
    b.module("gain", WidgetKind::Pga, module(2, ModuleType::Algorithm)).unwrap();
    b.module("mix", WidgetKind::Mixer, module(3, ModuleType::Mixer)).unwrap();
    b.chain(&["host", "cpr", "gain", "mix"]).unwrap();
    b.entry(P1, "host");
    b.build().unwrap()
}

#[test]
fn admission_asserts_ledger_bounds() {
    let mut t = create_chain();
    let mut orch = Orchestrator::new(ResourceLedger::new(32, 1000), RecordingDsp::new());
    orch.admit_and_init_pipeline(&mut t, P1).unwrap();
    contract_test(
        "admission",
        &[MODULE_OWNER_PRESENT, LEDGER_MEMORY_BOUND, LEDGER_COMPUTE_BOUND],
    );
}

#[test]
fn bind_asserts_adjacency() {
    let mut t = create_chain();
    let mut orch = Orchestrator::new(ResourceLedger::new(32, 1000), RecordingDsp::new());
    orch.admit_and_init_pipeline(&mut t, P1).unwrap();
    orch.bind_pipeline(&mut t, P1).unwrap();
    contract_test("bind", &[BIND_ADJACENT]);
}

#[test]
fn teardown_asserts_exact_release() {
    let mut t = create_chain();
    let mut orch = Orchestrator::new(ResourceLedger::new(32, 1000), RecordingDsp::new());
    orch.admit_and_init_pipeline(&mut t, P1).unwrap();
    orch.bind_pipeline(&mut t, P1).unwrap();
    orch.teardown_pipeline(&mut t, P1).unwrap();
    assert!(orch.ledger().is_idle());
    contract_test("teardown", &[LEDGER_RELEASE_EXACT, TEARDOWN_RELEASES_ALL, BIND_ADJACENT]);
}
