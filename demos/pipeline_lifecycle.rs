use auxide_tplg::buffer::ModuleType;
use auxide_tplg::dsl::TopologyBuilder;
use auxide_tplg::format::{AttrSet, AudioFormat, Direction, FormatAttr, SampleFormat, StreamParams};
use auxide_tplg::harness::RecordingDsp;
use auxide_tplg::topology::{ConnType, Module, ModuleId, Pipeline, PipelineId, WidgetKind};
use auxide_tplg::{DspConfig, Orchestrator, PowerEvent};

const CONFIG: &str = r#"
[resources]
max_memory_pages = 16
max_compute = 100
"#;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // pcm0 -> copier -> src -> mixer, one front-end playback pipeline
    let pipe = PipelineId(1);
    let fmt = AudioFormat::new(48000, 2, 32);
    let mut b = TopologyBuilder::new();
    b.pipeline(Pipeline::new(pipe, ConnType::FrontEnd, 4)).unwrap();
    b.widget("pcm0", WidgetKind::AifIn).unwrap();
    b.module(
        "copier",
        WidgetKind::Pga,
        Module::new(ModuleId::new(1, 0), ModuleType::Copier, pipe, fmt, fmt)
            .with_fixup(AttrSet::ALL)
            .with_compute_cost(20),
    )
    .unwrap();
    b.module(
        "src",
        WidgetKind::Effect,
        Module::new(ModuleId::new(2, 0), ModuleType::SampleRateConverter, pipe, fmt, fmt)
            .with_fixup(AttrSet::ALL)
            .with_converter(AttrSet::of(&[FormatAttr::Rate]))
            .with_compute_cost(40),
    )
    .unwrap();
    b.module(
        "mixer",
        WidgetKind::Mixer,
        Module::new(ModuleId::new(3, 0), ModuleType::Mixer, pipe, fmt, fmt).with_compute_cost(10),
    )
    .unwrap();
    b.chain(&["pcm0", "copier", "src", "mixer"]).unwrap();
    b.entry(pipe, "pcm0");
    let mut topology = b.build().unwrap();

    let config = DspConfig::from_toml_str(CONFIG).unwrap();
    let mut orch = Orchestrator::from_config(&config, RecordingDsp::new());
    orch.update_stream_params(
        &mut topology,
        pipe,
        StreamParams::new(Direction::Playback, 16000, 2, SampleFormat::S16Le),
    )
    .unwrap();

    let copier = topology.find_widget("copier").unwrap();
    orch.handle_power_event(&mut topology, copier, PowerEvent::PreUp).unwrap();
    orch.handle_power_event(&mut topology, copier, PowerEvent::PostUp).unwrap();

    println!(
        "running: {} of {} pages, {} of {} mcps",
        orch.ledger().memory_allocated(),
        orch.ledger().memory_max(),
        orch.ledger().compute_allocated(),
        orch.ledger().compute_max()
    );
    for &w in topology.pipeline(pipe).unwrap().modules() {
        let m = topology.module(w).unwrap();
        println!("  {} {:?}: in {:?} out {:?} ibs {} obs {}", m.id, m.module_type, m.in_fmt, m.out_fmt, m.ibs, m.obs);
    }

    orch.handle_power_event(&mut topology, copier, PowerEvent::PreDown).unwrap();
    orch.handle_power_event(&mut topology, copier, PowerEvent::PostDown).unwrap();

    println!("DSP traffic:");
    for call in &orch.protocol().calls {
        println!("  {:?}", call);
    }
    println!("ledger idle after teardown: {}", orch.ledger().is_idle());
}
