//! Buffer sizing from resolved module formats.

use crate::format::AudioFormat;
use crate::topology::Module;

/// DSP module type. Only the sample-rate converter changes buffer sizing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleType {
    /// Host or link DMA copier.
    Copier,
    /// Mixer.
    Mixer,
    /// Channel up/down mixer.
    UpDownMixer,
    /// Synchronous sample-rate converter.
    SampleRateConverter,
    /// Asynchronous sample-rate converter.
    AsyncSampleRateConverter,
    /// Generic processing algorithm.
    Algorithm,
    /// Microphone channel selector.
    MicSelect,
    /// Key-phrase buffer.
    Kpb,
}

/// Headroom for worst-case interpolation expansion in the SRC.
const SRC_BUFFER_MULTIPLIER: u32 = 5;

impl ModuleType {
    /// Buffer size multiplier for this module type.
    pub const fn buffer_multiplier(self) -> u32 {
        match self {
            ModuleType::SampleRateConverter => SRC_BUFFER_MULTIPLIER,
            _ => 1,
        }
    }
}

/// Bytes per millisecond for `format`, scaled by the module type's multiplier.
///
/// Integer arithmetic throughout: a 44.1 kHz rate counts as 44 frames per ms.
pub fn size(format: &AudioFormat, module_type: ModuleType) -> u32 {
    (format.sample_rate / 1000)
        .saturating_mul(format.channels)
        .saturating_mul(format.bit_depth >> 3)
        .saturating_mul(module_type.buffer_multiplier())
}

/// Recompute a module's input and output buffer sizes from its formats.
pub fn update_buffer_sizes(module: &mut Module) {
    module.ibs = size(&module.in_fmt, module.module_type);
    module.obs = size(&module.out_fmt, module.module_type);
}
