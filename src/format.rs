//! Format resolution: propagate front-end/back-end stream parameters into a
//! module's input and output formats.

use crate::buffer::update_buffer_sizes;
use crate::topology::Module;

/// Audio format of one side of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Container bit depth.
    pub bit_depth: u32,
}

impl AudioFormat {
    /// Create a format.
    pub const fn new(sample_rate: u32, channels: u32, bit_depth: u32) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
        }
    }
}

/// A format attribute that stream parameters may overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatAttr {
    /// Sample rate.
    Rate,
    /// Channel count.
    Channels,
    /// Bit depth.
    BitDepth,
}

impl FormatAttr {
    /// Every attribute, in mask order.
    pub const ALL: [FormatAttr; 3] = [FormatAttr::Rate, FormatAttr::Channels, FormatAttr::BitDepth];

    const fn bit(self) -> u8 {
        match self {
            FormatAttr::Channels => 1 << 0,
            FormatAttr::Rate => 1 << 1,
            FormatAttr::BitDepth => 1 << 2,
        }
    }
}

/// Set over [`FormatAttr`], used for fixup and converter masks.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct AttrSet(u8);

impl AttrSet {
    /// No attributes.
    pub const EMPTY: AttrSet = AttrSet(0);
    /// Rate, channels and bit depth.
    pub const ALL: AttrSet = AttrSet(0b111);

    /// Build a set from a list of attributes.
    pub const fn of(attrs: &[FormatAttr]) -> Self {
        let mut bits = 0;
        let mut i = 0;
        while i < attrs.len() {
            bits |= attrs[i].bit();
            i += 1;
        }
        AttrSet(bits)
    }

    /// True if `attr` is in the set.
    pub const fn contains(self, attr: FormatAttr) -> bool {
        self.0 & attr.bit() != 0
    }

    /// True if the set has no attributes.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Add an attribute.
    pub fn insert(&mut self, attr: FormatAttr) {
        self.0 |= attr.bit();
    }

    /// Attributes in `self` but not in `other`.
    pub const fn difference(self, other: AttrSet) -> AttrSet {
        AttrSet(self.0 & !other.0)
    }

    /// Iterate the attributes in the set.
    pub fn iter(self) -> impl Iterator<Item = FormatAttr> {
        FormatAttr::ALL.into_iter().filter(move |a| self.contains(*a))
    }
}

impl std::fmt::Debug for AttrSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<FormatAttr> for AttrSet {
    fn from_iter<I: IntoIterator<Item = FormatAttr>>(iter: I) -> Self {
        let mut set = AttrSet::EMPTY;
        for attr in iter {
            set.insert(attr);
        }
        set
    }
}

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to hardware.
    Playback,
    /// Hardware to host.
    Capture,
}

/// PCM sample format negotiated for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little endian.
    S16Le,
    /// Signed 24-bit little endian.
    S24Le,
    /// Signed 32-bit little endian.
    S32Le,
    /// 32-bit float little endian.
    FloatLe,
}

impl SampleFormat {
    /// Sample width in bits.
    pub const fn bit_depth(self) -> u32 {
        match self {
            SampleFormat::S16Le => 16,
            SampleFormat::S24Le => 24,
            SampleFormat::S32Le | SampleFormat::FloatLe => 32,
        }
    }
}

/// Stream parameters asserted by a front-end or back-end endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    /// Playback or capture.
    pub direction: Direction,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Sample format.
    pub format: SampleFormat,
}

impl StreamParams {
    /// Create stream parameters.
    pub const fn new(direction: Direction, sample_rate: u32, channels: u32, format: SampleFormat) -> Self {
        Self {
            direction,
            sample_rate,
            channels,
            format,
        }
    }
}

/// Which side takes the full fixup mask. The other side gets the fixup mask
/// minus the module's converter mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FixupSide {
    Input,
    Output,
}

fn fixup_side(direction: Direction, is_front_end: bool) -> FixupSide {
    match (direction, is_front_end) {
        (Direction::Playback, true) => FixupSide::Input,
        (Direction::Playback, false) => FixupSide::Output,
        (Direction::Capture, true) => FixupSide::Output,
        (Direction::Capture, false) => FixupSide::Input,
    }
}

/// Overwrite the attributes selected by `mask` with the stream's values.
fn apply_mask(fmt: AudioFormat, params: &StreamParams, mask: AttrSet) -> AudioFormat {
    let mut out = fmt;
    if mask.contains(FormatAttr::Rate) {
        out.sample_rate = params.sample_rate;
    }
    if mask.contains(FormatAttr::Channels) {
        out.channels = params.channels;
    }
    if mask.contains(FormatAttr::BitDepth) {
        out.bit_depth = params.format.bit_depth();
    }
    out
}

/// Compute a module's `(input, output)` formats for the given stream.
///
/// Pure: the module is not modified. A module with an empty fixup mask gets
/// its configured formats back unchanged.
pub fn resolve(module: &Module, params: &StreamParams, is_front_end: bool) -> (AudioFormat, AudioFormat) {
    if module.fixup.is_empty() {
        return (module.in_fmt, module.out_fmt);
    }

    let full = module.fixup;
    let partial = module.fixup.difference(module.converter);
    match fixup_side(params.direction, is_front_end) {
        FixupSide::Input => (
            apply_mask(module.in_fmt, params, full),
            apply_mask(module.out_fmt, params, partial),
        ),
        FixupSide::Output => (
            apply_mask(module.in_fmt, params, partial),
            apply_mask(module.out_fmt, params, full),
        ),
    }
}

/// Apply [`resolve`] to the module in place and recompute its buffer sizes.
///
/// No-op for an empty fixup mask, including buffer sizes.
pub fn update_module_params(module: &mut Module, params: &StreamParams, is_front_end: bool) {
    if module.fixup.is_empty() {
        return;
    }
    let (in_fmt, out_fmt) = resolve(module, params, is_front_end);
    module.in_fmt = in_fmt;
    module.out_fmt = out_fmt;
    update_buffer_sizes(module);
    tracing::debug!(
        module = %module.id,
        ?in_fmt,
        ?out_fmt,
        ibs = module.ibs,
        obs = module.obs,
        "module params fixed up"
    );
}
