//! Per-device encoder quirks.
//!
//! Vendor behaviour lives in the static tables below. Resolution walks them
//! once per conversion and produces a [`QuirkProfile`]; adding a vendor is a
//! table entry.

use crate::codec::{CodecInfo, EncoderInput};
use crate::pipeline::ConversionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Platform tier from which encoders accept an input surface.
pub const SURFACE_INPUT_API: u32 = 18;
/// Platform tier from which rotation is applied while rendering.
pub const RENDER_ROTATION_API: u32 = 21;

/// Device identity the quirk tables are keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub api_level: u32,
    pub manufacturer: String,
    pub model: String,
}

impl PlatformInfo {
    pub fn new(api_level: u32, manufacturer: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_level,
            manufacturer: manufacturer.into().to_lowercase(),
            model: model.into(),
        }
    }

    pub fn has_input_surface(&self) -> bool {
        self.api_level >= SURFACE_INPUT_API
    }

    pub fn encoder_input(&self) -> EncoderInput {
        if self.has_input_surface() {
            EncoderInput::Surface
        } else {
            EncoderInput::Buffers
        }
    }

    fn manufacturer_is(&self, name: &str) -> bool {
        self.manufacturer.eq_ignore_ascii_case(name)
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::new(RENDER_ROTATION_API, "generic", "generic")
    }
}

/// Encoder input color formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorFormat {
    Yuv420Planar,
    Yuv420PackedPlanar,
    Yuv420SemiPlanar,
    Yuv420PackedSemiPlanar,
    TiYuv420PackedSemiPlanar,
    Surface,
}

impl ColorFormat {
    /// Buffer formats known to produce correct output.
    const RECOGNIZED: [ColorFormat; 5] = [
        ColorFormat::Yuv420Planar,
        ColorFormat::Yuv420PackedPlanar,
        ColorFormat::Yuv420SemiPlanar,
        ColorFormat::Yuv420PackedSemiPlanar,
        ColorFormat::TiYuv420PackedSemiPlanar,
    ];

    pub fn raw(self) -> i32 {
        match self {
            ColorFormat::Yuv420Planar => 19,
            ColorFormat::Yuv420PackedPlanar => 20,
            ColorFormat::Yuv420SemiPlanar => 21,
            ColorFormat::Yuv420PackedSemiPlanar => 39,
            ColorFormat::TiYuv420PackedSemiPlanar => 0x7f00_0100,
            ColorFormat::Surface => 0x7f00_0789,
        }
    }

    /// Map a raw constant onto the allow-list. Anything else is rejected.
    pub fn recognized(raw: i32) -> Option<Self> {
        Self::RECOGNIZED.into_iter().find(|f| f.raw() == raw)
    }

    /// Whether chroma is stored as interleaved UV pairs.
    pub fn is_semi_planar(self) -> bool {
        matches!(
            self,
            ColorFormat::Yuv420SemiPlanar
                | ColorFormat::Yuv420PackedSemiPlanar
                | ColorFormat::TiYuv420PackedSemiPlanar
        )
    }
}

impl fmt::Display for ColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#x})", self, self.raw())
    }
}

/// Encoder vendor family, derived from the codec name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorFamily {
    #[default]
    Generic,
    Qualcomm,
    Intel,
    MediaTek,
    Samsung,
    TexasInstruments,
}

/// How the encoder input buffer is padded beyond `w * h * 3 / 2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaddingRule {
    None,
    /// Round the luma plane up to a 16-row boundary and add 1.25x the
    /// extra rows to the buffer.
    AlignHeight16,
    /// Start the chroma plane on a 2048-byte boundary.
    ChromaAlign2048,
}

/// Where source rotation is compensated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    /// Frames are rotated during pixel readback and the container carries
    /// the compensating rotation.
    SoftwareReadback,
    /// The source rotation is copied into the container header.
    ContainerMetadata,
    /// The renderer rotates frames; the container rotation is zero.
    RenderTransform,
}

impl RotationStrategy {
    pub fn for_api(api_level: u32) -> Self {
        if api_level < SURFACE_INPUT_API {
            RotationStrategy::SoftwareReadback
        } else if api_level < RENDER_ROTATION_API {
            RotationStrategy::ContainerMetadata
        } else {
            RotationStrategy::RenderTransform
        }
    }
}

enum NameMatch {
    Contains(&'static str),
    Exact(&'static str),
}

impl NameMatch {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatch::Contains(part) => name.contains(part),
            NameMatch::Exact(full) => name == *full,
        }
    }
}

const FAMILIES: &[(NameMatch, ProcessorFamily)] = &[
    (NameMatch::Contains("OMX.qcom."), ProcessorFamily::Qualcomm),
    (NameMatch::Contains("OMX.Intel."), ProcessorFamily::Intel),
    (NameMatch::Exact("OMX.MTK.VIDEO.ENCODER.AVC"), ProcessorFamily::MediaTek),
    (NameMatch::Exact("OMX.SEC.AVC.Encoder"), ProcessorFamily::Samsung),
    (NameMatch::Exact("OMX.TI.DUCATI1.VIDEO.H264E"), ProcessorFamily::TexasInstruments),
];

struct PaddingEntry {
    family: ProcessorFamily,
    /// Applies only to this manufacturer when set.
    manufacturer: Option<&'static str>,
    rule: PaddingRule,
}

// First match wins, so manufacturer overrides precede the family default.
const PADDING: &[PaddingEntry] = &[
    PaddingEntry {
        family: ProcessorFamily::Generic,
        manufacturer: None,
        rule: PaddingRule::AlignHeight16,
    },
    PaddingEntry {
        family: ProcessorFamily::Qualcomm,
        manufacturer: Some("lge"),
        rule: PaddingRule::None,
    },
    PaddingEntry {
        family: ProcessorFamily::Qualcomm,
        manufacturer: None,
        rule: PaddingRule::ChromaAlign2048,
    },
    PaddingEntry {
        family: ProcessorFamily::MediaTek,
        manufacturer: Some("baidu"),
        rule: PaddingRule::AlignHeight16,
    },
];

struct SwapUvEntry {
    family: ProcessorFamily,
    api_level: u32,
    manufacturers: &'static [&'static str],
}

const SWAP_UV: &[SwapUvEntry] = &[SwapUvEntry {
    family: ProcessorFamily::Qualcomm,
    api_level: 16,
    manufacturers: &["lge", "nokia"],
}];

/// Encoders that emit corrupt streams; used only when nothing else is offered.
const DEPRIORITIZED_ENCODERS: &[&str] = &["OMX.SEC.avc.enc"];

/// (encoder, color format) pairs that corrupt output.
const AVOIDED_COLOR_FORMATS: &[(&str, ColorFormat)] =
    &[("OMX.SEC.AVC.Encoder", ColorFormat::Yuv420Planar)];

/// Byte layout of one encoder input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferLayout {
    pub width: usize,
    pub height: usize,
    pub aligned_height: usize,
    /// Bytes inserted between the luma and chroma planes.
    pub padding: usize,
    pub buffer_size: usize,
}

impl BufferLayout {
    pub fn compute(width: u32, height: u32, rule: PaddingRule) -> Self {
        let (w, h) = (width as usize, height as usize);
        let mut layout = Self {
            width: w,
            height: h,
            aligned_height: h,
            padding: 0,
            buffer_size: w * h * 3 / 2,
        };
        match rule {
            PaddingRule::None => {}
            PaddingRule::AlignHeight16 => {
                if h % 16 != 0 {
                    layout.aligned_height = h + (16 - h % 16);
                    layout.padding = w * (layout.aligned_height - h);
                    layout.buffer_size += layout.padding * 5 / 4;
                }
            }
            PaddingRule::ChromaAlign2048 => {
                let luma = w * h;
                let uv_offset = (luma + 2047) & !2047;
                layout.padding = uv_offset - luma;
                layout.buffer_size += layout.padding;
            }
        }
        layout
    }

    /// Offset of the first chroma byte.
    pub fn chroma_offset(&self) -> usize {
        self.width * self.height + self.padding
    }
}

/// Everything the pipeline needs to know about the chosen encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuirkProfile {
    pub encoder_name: String,
    pub family: ProcessorFamily,
    pub color_format: ColorFormat,
    pub padding: PaddingRule,
    pub swap_uv: bool,
    pub rotation: RotationStrategy,
    pub input: EncoderInput,
}

impl QuirkProfile {
    /// Input buffer layout for an output of `width` x `height`. Only used
    /// with buffer input.
    pub fn layout(&self, width: u32, height: u32) -> BufferLayout {
        BufferLayout::compute(width, height, self.padding)
    }

    pub fn uses_surface(&self) -> bool {
        self.input == EncoderInput::Surface
    }
}

/// Derives a [`QuirkProfile`] from the platform and its codec list.
pub struct DeviceQuirkResolver<'a> {
    platform: &'a PlatformInfo,
}

impl<'a> DeviceQuirkResolver<'a> {
    pub fn new(platform: &'a PlatformInfo) -> Self {
        Self { platform }
    }

    /// First encoder for `mime`, skipping deprioritized builds unless they
    /// are the only choice.
    pub fn select_encoder<'c>(&self, codecs: &'c [CodecInfo], mime: &str) -> Option<&'c CodecInfo> {
        let mut last = None;
        for codec in codecs.iter().filter(|c| c.is_encoder && c.supports(mime)) {
            if !DEPRIORITIZED_ENCODERS.contains(&codec.name.as_str()) {
                return Some(codec);
            }
            last = Some(codec);
        }
        last
    }

    /// Pick a buffer color format from the encoder's list.
    pub fn select_color_format(&self, encoder: &CodecInfo) -> Option<ColorFormat> {
        let mut last = None;
        for format in encoder.color_formats.iter().filter_map(|&raw| ColorFormat::recognized(raw)) {
            let avoided = AVOIDED_COLOR_FORMATS
                .iter()
                .any(|(name, f)| *name == encoder.name && *f == format);
            if !avoided {
                return Some(format);
            }
            last = Some(format);
        }
        last
    }

    pub fn family_for(encoder_name: &str) -> ProcessorFamily {
        FAMILIES
            .iter()
            .find(|(matcher, _)| matcher.matches(encoder_name))
            .map(|(_, family)| *family)
            .unwrap_or_default()
    }

    fn padding_for(&self, family: ProcessorFamily) -> PaddingRule {
        PADDING
            .iter()
            .find(|e| {
                e.family == family
                    && e.manufacturer.map_or(true, |m| self.platform.manufacturer_is(m))
            })
            .map(|e| e.rule)
            .unwrap_or(PaddingRule::None)
    }

    fn swap_uv_for(&self, family: ProcessorFamily) -> bool {
        SWAP_UV.iter().any(|e| {
            e.family == family
                && e.api_level == self.platform.api_level
                && e.manufacturers.iter().any(|m| self.platform.manufacturer_is(m))
        })
    }

    /// Resolve the profile for encoding `mime`.
    pub fn resolve(&self, codecs: &[CodecInfo], mime: &str) -> Result<QuirkProfile, ConversionError> {
        let encoder = self.select_encoder(codecs, mime).ok_or_else(|| {
            ConversionError::CodecProtocolViolation(format!("no encoder advertises {mime}"))
        })?;

        let input = self.platform.encoder_input();
        let color_format = match input {
            EncoderInput::Surface => ColorFormat::Surface,
            EncoderInput::Buffers => self.select_color_format(encoder).ok_or_else(|| {
                ConversionError::UnsupportedColorFormat {
                    encoder: encoder.name.clone(),
                }
            })?,
        };

        let family = Self::family_for(&encoder.name);
        let profile = QuirkProfile {
            encoder_name: encoder.name.clone(),
            family,
            color_format,
            padding: self.padding_for(family),
            swap_uv: self.swap_uv_for(family),
            rotation: RotationStrategy::for_api(self.platform.api_level),
            input,
        };

        debug!(
            encoder = %profile.encoder_name,
            family = ?profile.family,
            color_format = %profile.color_format,
            padding = ?profile.padding,
            swap_uv = profile.swap_uv,
            manufacturer = %self.platform.manufacturer,
            model = %self.platform.model,
            "Resolved encoder quirks"
        );
        Ok(profile)
    }
}
