//! Export settings value objects.
//!
//! [`RawExportSettings`] is the loosely-typed shape persisted between
//! sessions; [`ExportSettings`] is the normalized value produced by
//! [`crate::resolve::resolve`] and consumed by the export engine.

use serde::{Deserialize, Serialize};

/// Legal frame rates for MP4 exports.
pub const MP4_FPS_OPTIONS: [u32; 3] = [15, 30, 60];

/// Legal frame rates for GIF exports.
pub const GIF_FPS_OPTIONS: [u32; 5] = [10, 15, 20, 25, 30];

/// Two bpp values closer than this are treated as the same preset.
pub const BPP_MATCH_TOLERANCE: f64 = 0.001;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    Mp4,
    Gif,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Mp4" => Some(Self::Mp4),
            "Gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mp4 => "Mp4",
            Self::Gif => "Gif",
        }
    }

    /// File extension for the rendered artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Gif => "gif",
        }
    }

    /// Frame rates this format may be exported at, ascending.
    pub fn fps_options(self) -> &'static [u32] {
        match self {
            Self::Mp4 => &MP4_FPS_OPTIONS,
            Self::Gif => &GIF_FPS_OPTIONS,
        }
    }
}

/// Where a finished export goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportDestination {
    File,
    Clipboard,
    Link,
}

impl ExportDestination {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "file" => Some(Self::File),
            "clipboard" => Some(Self::Clipboard),
            "link" => Some(Self::Link),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Clipboard => "clipboard",
            Self::Link => "link",
        }
    }
}

/// Compression preset, each tied to a fixed bits-per-pixel target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportCompression {
    Maximum,
    Social,
    Web,
    Potato,
}

impl ExportCompression {
    pub const ALL: [ExportCompression; 4] = [Self::Maximum, Self::Social, Self::Web, Self::Potato];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Maximum" => Some(Self::Maximum),
            "Social" => Some(Self::Social),
            "Web" => Some(Self::Web),
            "Potato" => Some(Self::Potato),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Maximum => "Maximum",
            Self::Social => "Social",
            Self::Web => "Web",
            Self::Potato => "Potato",
        }
    }

    /// Bits per pixel for this preset.
    pub fn bpp(self) -> f64 {
        match self {
            Self::Maximum => 0.3,
            Self::Social => 0.15,
            Self::Web => 0.08,
            Self::Potato => 0.04,
        }
    }

    /// Preset whose bpp matches `bpp` within [`BPP_MATCH_TOLERANCE`].
    pub fn from_bpp(bpp: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| (preset.bpp() - bpp).abs() < BPP_MATCH_TOLERANCE)
    }
}

/// Named output resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionPreset {
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "4k")]
    P4k,
}

impl ResolutionPreset {
    pub const ALL: [ResolutionPreset; 3] = [Self::P720, Self::P1080, Self::P4k];

    pub fn label(self) -> &'static str {
        match self {
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P4k => "4K",
        }
    }

    /// Stable identifier stored in persisted settings.
    pub fn value(self) -> &'static str {
        match self {
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P4k => "4k",
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Self::P720 => 1280,
            Self::P1080 => 1920,
            Self::P4k => 3840,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            Self::P720 => 720,
            Self::P1080 => 1080,
            Self::P4k => 2160,
        }
    }

    pub fn from_value(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.value() == value)
    }

    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.width() == width && preset.height() == height)
    }

    /// Whether GIF output may use this resolution.
    pub fn allowed_for_gif(self) -> bool {
        matches!(self, Self::P720 | Self::P1080)
    }
}

/// An organization the signed-in user can share into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

/// Normalized export configuration; always a legal combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub format: ExportFormat,
    pub fps: u32,
    pub export_to: ExportDestination,
    pub resolution: ResolutionPreset,
    pub compression: ExportCompression,

    /// Advanced-mode bpp that matches no preset.
    pub custom_bpp: Option<f64>,

    /// Target organization for link exports.
    pub organization_id: Option<String>,

    /// Ask the renderer to decode sources with ffmpeg.
    pub force_ffmpeg_decoder: bool,
}

impl ExportSettings {
    /// Bits per pixel actually requested from the encoder.
    pub fn effective_bpp(&self) -> f64 {
        self.custom_bpp.unwrap_or_else(|| self.compression.bpp())
    }

    pub fn width(&self) -> u32 {
        self.resolution.width()
    }

    pub fn height(&self) -> u32 {
        self.resolution.height()
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp4,
            fps: 30,
            export_to: ExportDestination::File,
            resolution: ResolutionPreset::P720,
            compression: ExportCompression::Maximum,
            custom_bpp: None,
            organization_id: None,
            force_ffmpeg_decoder: false,
        }
    }
}

/// Persisted resolution entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResolution {
    pub label: String,
    pub value: String,
    pub width: u32,
    pub height: u32,
}

impl From<ResolutionPreset> for RawResolution {
    fn from(preset: ResolutionPreset) -> Self {
        Self {
            label: preset.label().to_string(),
            value: preset.value().to_string(),
            width: preset.width(),
            height: preset.height(),
        }
    }
}

/// Export settings as persisted (`export_settings.json`).
///
/// Enumerated fields are kept as strings so that values written by other
/// versions still load; [`crate::resolve::resolve`] maps anything unknown
/// to a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawExportSettings {
    pub format: String,
    pub fps: u32,
    pub export_to: String,
    pub resolution: RawResolution,
    pub compression: String,
    pub organization_id: Option<String>,
    pub advanced_mode: bool,
    pub compression_bpp: Option<f64>,
    pub force_ffmpeg_decoder: bool,
}

impl Default for RawExportSettings {
    fn default() -> Self {
        Self::from(&ExportSettings::default())
    }
}

impl From<&ExportSettings> for RawExportSettings {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            format: settings.format.as_str().to_string(),
            fps: settings.fps,
            export_to: settings.export_to.as_str().to_string(),
            resolution: settings.resolution.into(),
            compression: settings.compression.as_str().to_string(),
            organization_id: settings.organization_id.clone(),
            advanced_mode: settings.custom_bpp.is_some(),
            compression_bpp: settings.custom_bpp,
            force_ffmpeg_decoder: settings.force_ffmpeg_decoder,
        }
    }
}
