use crate::pipeline::VideoMode;
use crate::quirks::PlatformInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub encoder: EncoderSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub state: StateConfig,
}

/// The device the conversion runs on, as seen by the quirk tables.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlatformConfig {
    #[serde(default = "default_api_level")]
    pub api_level: u32,

    #[serde(default = "default_manufacturer")]
    pub manufacturer: String,

    #[serde(default)]
    pub model: String,
}

fn default_api_level() -> u32 {
    21
}
fn default_manufacturer() -> String {
    "generic".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_level: default_api_level(),
            manufacturer: default_manufacturer(),
            model: String::new(),
        }
    }
}

impl PlatformConfig {
    pub fn to_platform(&self) -> PlatformInfo {
        PlatformInfo::new(self.api_level, &self.manufacturer, &self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EncoderSettings {
    /// Output video MIME type.
    #[serde(default = "default_mime")]
    pub mime: String,

    /// Used when a request carries no bitrate of its own.
    #[serde(default = "default_bitrate")]
    pub default_bitrate: u32,

    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,

    /// Seconds between key frames.
    #[serde(default = "default_i_frame_interval")]
    pub i_frame_interval: u32,
}

fn default_mime() -> String {
    vidconvert_media::MIME_AVC.to_string()
}
fn default_bitrate() -> u32 {
    921_600
}
fn default_frame_rate() -> u32 {
    25
}
fn default_i_frame_interval() -> u32 {
    10
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            mime: default_mime(),
            default_bitrate: default_bitrate(),
            frame_rate: default_frame_rate(),
            i_frame_interval: default_i_frame_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PipelineSettings {
    #[serde(default)]
    pub video_mode: VideoMode,

    /// Timeout of each codec dequeue call, in microseconds.
    #[serde(default = "default_poll_timeout_us")]
    pub poll_timeout_us: u64,

    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,

    /// Buffered output bytes before a flush to disk.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

fn default_poll_timeout_us() -> u64 {
    2500
}
fn default_render_timeout_ms() -> u64 {
    2500
}
fn default_flush_threshold() -> usize {
    vidconvert_media::mux::DEFAULT_FLUSH_THRESHOLD
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            video_mode: VideoMode::default(),
            poll_timeout_us: default_poll_timeout_us(),
            render_timeout_ms: default_render_timeout_ms(),
            flush_threshold: default_flush_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StateConfig {
    /// Keep the crash guard on disk; otherwise it lives for the process only.
    #[serde(default = "default_persist")]
    pub persist: bool,

    /// Crash guard file. `~` is expanded.
    #[serde(default = "default_crash_guard_path")]
    pub crash_guard_path: PathBuf,
}

fn default_persist() -> bool {
    true
}
fn default_crash_guard_path() -> PathBuf {
    PathBuf::from("~/.local/state/vidconvert/crash_guard.json")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            persist: default_persist(),
            crash_guard_path: default_crash_guard_path(),
        }
    }
}

impl StateConfig {
    /// Crash guard path with `~` expanded.
    pub fn resolved_crash_guard_path(&self) -> PathBuf {
        let raw = self.crash_guard_path.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
    }
}
