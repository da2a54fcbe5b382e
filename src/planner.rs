//! Output geometry and trim window planning.

use crate::conversion::ConversionRequest;
use crate::pipeline::ConversionError;
use crate::quirks::RotationStrategy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vidconvert_common::Rotation;

/// Retained time range of the source, in microseconds.
///
/// Either bound may be absent. Frames at or after `end_us` are never
/// written; frames before `start_us` are dropped until the first one at or
/// after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrimWindow {
    pub start_us: Option<i64>,
    pub end_us: Option<i64>,
}

impl TrimWindow {
    /// Build from raw bounds; values of zero or less mean "no bound".
    pub fn new(start_us: i64, end_us: i64) -> Self {
        Self {
            start_us: bound(start_us),
            end_us: bound(end_us),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), ConversionError> {
        match (self.start_us, self.end_us) {
            (Some(start), Some(end)) if start >= end => Err(ConversionError::InvalidRequest(
                format!("trim start {start}us is not before end {end}us"),
            )),
            _ => Ok(()),
        }
    }

    /// Where the demuxer seeks before reading.
    pub fn seek_target(&self) -> i64 {
        self.start_us.unwrap_or(0)
    }

    pub fn is_before_start(&self, pts_us: i64) -> bool {
        self.start_us.is_some_and(|start| pts_us < start)
    }

    pub fn is_past_end(&self, pts_us: i64) -> bool {
        self.end_us.is_some_and(|end| pts_us >= end)
    }

    /// The same window starting at `start_us` instead.
    pub fn starting_at(&self, start_us: Option<i64>) -> Self {
        Self {
            start_us: start_us.and_then(bound),
            end_us: self.end_us,
        }
    }
}

fn bound(us: i64) -> Option<i64> {
    (us > 0).then_some(us)
}

/// Geometry and timing the pipeline encodes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPlan {
    pub width: u32,
    pub height: u32,
    /// Rotation written to the output container header.
    pub rotation: Rotation,
    /// Rotation applied by the renderer to every frame.
    pub render_rotation: Rotation,
    pub trim: TrimWindow,
}

/// Decides output geometry for a platform tier.
#[derive(Debug, Clone, Copy)]
pub struct TrimPlanner {
    api_level: u32,
}

impl TrimPlanner {
    pub fn new(api_level: u32) -> Self {
        Self { api_level }
    }

    pub fn plan(&self, request: &ConversionRequest) -> Result<OutputPlan, ConversionError> {
        let trim = request.trim();
        trim.validate()?;

        let mut width = request.result_width;
        let mut height = request.result_height;
        if width == 0 || height == 0 {
            return Err(ConversionError::InvalidRequest(format!(
                "output size {width}x{height}"
            )));
        }

        let mut rotation = request.rotation;
        let mut render_rotation = Rotation::None;

        match RotationStrategy::for_api(self.api_level) {
            RotationStrategy::SoftwareReadback => {
                // Portrait targets that differ from the source are encoded
                // landscape and rotated back by the container.
                if height > width
                    && width != request.original_width
                    && height != request.original_height
                {
                    std::mem::swap(&mut width, &mut height);
                    rotation = Rotation::Deg90;
                    render_rotation = Rotation::Deg270;
                }
            }
            RotationStrategy::ContainerMetadata => {}
            RotationStrategy::RenderTransform => {
                render_rotation = match request.rotation {
                    Rotation::Deg90 => Rotation::Deg270,
                    Rotation::Deg180 => Rotation::Deg180,
                    Rotation::Deg270 => Rotation::Deg90,
                    Rotation::None => Rotation::None,
                };
                if request.rotation.is_quarter_turn() {
                    std::mem::swap(&mut width, &mut height);
                }
                rotation = Rotation::None;
            }
        }

        debug!(
            api_level = self.api_level,
            width,
            height,
            rotation = %rotation,
            render_rotation = %render_rotation,
            start_us = ?trim.start_us,
            end_us = ?trim.end_us,
            "Planned output"
        );

        Ok(OutputPlan {
            width,
            height,
            rotation,
            render_rotation,
            trim,
        })
    }
}
