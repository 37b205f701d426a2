//! Session counters snapshot
//!
//! Plain data copied out of a [`crate::DeviceSession`] so it can be logged,
//! printed or serialised without holding the session.

use crate::buffer::state::{BufferPhase, InputBufferState, OutputBufferState, WrapCorrection};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Playback side counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStats {
    pub capacity: usize,
    pub frame_size: usize,
    pub frame_rate: u32,
    /// Buffer length in milliseconds
    pub buffer_ms: f64,
    pub write_offset: usize,
    pub running: bool,
    /// Underflow events, one per elapsed buffer cycle of starvation
    pub underflow_count: u64,
    pub frames_written: u64,
    pub frames_played: u64,
    pub wrap_correction: WrapCorrection,
}

impl From<&OutputBufferState> for OutputStats {
    fn from(state: &OutputBufferState) -> Self {
        Self {
            capacity: state.capacity(),
            frame_size: state.frame_size(),
            frame_rate: state.frame_rate(),
            buffer_ms: state.buffer_duration().as_secs_f64() * 1000.0,
            write_offset: state.write_offset(),
            running: state.is_running(),
            underflow_count: state.underflow_count(),
            frames_written: state.frames_written(),
            frames_played: state.frames_played(),
            wrap_correction: state.wrap_correction(),
        }
    }
}

/// Capture side counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputStats {
    pub capacity: usize,
    pub frame_size: usize,
    pub frame_rate: u32,
    pub buffer_ms: f64,
    pub read_offset: usize,
    pub running: bool,
    /// Overflow events, one per elapsed buffer cycle left unread
    pub overflow_count: u64,
    pub frames_read: u64,
    pub frames_captured: u64,
    pub wrap_correction: WrapCorrection,
}

impl From<&InputBufferState> for InputStats {
    fn from(state: &InputBufferState) -> Self {
        Self {
            capacity: state.capacity(),
            frame_size: state.frame_size(),
            frame_rate: state.frame_rate(),
            buffer_ms: state.buffer_duration().as_secs_f64() * 1000.0,
            read_offset: state.read_offset(),
            running: state.is_running(),
            overflow_count: state.overflow_count(),
            frames_read: state.frames_read(),
            frames_captured: state.frames_captured(),
            wrap_correction: state.wrap_correction(),
        }
    }
}

/// Point-in-time view of a whole session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub output_phase: BufferPhase,
    pub input_phase: BufferPhase,
    pub output: Option<OutputStats>,
    pub input: Option<InputStats>,
}

impl SessionStats {
    pub(crate) fn capture(
        backend: &str,
        output_phase: BufferPhase,
        output: Option<&OutputBufferState>,
        input_phase: BufferPhase,
        input: Option<&InputBufferState>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            backend: backend.to_string(),
            output_phase,
            input_phase,
            output: output.map(OutputStats::from),
            input: input.map(InputStats::from),
        }
    }

    pub fn underflow_count(&self) -> u64 {
        self.output.as_ref().map(|o| o.underflow_count).unwrap_or(0)
    }

    pub fn overflow_count(&self) -> u64 {
        self.input.as_ref().map(|i| i.overflow_count).unwrap_or(0)
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "[{}] backend {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.backend
        )?;
        match &self.output {
            Some(o) => writeln!(
                f,
                "  output {:?}: {} B ({:.1} ms), write @{}, written {} / played {} frames, underflows {}",
                self.output_phase,
                o.capacity,
                o.buffer_ms,
                o.write_offset,
                o.frames_written,
                o.frames_played,
                o.underflow_count
            )?,
            None => writeln!(f, "  output {:?}", self.output_phase)?,
        }
        match &self.input {
            Some(i) => write!(
                f,
                "  input  {:?}: {} B ({:.1} ms), read @{}, captured {} / read {} frames, overflows {}",
                self.input_phase,
                i.capacity,
                i.buffer_ms,
                i.read_offset,
                i.frames_captured,
                i.frames_read,
                i.overflow_count
            ),
            None => write!(f, "  input  {:?}", self.input_phase),
        }
    }
}
