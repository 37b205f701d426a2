//! Per-direction buffer bookkeeping
//!
//! The byte arena itself lives behind [`crate::backend::HardwareBuffer`]
//! because it is memory shared with the hardware engine. These structs only
//! hold the indices and counters this layer maintains on top of it.

use super::tracker::CursorHistory;
use serde::Serialize;
use std::time::Duration;

/// Samples are signed 16-bit PCM
pub const BYTES_PER_SAMPLE: usize = 2;

/// Lifecycle of one buffer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferPhase {
    /// No buffer has been created yet
    Uninitialized,
    /// Buffer allocated and zeroed, hardware not looping
    Initialized,
    /// Hardware is looping over the buffer
    Running,
    /// Session terminated, buffer released
    Released,
}

impl BufferPhase {
    /// Queries and block copies are only legal on a live buffer
    pub fn is_live(self) -> bool {
        matches!(self, BufferPhase::Initialized | BufferPhase::Running)
    }
}

/// Whether lost laps are reconstructed from elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum WrapCorrection {
    /// Clock calibrated: one buffer cycle lasts `ticks_per_cycle` ticks
    Enabled { ticks_per_cycle: u64 },
    /// No calibrated clock. Only laps visible in the raw cursor are tracked,
    /// so a stall longer than one cycle counts as a single underflow.
    Disabled,
}

impl WrapCorrection {
    /// Derive the cycle length from the clock frequency and buffer geometry
    pub fn calibrate(clock_frequency: Option<u64>, frames_in_buffer: usize, frame_rate: u32) -> Self {
        match clock_frequency {
            Some(freq) if freq > 0 && frame_rate > 0 => {
                let ticks = freq as u128 * frames_in_buffer as u128 / frame_rate as u128;
                if ticks == 0 {
                    WrapCorrection::Disabled
                } else {
                    WrapCorrection::Enabled {
                        ticks_per_cycle: ticks as u64,
                    }
                }
            }
            _ => WrapCorrection::Disabled,
        }
    }

    /// Ticks per buffer cycle, 0 when disabled
    pub fn ticks_per_cycle(&self) -> u64 {
        match self {
            WrapCorrection::Enabled { ticks_per_cycle } => *ticks_per_cycle,
            WrapCorrection::Disabled => 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, WrapCorrection::Enabled { .. })
    }
}

/// Bookkeeping for the playback buffer
#[derive(Debug, Clone)]
pub struct OutputBufferState {
    pub(crate) capacity: usize,
    pub(crate) frame_size: usize,
    pub(crate) frame_rate: u32,
    pub(crate) write_offset: usize,
    pub(crate) running: bool,
    pub(crate) underflow_count: u64,
    pub(crate) frames_written: u64,
    pub(crate) frames_played: u64,
    pub(crate) history: CursorHistory,
    /// Bytes the latest space query allowed the producer to write
    pub(crate) grant: usize,
}

impl OutputBufferState {
    pub(crate) fn new(
        capacity: usize,
        frame_size: usize,
        frame_rate: u32,
        wrap: WrapCorrection,
    ) -> Self {
        Self {
            capacity,
            frame_size,
            frame_rate,
            write_offset: 0,
            running: false,
            underflow_count: 0,
            frames_written: 0,
            frames_played: 0,
            history: CursorHistory::new(wrap),
            grant: 0,
        }
    }

    /// Buffer size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes per frame (channels x bytes per sample)
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Next byte offset the producer will write
    pub fn write_offset(&self) -> usize {
        self.write_offset
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn underflow_count(&self) -> u64 {
        self.underflow_count
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    /// Raw play cursor seen by the latest poll
    pub fn last_play_cursor(&self) -> usize {
        self.history.last_cursor()
    }

    /// Tick of the latest poll
    pub fn last_poll_time(&self) -> u64 {
        self.history.last_poll_time()
    }

    pub fn wrap_correction(&self) -> WrapCorrection {
        self.history.wrap()
    }

    /// Bytes still writable under the latest space query
    pub fn grant(&self) -> usize {
        self.grant
    }

    /// Time the hardware takes to play the whole buffer once
    pub fn buffer_duration(&self) -> Duration {
        buffer_duration(self.capacity, self.frame_size, self.frame_rate)
    }
}

/// Bookkeeping for the capture buffer
#[derive(Debug, Clone)]
pub struct InputBufferState {
    pub(crate) capacity: usize,
    pub(crate) frame_size: usize,
    pub(crate) frame_rate: u32,
    pub(crate) read_offset: usize,
    pub(crate) running: bool,
    pub(crate) overflow_count: u64,
    pub(crate) frames_read: u64,
    pub(crate) frames_captured: u64,
    pub(crate) history: CursorHistory,
    /// Bytes the latest filled query allowed the consumer to read
    pub(crate) grant: usize,
}

impl InputBufferState {
    pub(crate) fn new(
        capacity: usize,
        frame_size: usize,
        frame_rate: u32,
        wrap: WrapCorrection,
    ) -> Self {
        Self {
            capacity,
            frame_size,
            frame_rate,
            read_offset: 0,
            running: false,
            overflow_count: 0,
            frames_read: 0,
            frames_captured: 0,
            history: CursorHistory::new(wrap),
            grant: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    /// Next byte offset the consumer will read
    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Times the hardware lapped data that had not been read yet
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    /// Read cursor observed by the latest poll while running
    pub fn last_capture_cursor(&self) -> usize {
        self.history.last_cursor()
    }

    pub fn last_poll_time(&self) -> u64 {
        self.history.last_poll_time()
    }

    pub fn wrap_correction(&self) -> WrapCorrection {
        self.history.wrap()
    }

    pub fn grant(&self) -> usize {
        self.grant
    }

    pub fn buffer_duration(&self) -> Duration {
        buffer_duration(self.capacity, self.frame_size, self.frame_rate)
    }
}

fn buffer_duration(capacity: usize, frame_size: usize, frame_rate: u32) -> Duration {
    if frame_size == 0 || frame_rate == 0 {
        return Duration::ZERO;
    }
    let frames = (capacity / frame_size) as u64;
    Duration::from_nanos(frames * 1_000_000_000 / frame_rate as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_calibrate_typical_buffer() {
        // 2048 frames at 44.1kHz with a 1MHz counter
        let wrap = WrapCorrection::calibrate(Some(1_000_000), 2048, 44100);
        assert_eq!(wrap, WrapCorrection::Enabled { ticks_per_cycle: 46439 });
        assert!(wrap.is_enabled());
    }

    #[test]
    fn test_calibrate_without_clock() {
        let wrap = WrapCorrection::calibrate(None, 2048, 44100);
        assert_eq!(wrap, WrapCorrection::Disabled);
        assert_eq!(wrap.ticks_per_cycle(), 0);
    }

    #[test]
    fn test_calibrate_degenerate_inputs() {
        assert_eq!(
            WrapCorrection::calibrate(Some(1_000_000), 2048, 0),
            WrapCorrection::Disabled
        );
        // Cycle shorter than one tick cannot be tracked
        assert_eq!(
            WrapCorrection::calibrate(Some(10), 1, 44100),
            WrapCorrection::Disabled
        );
    }

    #[test]
    fn test_phase_liveness() {
        assert!(!BufferPhase::Uninitialized.is_live());
        assert!(BufferPhase::Initialized.is_live());
        assert!(BufferPhase::Running.is_live());
        assert!(!BufferPhase::Released.is_live());
    }

    #[test]
    fn test_buffer_duration() {
        let state = OutputBufferState::new(8192, 4, 44100, WrapCorrection::Disabled);
        let ms = state.buffer_duration().as_secs_f64() * 1000.0;
        assert_relative_eq!(ms, 46.44, epsilon = 0.001);
    }

    #[test]
    fn test_wrap_correction_serializes_with_mode_tag() {
        let json = serde_json::to_string(&WrapCorrection::Enabled { ticks_per_cycle: 42 }).unwrap();
        assert_eq!(json, r#"{"mode":"enabled","ticks_per_cycle":42}"#);
        let json = serde_json::to_string(&WrapCorrection::Disabled).unwrap();
        assert_eq!(json, r#"{"mode":"disabled"}"#);
    }
}
