//! Cursor tracking over a modulo-only position register
//!
//! The hardware reports its cursor as an offset inside the buffer, so a raw
//! difference between two readings cannot see more than one lap. When the
//! clock is calibrated, the elapsed time between polls tells how many bytes
//! should have gone by; every whole buffer beyond what the raw reading shows
//! is a lap the register hid from us.
//!
//! ```text
//!            play        write hint
//!   0          |   gap     |         empty          |  capacity
//!   [----------P===========W.........................]
//!                                write_offset ^
//! ```
//!
//! The gap `[play, write hint)` belongs to the driver and is never written.
//! When the empty region computed from the (lap-corrected) play cursor
//! reaches into that gap, the producer fell behind and the hardware is
//! replaying stale data: an underflow.

use super::state::{InputBufferState, OutputBufferState, WrapCorrection};
use crate::backend::Cursors;

/// Forward distance from `from` to `to` inside a ring of `capacity` bytes
pub fn ring_distance(from: usize, to: usize, capacity: usize) -> usize {
    if to >= from {
        to - from
    } else {
        to + capacity - from
    }
}

/// Cursor movement observed by one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Raw cursor plus the recovered laps
    pub cursor: u64,
    /// Bytes the hardware moved since the previous poll
    pub bytes: u64,
    /// Whole laps the raw reading could not show
    pub laps: u64,
}

/// Last observed hardware cursor and when it was read
#[derive(Debug, Clone)]
pub struct CursorHistory {
    wrap: WrapCorrection,
    last_cursor: usize,
    last_poll_time: u64,
}

impl CursorHistory {
    pub fn new(wrap: WrapCorrection) -> Self {
        Self {
            wrap,
            last_cursor: 0,
            last_poll_time: 0,
        }
    }

    /// Forget previous readings; the hardware restarts from offset 0 at `now`
    pub fn reset(&mut self, now: u64) {
        self.resume_at(0, now);
    }

    /// Continue tracking from `cursor`, read at `now`
    pub fn resume_at(&mut self, cursor: usize, now: u64) {
        self.last_cursor = cursor;
        self.last_poll_time = now;
    }

    pub fn wrap(&self) -> WrapCorrection {
        self.wrap
    }

    pub fn last_cursor(&self) -> usize {
        self.last_cursor
    }

    pub fn last_poll_time(&self) -> u64 {
        self.last_poll_time
    }

    /// Record a raw cursor reading taken at tick `now`.
    ///
    /// The time-based estimate only adds whole laps; the sub-buffer position
    /// always comes from the raw reading.
    pub fn observe(&mut self, raw_cursor: usize, capacity: usize, now: u64) -> Advance {
        let cap = capacity as u64;
        let mut bytes = ring_distance(self.last_cursor, raw_cursor, capacity) as u64;
        let mut laps = 0;

        if let WrapCorrection::Enabled { ticks_per_cycle } = self.wrap {
            let elapsed = now.saturating_sub(self.last_poll_time);
            let expected = (elapsed as u128 * cap as u128 / ticks_per_cycle as u128) as u64;
            if expected > bytes {
                laps = (expected - bytes) / cap;
            }
            bytes += laps * cap;
        }

        self.last_cursor = raw_cursor;
        self.last_poll_time = now;

        Advance {
            cursor: raw_cursor as u64 + laps * cap,
            bytes,
            laps,
        }
    }
}

/// Whole cycles the hardware ran past the application, at least one.
///
/// `behind` is the lap-aware distance from the application offset to the
/// hardware cursor, so only completed cycles count and a remainder that
/// merely reaches into the driver gap adds nothing extra.
fn cycles_missed(behind: u64, capacity: usize) -> u64 {
    (behind / capacity as u64).max(1)
}

/// Compute writable bytes in the playback buffer, compensating underflow.
///
/// Updates play tracking, the underflow counter and the write grant.
pub fn poll_output(state: &mut OutputBufferState, cursors: Cursors, now: u64) -> usize {
    let capacity = state.capacity;
    let play_write_gap = ring_distance(cursors.device, cursors.safe, capacity);

    let mut laps = 0;
    if state.running {
        let advance = state.history.observe(cursors.device, capacity, now);
        if advance.laps > 0 {
            tracing::debug!(
                laps = advance.laps,
                raw_cursor = cursors.device,
                "Recovered play cursor laps hidden by wraparound"
            );
        }
        laps = advance.laps;
        state.frames_played += advance.bytes / state.frame_size as u64;
    }

    let mut empty = ring_distance(state.write_offset, cursors.device, capacity) as u64
        + laps * capacity as u64;

    let limit = (capacity - play_write_gap) as u64;
    if empty > limit {
        if state.running {
            let missed = cycles_missed(empty, capacity);
            state.underflow_count += missed;
            tracing::warn!(
                missed,
                total = state.underflow_count,
                write_offset = state.write_offset,
                resync_to = cursors.safe,
                "Output underflow, resynchronising write offset"
            );
        }
        state.write_offset = cursors.safe;
        empty = limit;
    }

    state.grant = empty as usize;
    state.grant
}

/// Compute readable bytes in the capture buffer, compensating overflow.
///
/// Mirror image of [`poll_output`]: the hardware produces, we consume, and
/// the in-flight region `[read hint, capture cursor)` is off limits.
pub fn poll_input(state: &mut InputBufferState, cursors: Cursors, now: u64) -> usize {
    let capacity = state.capacity;
    let in_flight = ring_distance(cursors.safe, cursors.device, capacity);

    let mut laps = 0;
    if state.running {
        let advance = state.history.observe(cursors.safe, capacity, now);
        if advance.laps > 0 {
            tracing::debug!(
                laps = advance.laps,
                raw_cursor = cursors.safe,
                "Recovered capture cursor laps hidden by wraparound"
            );
        }
        laps = advance.laps;
        state.frames_captured += advance.bytes / state.frame_size as u64;
    }

    let mut filled = ring_distance(state.read_offset, cursors.safe, capacity) as u64
        + laps * capacity as u64;

    let limit = (capacity - in_flight) as u64;
    if filled > limit {
        if state.running {
            let missed = cycles_missed(filled, capacity);
            state.overflow_count += missed;
            tracing::warn!(
                missed,
                total = state.overflow_count,
                read_offset = state.read_offset,
                resync_to = cursors.device,
                "Input overflow, resynchronising read offset"
            );
        }
        state.read_offset = cursors.device;
        filled = limit;
    }

    state.grant = filled as usize;
    state.grant
}
