//! Block copies into and out of the looped buffer
//!
//! A block starting at `offset` may run past the end of the buffer. It is
//! then split into a pre-wrap span `[offset, capacity)` and a post-wrap span
//! `[0, remainder)`; both are copied in one lock.

use super::state::{InputBufferState, OutputBufferState};
use crate::backend::HardwareBuffer;
use crate::error::{Result, SessionError};
use std::ops::Range;

/// The at most two contiguous spans a ring region occupies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapSpans {
    pub first: Range<usize>,
    pub second: Range<usize>,
}

impl WrapSpans {
    /// Split `len` bytes from `offset` in a ring of `capacity` bytes.
    ///
    /// Requires `offset < capacity` and `len <= capacity`.
    pub fn new(offset: usize, len: usize, capacity: usize) -> Self {
        let first_len = len.min(capacity - offset);
        Self {
            first: offset..offset + first_len,
            second: 0..len - first_len,
        }
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the region runs past the end of the buffer
    pub fn wraps(&self) -> bool {
        !self.second.is_empty()
    }

    /// Borrow both spans of `arena` mutably at once
    pub fn split<'a>(&self, arena: &'a mut [u8]) -> (&'a mut [u8], &'a mut [u8]) {
        // The post-wrap span ends at or before the pre-wrap span starts
        let (head, tail) = arena.split_at_mut(self.first.start);
        let first = &mut tail[..self.first.len()];
        let second = &mut head[..self.second.len()];
        (first, second)
    }
}

/// Copies producer data into the playback buffer at the write offset
pub struct BlockWriter<'a> {
    buffer: &'a mut dyn HardwareBuffer,
    state: &'a mut OutputBufferState,
}

impl<'a> BlockWriter<'a> {
    pub fn new(buffer: &'a mut dyn HardwareBuffer, state: &'a mut OutputBufferState) -> Self {
        Self { buffer, state }
    }

    /// Copy `data` into the buffer and advance the write offset.
    ///
    /// `data` must fit in the space granted by the latest space query.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.check_grant("write_block", data.len())?;
        self.fill("write_block", data.len(), |first, second| {
            let split = first.len();
            first.copy_from_slice(&data[..split]);
            second.copy_from_slice(&data[split..split + second.len()]);
        })
    }

    /// Write `len` bytes of silence, counted as written data
    pub fn write_silence(&mut self, len: usize) -> Result<usize> {
        self.check_grant("zero_empty_space", len)?;
        self.fill("zero_empty_space", len, |first, second| {
            first.fill(0);
            second.fill(0);
        })
    }

    fn check_grant(&self, op: &'static str, len: usize) -> Result<()> {
        if len > self.state.grant {
            return Err(SessionError::ContractViolation {
                op,
                reason: format!(
                    "{} bytes exceed the {} bytes granted by the last space query",
                    len, self.state.grant
                ),
            });
        }
        Ok(())
    }

    fn fill(
        &mut self,
        op: &'static str,
        len: usize,
        mut copy: impl FnMut(&mut [u8], &mut [u8]),
    ) -> Result<usize> {
        if len == 0 {
            return Ok(0);
        }
        let offset = self.state.write_offset;
        let mut copied = 0;
        self.buffer
            .lock(offset, len, &mut |first: &mut [u8], second: &mut [u8]| {
                copied = first.len() + second.len();
                copy(first, second);
            })
            .map_err(|e| SessionError::lock_failed(offset, len, e))?;

        let state = &mut *self.state;
        state.write_offset = (state.write_offset + copied) % state.capacity;
        state.frames_written += (copied / state.frame_size) as u64;
        state.grant -= copied.min(state.grant);
        tracing::trace!(op, offset, copied, write_offset = state.write_offset, "Block written");
        Ok(copied)
    }
}

/// Copies captured data out of the capture buffer at the read offset
pub struct BlockReader<'a> {
    buffer: &'a mut dyn HardwareBuffer,
    state: &'a mut InputBufferState,
}

impl<'a> BlockReader<'a> {
    pub fn new(buffer: &'a mut dyn HardwareBuffer, state: &'a mut InputBufferState) -> Self {
        Self { buffer, state }
    }

    /// Fill `out` from the buffer and advance the read offset.
    ///
    /// `out` must fit in the bytes granted by the latest filled query.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let len = out.len();
        if len > self.state.grant {
            return Err(SessionError::ContractViolation {
                op: "read_block",
                reason: format!(
                    "{} bytes exceed the {} bytes granted by the last filled query",
                    len, self.state.grant
                ),
            });
        }
        if len == 0 {
            return Ok(0);
        }

        let offset = self.state.read_offset;
        let mut copied = 0;
        self.buffer
            .lock(offset, len, &mut |first: &mut [u8], second: &mut [u8]| {
                let split = first.len();
                out[..split].copy_from_slice(first);
                out[split..split + second.len()].copy_from_slice(second);
                copied = split + second.len();
            })
            .map_err(|e| SessionError::lock_failed(offset, len, e))?;

        let state = &mut *self.state;
        state.read_offset = (state.read_offset + copied) % state.capacity;
        state.frames_read += (copied / state.frame_size) as u64;
        state.grant -= copied.min(state.grant);
        Ok(copied)
    }
}
