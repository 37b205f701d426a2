//! Device session lifecycle
//!
//! Owns the device handles and both buffer directions:
//!
//! ```text
//! init -> init_*_device -> init_*_buffer -> start_* -> query/write/read ... -> stop_* -> term
//! ```
//!
//! Per buffer the phases are `Uninitialized -> Initialized -> Running ->
//! Initialized (stop, restartable) -> Released (term, terminal)`. Queries
//! and block copies outside `Initialized`/`Running` return
//! [`SessionError::ContractViolation`].
//!
//! Nothing here locks or blocks: the session expects a single thread to
//! drive each direction and to poll at a cadence well under one buffer
//! duration.

use crate::backend::{
    Backend, BufferStatus, CooperativeMode, HardwareBuffer, InputDevice, OutputDevice, WaveFormat,
};
use crate::buffer::block::{BlockReader, BlockWriter};
use crate::buffer::state::{
    BufferPhase, InputBufferState, OutputBufferState, WrapCorrection, BYTES_PER_SAMPLE,
};
use crate::buffer::tracker::{poll_input, poll_output};
use crate::clock::Clock;
use crate::error::{BackendError, Result, SessionError};
use crate::stats::SessionStats;
use std::sync::Arc;

struct OutputChannel {
    buffer: Box<dyn HardwareBuffer>,
    state: OutputBufferState,
}

struct InputChannel {
    buffer: Box<dyn HardwareBuffer>,
    state: InputBufferState,
}

/// Session over one output and one input buffer of a position-readback device
pub struct DeviceSession {
    backend: Backend,
    clock: Arc<dyn Clock>,
    output_device: Option<Box<dyn OutputDevice>>,
    input_device: Option<Box<dyn InputDevice>>,
    output: Option<OutputChannel>,
    input: Option<InputChannel>,
    output_phase: BufferPhase,
    input_phase: BufferPhase,
}

/// Validate buffer geometry and derive the frame size
fn frame_geometry(channels: u16, frame_rate: u32, bytes_per_buffer: usize) -> Result<usize> {
    let frame_size = channels as usize * BYTES_PER_SAMPLE;
    let reason = if channels == 0 {
        Some("zero channels".to_string())
    } else if frame_rate == 0 {
        Some("zero frame rate".to_string())
    } else if bytes_per_buffer == 0 || bytes_per_buffer % frame_size != 0 {
        Some(format!(
            "{} bytes is not a whole number of {}-byte frames",
            bytes_per_buffer, frame_size
        ))
    } else {
        None
    };
    match reason {
        Some(reason) => Err(SessionError::BufferCreationFailed(BackendError::InvalidParam(
            reason,
        ))),
        None => Ok(frame_size),
    }
}

fn warn_if_degraded(direction: &str, wrap: WrapCorrection) {
    if !wrap.is_enabled() {
        tracing::warn!(
            direction,
            "High-resolution clock not calibrated, multi-lap stalls will be under-counted"
        );
    }
}

impl DeviceSession {
    /// Create a session on a resolved backend
    pub fn new(backend: Backend, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            output_device: None,
            input_device: None,
            output: None,
            input: None,
            output_phase: BufferPhase::Uninitialized,
            input_phase: BufferPhase::Uninitialized,
        }
    }

    /// Reset to a blank session, releasing anything still held
    pub fn init(&mut self) {
        self.term();
        self.output_phase = BufferPhase::Uninitialized;
        self.input_phase = BufferPhase::Uninitialized;
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn output_phase(&self) -> BufferPhase {
        self.output_phase
    }

    pub fn input_phase(&self) -> BufferPhase {
        self.input_phase
    }

    pub fn output_state(&self) -> Option<&OutputBufferState> {
        self.output.as_ref().map(|c| &c.state)
    }

    pub fn input_state(&self) -> Option<&InputBufferState> {
        self.input.as_ref().map(|c| &c.state)
    }

    pub fn output_write_offset(&self) -> Option<usize> {
        self.output_state().map(|s| s.write_offset())
    }

    pub fn input_read_offset(&self) -> Option<usize> {
        self.input_state().map(|s| s.read_offset())
    }

    /// Underflows seen since the output buffer was created
    pub fn output_underflow_count(&self) -> u64 {
        self.output_state().map(|s| s.underflow_count()).unwrap_or(0)
    }

    /// Overflows seen since the input buffer was created
    pub fn input_overflow_count(&self) -> u64 {
        self.input_state().map(|s| s.overflow_count()).unwrap_or(0)
    }

    pub fn frames_written(&self) -> u64 {
        self.output_state().map(|s| s.frames_written()).unwrap_or(0)
    }

    pub fn frames_played(&self) -> u64 {
        self.output_state().map(|s| s.frames_played()).unwrap_or(0)
    }

    /// Wrap-correction mode of the output buffer, `None` before init
    pub fn output_wrap_correction(&self) -> Option<WrapCorrection> {
        self.output_state().map(|s| s.wrap_correction())
    }

    pub fn input_wrap_correction(&self) -> Option<WrapCorrection> {
        self.input_state().map(|s| s.wrap_correction())
    }

    /// Snapshot of counters for diagnostics
    pub fn stats(&self) -> SessionStats {
        SessionStats::capture(
            self.backend.name(),
            self.output_phase,
            self.output_state(),
            self.input_phase,
            self.input_state(),
        )
    }

    fn check_not_released(&self, op: &'static str, phase: BufferPhase) -> Result<()> {
        if phase == BufferPhase::Released {
            return Err(SessionError::wrong_phase(op, phase));
        }
        Ok(())
    }

    // ---- Output ----------------------------------------------------------

    /// Acquire the output device. `None` selects the default device.
    pub fn init_output_device(&mut self, id: Option<&str>) -> Result<()> {
        self.check_not_released("init_output_device", self.output_phase)?;
        let device = match &self.backend {
            Backend::Available(backend) => backend
                .create_output_device(id)
                .map_err(SessionError::DeviceUnavailable)?,
            Backend::Unavailable { reason } => {
                return Err(SessionError::DeviceUnavailable(BackendError::NoHost(
                    reason.clone(),
                )))
            }
        };
        tracing::info!(device = id.unwrap_or("default"), "Output device acquired");
        self.output_device = Some(device);
        Ok(())
    }

    /// Allocate and zero the playback buffer, then anchor the write offset
    /// at the driver's write cursor.
    ///
    /// Starting at the write cursor rather than 0 keeps the buffer from
    /// looking full before the first cycle has played.
    pub fn init_output_buffer(
        &mut self,
        frame_rate: u32,
        channels: u16,
        bytes_per_buffer: usize,
    ) -> Result<()> {
        const OP: &str = "init_output_buffer";
        self.check_not_released(OP, self.output_phase)?;
        if self.output_phase == BufferPhase::Running {
            return Err(SessionError::ContractViolation {
                op: OP,
                reason: "buffer is running, stop it before resizing".to_string(),
            });
        }
        let frame_size = frame_geometry(channels, frame_rate, bytes_per_buffer)?;
        let device = self
            .output_device
            .as_mut()
            .ok_or_else(|| SessionError::ContractViolation {
                op: OP,
                reason: "no output device".to_string(),
            })?;

        device
            .set_cooperative_mode(CooperativeMode::Exclusive)
            .map_err(|e| SessionError::from_backend("set_cooperative_mode", e))?;

        let format = WaveFormat::pcm16(frame_rate, channels);
        // Release any previous buffer before allocating its replacement
        self.output = None;
        self.output_phase = BufferPhase::Uninitialized;
        let mut buffer = device
            .create_buffer(bytes_per_buffer, &format)
            .map_err(SessionError::BufferCreationFailed)?;

        buffer
            .lock(0, bytes_per_buffer, &mut |first: &mut [u8], second: &mut [u8]| {
                first.fill(0);
                second.fill(0);
            })
            .map_err(|e| SessionError::lock_failed(0, bytes_per_buffer, e))?;

        let wrap = WrapCorrection::calibrate(
            self.clock.frequency(),
            bytes_per_buffer / frame_size,
            frame_rate,
        );
        warn_if_degraded("output", wrap);

        let cursors = buffer
            .current_position()
            .map_err(|e| SessionError::from_backend("get_current_position", e))?;

        let mut state = OutputBufferState::new(bytes_per_buffer, frame_size, frame_rate, wrap);
        state.write_offset = cursors.safe;
        state.frames_written = (cursors.safe / frame_size) as u64;

        tracing::info!(
            capacity = bytes_per_buffer,
            frame_size,
            frame_rate,
            write_offset = state.write_offset,
            ticks_per_cycle = wrap.ticks_per_cycle(),
            "Output buffer initialised"
        );

        self.output = Some(OutputChannel { buffer, state });
        self.output_phase = BufferPhase::Initialized;
        Ok(())
    }

    fn output_channel(&mut self, op: &'static str) -> Result<&mut OutputChannel> {
        if !self.output_phase.is_live() {
            return Err(SessionError::wrong_phase(op, self.output_phase));
        }
        self.output
            .as_mut()
            .ok_or_else(|| SessionError::wrong_phase(op, BufferPhase::Uninitialized))
    }

    /// Rewind playback to offset 0 and start looping
    pub fn start_output(&mut self) -> Result<()> {
        let now = self.clock.now();
        let channel = self.output_channel("start_output")?;

        channel.state.history.reset(now);
        channel.state.frames_played = 0;
        channel
            .buffer
            .set_current_position(0)
            .map_err(|e| SessionError::from_backend("set_current_position", e))?;
        channel
            .buffer
            .play(true)
            .map_err(|e| SessionError::from_backend("play", e))?;
        channel.state.running = true;

        self.output_phase = BufferPhase::Running;
        tracing::info!("Output started");
        Ok(())
    }

    /// Stop playback. The running flag clears even if the driver refuses.
    pub fn stop_output(&mut self) -> Result<()> {
        let Some(channel) = self.output.as_mut() else {
            return Ok(());
        };
        let result = channel.buffer.stop();
        channel.state.running = false;
        if self.output_phase == BufferPhase::Running {
            self.output_phase = BufferPhase::Initialized;
        }
        match result {
            Ok(()) => {
                tracing::info!("Output stopped");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Output stop failed");
                Err(SessionError::from_backend("stop", e))
            }
        }
    }

    fn poll_output(&mut self, op: &'static str) -> Result<usize> {
        let clock = Arc::clone(&self.clock);
        let channel = self.output_channel(op)?;
        let cursors = channel
            .buffer
            .current_position()
            .map_err(|e| SessionError::from_backend("get_current_position", e))?;
        Ok(poll_output(&mut channel.state, cursors, clock.now()))
    }

    /// Bytes that may be written now without touching the driver's region.
    ///
    /// Detects and compensates underflow; the result also becomes the write
    /// grant for subsequent [`Self::write_block`] calls.
    pub fn query_output_space(&mut self) -> Result<usize> {
        self.poll_output("query_output_space")
    }

    /// Bytes queued ahead of the play cursor (capacity minus free space)
    pub fn query_output_filled(&mut self) -> Result<usize> {
        let empty = self.poll_output("query_output_filled")?;
        let capacity = self
            .output_state()
            .map(|s| s.capacity())
            .unwrap_or_default();
        Ok(capacity - empty)
    }

    /// Fill all currently free space with silence and return its size
    pub fn zero_empty_space(&mut self) -> Result<usize> {
        let empty = self.query_output_space()?;
        if empty == 0 {
            return Ok(0);
        }
        let channel = self.output_channel("zero_empty_space")?;
        BlockWriter::new(channel.buffer.as_mut(), &mut channel.state).write_silence(empty)
    }

    /// Copy `data` into the buffer at the write offset.
    ///
    /// `data.len()` must not exceed the space granted by the latest
    /// [`Self::query_output_space`], minus what was written since.
    pub fn write_block(&mut self, data: &[u8]) -> Result<usize> {
        let channel = self.output_channel("write_block")?;
        BlockWriter::new(channel.buffer.as_mut(), &mut channel.state).write(data)
    }

    pub fn get_output_status(&mut self) -> Result<BufferStatus> {
        let channel = self.output_channel("get_output_status")?;
        channel
            .buffer
            .status()
            .map_err(|e| SessionError::from_backend("get_status", e))
    }

    // ---- Input -----------------------------------------------------------

    /// Acquire the capture device. `None` selects the default device.
    pub fn init_input_device(&mut self, id: Option<&str>) -> Result<()> {
        self.check_not_released("init_input_device", self.input_phase)?;
        let device = match &self.backend {
            Backend::Available(backend) => backend
                .create_input_device(id)
                .map_err(SessionError::DeviceUnavailable)?,
            Backend::Unavailable { reason } => {
                return Err(SessionError::DeviceUnavailable(BackendError::NoHost(
                    reason.clone(),
                )))
            }
        };
        tracing::info!(device = id.unwrap_or("default"), "Input device acquired");
        self.input_device = Some(device);
        Ok(())
    }

    /// Allocate the capture buffer; reading starts at offset 0
    pub fn init_input_buffer(
        &mut self,
        frame_rate: u32,
        channels: u16,
        bytes_per_buffer: usize,
    ) -> Result<()> {
        const OP: &str = "init_input_buffer";
        self.check_not_released(OP, self.input_phase)?;
        if self.input_phase == BufferPhase::Running {
            return Err(SessionError::ContractViolation {
                op: OP,
                reason: "buffer is running, stop it before resizing".to_string(),
            });
        }
        let frame_size = frame_geometry(channels, frame_rate, bytes_per_buffer)?;
        let device = self
            .input_device
            .as_mut()
            .ok_or_else(|| SessionError::ContractViolation {
                op: OP,
                reason: "no input device".to_string(),
            })?;

        let format = WaveFormat::pcm16(frame_rate, channels);
        self.input = None;
        self.input_phase = BufferPhase::Uninitialized;
        let buffer = device
            .create_buffer(bytes_per_buffer, &format)
            .map_err(SessionError::BufferCreationFailed)?;

        let wrap = WrapCorrection::calibrate(
            self.clock.frequency(),
            bytes_per_buffer / frame_size,
            frame_rate,
        );
        warn_if_degraded("input", wrap);

        tracing::info!(
            capacity = bytes_per_buffer,
            frame_size,
            frame_rate,
            ticks_per_cycle = wrap.ticks_per_cycle(),
            "Input buffer initialised"
        );

        self.input = Some(InputChannel {
            buffer,
            state: InputBufferState::new(bytes_per_buffer, frame_size, frame_rate, wrap),
        });
        self.input_phase = BufferPhase::Initialized;
        Ok(())
    }

    fn input_channel(&mut self, op: &'static str) -> Result<&mut InputChannel> {
        if !self.input_phase.is_live() {
            return Err(SessionError::wrong_phase(op, self.input_phase));
        }
        self.input
            .as_mut()
            .ok_or_else(|| SessionError::wrong_phase(op, BufferPhase::Uninitialized))
    }

    /// Start looped capture from wherever the hardware cursor rests
    pub fn start_input(&mut self) -> Result<()> {
        let clock = Arc::clone(&self.clock);
        let channel = self.input_channel("start_input")?;

        let cursors = channel
            .buffer
            .current_position()
            .map_err(|e| SessionError::from_backend("get_current_position", e))?;
        channel
            .buffer
            .play(true)
            .map_err(|e| SessionError::from_backend("start", e))?;
        channel.state.history.resume_at(cursors.safe, clock.now());
        channel.state.frames_captured = 0;
        channel.state.running = true;

        self.input_phase = BufferPhase::Running;
        tracing::info!("Input started");
        Ok(())
    }

    /// Stop capture. The running flag clears even if the driver refuses.
    pub fn stop_input(&mut self) -> Result<()> {
        let Some(channel) = self.input.as_mut() else {
            return Ok(());
        };
        let result = channel.buffer.stop();
        channel.state.running = false;
        if self.input_phase == BufferPhase::Running {
            self.input_phase = BufferPhase::Initialized;
        }
        match result {
            Ok(()) => {
                tracing::info!("Input stopped");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Input stop failed");
                Err(SessionError::from_backend("stop", e))
            }
        }
    }

    /// Bytes of captured data ready to read.
    ///
    /// Detects and compensates overflow; the result also becomes the read
    /// grant for subsequent [`Self::read_block`] calls.
    pub fn query_input_filled(&mut self) -> Result<usize> {
        let clock = Arc::clone(&self.clock);
        let channel = self.input_channel("query_input_filled")?;
        let cursors = channel
            .buffer
            .current_position()
            .map_err(|e| SessionError::from_backend("get_current_position", e))?;
        Ok(poll_input(&mut channel.state, cursors, clock.now()))
    }

    /// Copy captured bytes into `out` and advance the read offset
    pub fn read_block(&mut self, out: &mut [u8]) -> Result<usize> {
        let channel = self.input_channel("read_block")?;
        BlockReader::new(channel.buffer.as_mut(), &mut channel.state).read(out)
    }

    pub fn get_input_status(&mut self) -> Result<BufferStatus> {
        let channel = self.input_channel("get_input_status")?;
        channel
            .buffer
            .status()
            .map_err(|e| SessionError::from_backend("get_status", e))
    }

    // ---- Teardown --------------------------------------------------------

    /// Stop and release both buffers, then both devices.
    ///
    /// Safe on partially initialised and already terminated sessions.
    pub fn term(&mut self) {
        let had_anything = self.output.is_some()
            || self.input.is_some()
            || self.output_device.is_some()
            || self.input_device.is_some();

        if let Some(mut channel) = self.output.take() {
            if channel.state.running {
                if let Err(e) = channel.buffer.stop() {
                    tracing::warn!(error = %e, "Output stop failed during teardown");
                }
            }
        }
        if let Some(mut channel) = self.input.take() {
            if channel.state.running {
                if let Err(e) = channel.buffer.stop() {
                    tracing::warn!(error = %e, "Input stop failed during teardown");
                }
            }
        }
        self.input_device = None;
        self.output_device = None;

        self.output_phase = BufferPhase::Released;
        self.input_phase = BufferPhase::Released;

        if had_anything {
            tracing::info!("Device session terminated");
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.term();
    }
}
