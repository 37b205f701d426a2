//! Simulated looped-buffer device
//!
//! Cursors advance on a shared [`Clock`] at the buffer's byte rate, so a
//! [`crate::clock::ManualClock`] gives fully deterministic hardware timing.
//! Playback can record every byte the "hardware" consumed; capture fills
//! the buffer with a 16-bit ramp so reads can be verified.
//!
//! [`SimProbe`] is a shared handle for injecting driver faults and for
//! observing which backend calls were made.

use super::{
    AudioBackend, BufferStatus, CooperativeMode, Cursors, DeviceInfo, HardwareBuffer,
    InputDevice, LockAccess, OutputDevice, WaveFormat,
};
use crate::buffer::block::WrapSpans;
use crate::clock::Clock;
use crate::error::BackendError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Which side of the device an object belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// Backend calls observed by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    DeviceCreated(Direction),
    CooperativeMode(CooperativeMode),
    BufferCreated(Direction),
    Play(Direction),
    Stop(Direction),
    BufferReleased(Direction),
    DeviceReleased(Direction),
}

/// Driver failures to inject
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Device creation fails as if no driver were installed
    pub no_devices: bool,
    pub fail_create_buffer: bool,
    /// `play` reports the device as allocated elsewhere
    pub busy_on_play: bool,
    pub fail_position: bool,
    pub fail_stop: bool,
    /// Number of upcoming locks that lose a race with the cursor
    pub lock_races: u32,
}

#[derive(Debug, Default)]
struct ProbeState {
    faults: SimFaults,
    record_playback: bool,
    played: Vec<u8>,
    events: Vec<SimEvent>,
    live_devices: usize,
    live_buffers: usize,
}

/// Shared view into a simulated backend
#[derive(Debug, Clone, Default)]
pub struct SimProbe {
    shared: Arc<Mutex<ProbeState>>,
}

impl SimProbe {
    fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn faults(&self) -> SimFaults {
        self.state().faults
    }

    pub fn set_faults(&self, faults: SimFaults) {
        self.state().faults = faults;
    }

    /// Modify the injected faults in place
    pub fn update_faults(&self, f: impl FnOnce(&mut SimFaults)) {
        f(&mut self.state().faults);
    }

    /// Bytes consumed by simulated playback so far
    pub fn played(&self) -> Vec<u8> {
        self.state().played.clone()
    }

    pub fn take_played(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().played)
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    pub fn live_devices(&self) -> usize {
        self.state().live_devices
    }

    pub fn live_buffers(&self) -> usize {
        self.state().live_buffers
    }

    fn record(&self, event: SimEvent) {
        let mut state = self.state();
        match event {
            SimEvent::DeviceCreated(_) => state.live_devices += 1,
            SimEvent::DeviceReleased(_) => state.live_devices -= 1,
            SimEvent::BufferCreated(_) => state.live_buffers += 1,
            SimEvent::BufferReleased(_) => state.live_buffers -= 1,
            _ => {}
        }
        state.events.push(event);
    }

    fn take_lock_race(&self) -> bool {
        let mut state = self.state();
        if state.faults.lock_races > 0 {
            state.faults.lock_races -= 1;
            true
        } else {
            false
        }
    }
}

/// Simulated device parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Length of the driver-reserved region ahead of the play cursor
    /// (and of the in-flight region behind the capture cursor)
    pub reserved: Duration,
    /// Keep every byte consumed by playback for inspection
    pub record_playback: bool,
    /// Device names to report; the first is the default
    pub devices: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            reserved: Duration::from_millis(10),
            record_playback: false,
            devices: vec!["Simulated Device".to_string()],
        }
    }
}

/// Backend whose hardware is simulated in software
pub struct SimulatedBackend {
    clock: Arc<dyn Clock>,
    config: SimConfig,
    probe: SimProbe,
}

impl SimulatedBackend {
    pub fn new(clock: Arc<dyn Clock>, config: SimConfig) -> Self {
        let probe = SimProbe::default();
        probe.state().record_playback = config.record_playback;
        Self {
            clock,
            config,
            probe,
        }
    }

    /// Handle for fault injection and observation
    pub fn probe(&self) -> SimProbe {
        self.probe.clone()
    }

    fn check_device(&self, id: Option<&str>) -> Result<(), BackendError> {
        if self.probe.faults().no_devices {
            return Err(BackendError::Unavailable);
        }
        match id {
            Some(name) if !self.config.devices.iter().any(|d| d == name) => {
                Err(BackendError::Unavailable)
            }
            _ => Ok(()),
        }
    }

    fn buffer_factory(&self, direction: Direction) -> BufferFactory {
        BufferFactory {
            direction,
            clock: Arc::clone(&self.clock),
            reserved: self.config.reserved,
            probe: self.probe.clone(),
        }
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        Ok(self
            .config
            .devices
            .iter()
            .enumerate()
            .map(|(i, name)| DeviceInfo {
                name: name.clone(),
                is_default: i == 0,
                output_channels: 2,
                input_channels: 2,
            })
            .collect())
    }

    fn create_output_device(&self, id: Option<&str>) -> Result<Box<dyn OutputDevice>, BackendError> {
        self.check_device(id)?;
        self.probe.record(SimEvent::DeviceCreated(Direction::Output));
        Ok(Box::new(SimOutputDevice {
            factory: self.buffer_factory(Direction::Output),
        }))
    }

    fn create_input_device(&self, id: Option<&str>) -> Result<Box<dyn InputDevice>, BackendError> {
        self.check_device(id)?;
        self.probe.record(SimEvent::DeviceCreated(Direction::Input));
        Ok(Box::new(SimInputDevice {
            factory: self.buffer_factory(Direction::Input),
        }))
    }
}

struct BufferFactory {
    direction: Direction,
    clock: Arc<dyn Clock>,
    reserved: Duration,
    probe: SimProbe,
}

impl BufferFactory {
    fn create(&self, size_bytes: usize, format: &WaveFormat) -> Result<Box<dyn HardwareBuffer>, BackendError> {
        let align = format.block_align();
        if align == 0 || format.frame_rate == 0 {
            return Err(BackendError::InvalidParam("empty wave format".into()));
        }
        if size_bytes == 0 || size_bytes % align != 0 {
            return Err(BackendError::InvalidParam(format!(
                "buffer of {} bytes is not a whole number of {}-byte frames",
                size_bytes, align
            )));
        }
        if self.probe.faults().fail_create_buffer {
            return Err(BackendError::Driver("out of buffer memory".into()));
        }

        let bytes_per_sec = format.avg_bytes_per_sec();
        let reserved = (self.reserved.as_nanos() * bytes_per_sec as u128 / 1_000_000_000) as usize;
        let max_reserved = (size_bytes / 2 / align * align).max(align);
        let reserved = (reserved / align * align).clamp(align, max_reserved);

        self.probe.record(SimEvent::BufferCreated(self.direction));
        Ok(Box::new(SimBuffer {
            direction: self.direction,
            arena: vec![0; size_bytes],
            block_align: align,
            bytes_per_sec,
            reserved,
            tick_rate: self.clock.frequency().unwrap_or(1_000_000_000),
            clock: Arc::clone(&self.clock),
            run: None,
            position: 0,
            produced: 0,
            probe: self.probe.clone(),
        }))
    }
}

struct SimOutputDevice {
    factory: BufferFactory,
}

impl OutputDevice for SimOutputDevice {
    fn set_cooperative_mode(&mut self, mode: CooperativeMode) -> Result<(), BackendError> {
        self.factory.probe.record(SimEvent::CooperativeMode(mode));
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError> {
        self.factory.create(size_bytes, format)
    }
}

impl Drop for SimOutputDevice {
    fn drop(&mut self) {
        self.factory.probe.record(SimEvent::DeviceReleased(Direction::Output));
    }
}

struct SimInputDevice {
    factory: BufferFactory,
}

impl InputDevice for SimInputDevice {
    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError> {
        self.factory.create(size_bytes, format)
    }
}

impl Drop for SimInputDevice {
    fn drop(&mut self) {
        self.factory.probe.record(SimEvent::DeviceReleased(Direction::Input));
    }
}

#[derive(Debug, Clone, Copy)]
struct Run {
    started_at: u64,
    start: usize,
    looping: bool,
    /// Bytes already played or captured since `started_at`
    processed: u64,
}

/// Byte `index` of the capture ramp: little-endian 16-bit sample `index / 2`
pub fn capture_pattern(index: u64) -> u8 {
    let sample = (index / 2) as u16;
    sample.to_le_bytes()[(index % 2) as usize]
}

struct SimBuffer {
    direction: Direction,
    arena: Vec<u8>,
    block_align: usize,
    bytes_per_sec: u64,
    reserved: usize,
    clock: Arc<dyn Clock>,
    tick_rate: u64,
    run: Option<Run>,
    /// Cursor while stopped
    position: usize,
    /// Total bytes captured across runs, drives the capture ramp
    produced: u64,
    probe: SimProbe,
}

impl SimBuffer {
    fn elapsed_bytes(&self, run: &Run) -> u64 {
        let ticks = self.clock.now().saturating_sub(run.started_at);
        let bytes = (ticks as u128 * self.bytes_per_sec as u128 / self.tick_rate as u128) as u64;
        bytes / self.block_align as u64 * self.block_align as u64
    }

    /// Bring the arena and cursors up to the current time
    fn catch_up(&mut self) {
        let Some(mut run) = self.run else {
            return;
        };
        let cap = self.arena.len();
        let mut total = self.elapsed_bytes(&run);
        if !run.looping {
            total = total.min((cap - run.start) as u64);
        }

        match self.direction {
            Direction::Output => {
                let mut probe = self.probe.state();
                if probe.record_playback {
                    for i in run.processed..total {
                        let at = (run.start as u64 + i) % cap as u64;
                        probe.played.push(self.arena[at as usize]);
                    }
                }
            }
            Direction::Input => {
                // Only the most recent lap survives in the arena
                let from = run.processed.max(total.saturating_sub(cap as u64));
                for i in from..total {
                    let at = (run.start as u64 + i) % cap as u64;
                    let index = self.produced + (i - run.processed);
                    self.arena[at as usize] = capture_pattern(index);
                }
                self.produced += total - run.processed;
            }
        }

        run.processed = total;
        if !run.looping && run.start as u64 + total >= cap as u64 {
            self.position = 0;
            self.run = None;
        } else {
            self.run = Some(run);
        }
    }

    fn cursor(&self) -> usize {
        match &self.run {
            Some(run) => ((run.start as u64 + run.processed) % self.arena.len() as u64) as usize,
            None => self.position,
        }
    }
}

impl HardwareBuffer for SimBuffer {
    fn capacity(&self) -> usize {
        self.arena.len()
    }

    fn current_position(&mut self) -> Result<Cursors, BackendError> {
        if self.probe.faults().fail_position {
            return Err(BackendError::Driver("position unavailable".into()));
        }
        self.catch_up();
        let cap = self.arena.len();
        let device = self.cursor();
        let safe = match (self.direction, &self.run) {
            (Direction::Output, _) => (device + self.reserved) % cap,
            (Direction::Input, Some(run)) => {
                let complete = run.processed.saturating_sub(self.reserved as u64);
                ((run.start as u64 + complete) % cap as u64) as usize
            }
            (Direction::Input, None) => device,
        };
        Ok(Cursors { device, safe })
    }

    fn set_current_position(&mut self, offset: usize) -> Result<(), BackendError> {
        if offset >= self.arena.len() || offset % self.block_align != 0 {
            return Err(BackendError::InvalidParam(format!("position {}", offset)));
        }
        self.catch_up();
        let now = self.clock.now();
        match self.run.as_mut() {
            Some(run) => {
                *run = Run {
                    started_at: now,
                    start: offset,
                    looping: run.looping,
                    processed: 0,
                }
            }
            None => self.position = offset,
        }
        Ok(())
    }

    fn play(&mut self, looping: bool) -> Result<(), BackendError> {
        if self.probe.faults().busy_on_play {
            return Err(BackendError::Busy);
        }
        self.catch_up();
        let looping = looping || self.direction == Direction::Input;
        match self.run.as_mut() {
            Some(run) => run.looping = looping,
            None => {
                self.run = Some(Run {
                    started_at: self.clock.now(),
                    start: self.position,
                    looping,
                    processed: 0,
                })
            }
        }
        self.probe.record(SimEvent::Play(self.direction));
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.probe.record(SimEvent::Stop(self.direction));
        if self.probe.faults().fail_stop {
            return Err(BackendError::Driver("stop rejected".into()));
        }
        self.catch_up();
        self.position = self.cursor();
        self.run = None;
        Ok(())
    }

    fn status(&mut self) -> Result<BufferStatus, BackendError> {
        self.catch_up();
        Ok(BufferStatus {
            active: self.run.is_some(),
            looping: self.run.map(|r| r.looping).unwrap_or(false),
            buffer_lost: false,
        })
    }

    fn lock(
        &mut self,
        offset: usize,
        len: usize,
        access: &mut LockAccess<'_>,
    ) -> Result<(), BackendError> {
        let cap = self.arena.len();
        if offset >= cap || len > cap {
            return Err(BackendError::InvalidParam(format!(
                "lock of {} bytes at {} in a {}-byte buffer",
                len, offset, cap
            )));
        }
        if self.probe.take_lock_race() {
            return Err(BackendError::PositionChanged);
        }
        self.catch_up();
        let spans = WrapSpans::new(offset, len, cap);
        let (first, second) = spans.split(&mut self.arena);
        access(first, second);
        Ok(())
    }
}

impl Drop for SimBuffer {
    fn drop(&mut self) {
        self.probe.record(SimEvent::BufferReleased(self.direction));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    /// 44.1kHz stereo 16-bit with one tick per byte
    fn setup(config: SimConfig) -> (ManualClock, SimulatedBackend) {
        let clock = ManualClock::new(Some(176_400));
        let backend = SimulatedBackend::new(Arc::new(clock.clone()), config);
        (clock, backend)
    }

    fn output_buffer(backend: &SimulatedBackend, size: usize) -> Box<dyn HardwareBuffer> {
        let mut device = backend.create_output_device(None).unwrap();
        device
            .create_buffer(size, &WaveFormat::pcm16(44100, 2))
            .unwrap()
    }

    #[test]
    fn test_reserved_gap_is_ten_milliseconds() {
        let (_clock, backend) = setup(SimConfig::default());
        let mut buffer = output_buffer(&backend, 8192);
        let cursors = buffer.current_position().unwrap();
        assert_eq!(cursors, Cursors { device: 0, safe: 1764 });
    }

    #[test]
    fn test_play_cursor_follows_clock_and_wraps() {
        let (clock, backend) = setup(SimConfig::default());
        let mut buffer = output_buffer(&backend, 8192);
        buffer.play(true).unwrap();

        clock.advance_ticks(1000);
        assert_eq!(buffer.current_position().unwrap().device, 1000);

        clock.advance_ticks(8192);
        assert_eq!(buffer.current_position().unwrap().device, 1000);
    }

    #[test]
    fn test_cursor_is_frame_aligned() {
        let (clock, backend) = setup(SimConfig::default());
        let mut buffer = output_buffer(&backend, 8192);
        buffer.play(true).unwrap();
        clock.advance_ticks(1003);
        assert_eq!(buffer.current_position().unwrap().device, 1000);
    }

    #[test]
    fn test_one_shot_playback_stops_at_end() {
        let (clock, backend) = setup(SimConfig::default());
        let mut buffer = output_buffer(&backend, 8192);
        buffer.play(false).unwrap();
        clock.advance_ticks(20_000);
        let status = buffer.status().unwrap();
        assert!(!status.active);
        assert_eq!(buffer.current_position().unwrap().device, 0);
    }

    #[test]
    fn test_stop_freezes_cursor() {
        let (clock, backend) = setup(SimConfig::default());
        let mut buffer = output_buffer(&backend, 8192);
        buffer.play(true).unwrap();
        clock.advance_ticks(400);
        buffer.stop().unwrap();
        clock.advance_ticks(4000);
        assert_eq!(buffer.current_position().unwrap().device, 400);
        assert!(!buffer.status().unwrap().active);
    }

    #[test]
    fn test_playback_recording() {
        let config = SimConfig {
            record_playback: true,
            ..SimConfig::default()
        };
        let (clock, backend) = setup(config);
        let probe = backend.probe();
        let mut buffer = output_buffer(&backend, 8192);
        buffer
            .lock(0, 8, &mut |first: &mut [u8], _: &mut [u8]| first.copy_from_slice(&[7; 8]))
            .unwrap();
        buffer.play(true).unwrap();
        clock.advance_ticks(12);
        buffer.current_position().unwrap();
        assert_eq!(probe.played(), vec![7, 7, 7, 7, 7, 7, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_capture_ramp_and_read_cursor() {
        let (clock, backend) = setup(SimConfig::default());
        let mut device = backend.create_input_device(None).unwrap();
        let mut buffer = device
            .create_buffer(8192, &WaveFormat::pcm16(44100, 2))
            .unwrap();
        buffer.play(true).unwrap();
        clock.advance_ticks(3000);

        let cursors = buffer.current_position().unwrap();
        assert_eq!(cursors, Cursors { device: 3000, safe: 3000 - 1764 });

        let mut bytes = Vec::new();
        buffer
            .lock(0, 8, &mut |first: &mut [u8], _: &mut [u8]| bytes.extend_from_slice(first))
            .unwrap();
        assert_eq!(bytes, vec![0, 0, 1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn test_injected_faults() {
        let (_clock, backend) = setup(SimConfig::default());
        let probe = backend.probe();
        let mut buffer = output_buffer(&backend, 8192);

        probe.update_faults(|f| {
            f.busy_on_play = true;
            f.lock_races = 1;
        });
        assert_eq!(buffer.play(true).unwrap_err(), BackendError::Busy);
        let race = buffer.lock(0, 4, &mut |_: &mut [u8], _: &mut [u8]| {});
        assert_eq!(race.unwrap_err(), BackendError::PositionChanged);
        assert!(buffer.lock(0, 4, &mut |_: &mut [u8], _: &mut [u8]| {}).is_ok());

        probe.set_faults(SimFaults {
            no_devices: true,
            ..SimFaults::default()
        });
        assert_eq!(
            backend.create_output_device(None).err(),
            Some(BackendError::Unavailable)
        );
    }

    #[test]
    fn test_unknown_device_is_unavailable() {
        let (_clock, backend) = setup(SimConfig::default());
        assert!(backend.create_output_device(Some("Nope")).is_err());
        assert!(backend.create_output_device(Some("Simulated Device")).is_ok());
    }

    #[test]
    fn test_release_tracking() {
        let (_clock, backend) = setup(SimConfig::default());
        let probe = backend.probe();
        {
            let mut device = backend.create_output_device(None).unwrap();
            let _buffer = device
                .create_buffer(1024, &WaveFormat::pcm16(44100, 2))
                .unwrap();
            assert_eq!(probe.live_devices(), 1);
            assert_eq!(probe.live_buffers(), 1);
        }
        assert_eq!(probe.live_devices(), 0);
        assert_eq!(probe.live_buffers(), 0);
    }

    #[test]
    fn test_rejects_partial_frames() {
        let (_clock, backend) = setup(SimConfig::default());
        let mut device = backend.create_output_device(None).unwrap();
        let result = device.create_buffer(1023, &WaveFormat::pcm16(44100, 2));
        assert!(matches!(result, Err(BackendError::InvalidParam(_))));
    }
}
