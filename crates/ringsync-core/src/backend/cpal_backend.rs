//! Hardware backend on top of cpal
//!
//! cpal is callback driven, so each [`HardwareBuffer`] keeps its own looped
//! byte arena. The stream callback walks a cursor through the arena,
//! converting between the arena's 16-bit PCM and cpal's `f32` samples, and
//! the cursor is what `current_position` reports. The write hint sits one
//! callback period ahead of the play cursor.

use super::{
    AudioBackend, BufferStatus, CooperativeMode, Cursors, DeviceInfo, HardwareBuffer,
    InputDevice, LockAccess, OutputDevice, WaveFormat,
};
use crate::buffer::block::WrapSpans;
use crate::error::BackendError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleRate, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn driver(e: impl std::fmt::Display) -> BackendError {
    BackendError::Driver(e.to_string())
}

fn build_error(e: cpal::BuildStreamError) -> BackendError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => BackendError::Unavailable,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            BackendError::InvalidParam("stream format not supported".into())
        }
        e => driver(e),
    }
}

/// The platform's default cpal host
pub struct CpalBackend {
    host: Host,
}

impl CpalBackend {
    pub fn new() -> Result<Self, BackendError> {
        let host = cpal::default_host();
        // Probe once so a host without any devices is reported up front
        host.devices().map_err(driver)?;
        Ok(Self { host })
    }

    fn find(&self, id: Option<&str>, output: bool) -> Result<Device, BackendError> {
        let device = match id {
            Some(name) => {
                let mut devices = if output {
                    self.host.output_devices().map_err(driver)?
                } else {
                    self.host.input_devices().map_err(driver)?
                };
                devices.find(|d| d.name().map(|n| n == name).unwrap_or(false))
            }
            None if output => self.host.default_output_device(),
            None => self.host.default_input_device(),
        };
        device.ok_or(BackendError::Unavailable)
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        self.host.id().name()
    }

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let default_input = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_output = self.host.default_output_device().and_then(|d| d.name().ok());

        let mut devices = Vec::new();
        for device in self.host.devices().map_err(driver)? {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_input.as_ref() == Some(&name)
                || default_output.as_ref() == Some(&name);
            devices.push(DeviceInfo {
                is_default,
                output_channels: device
                    .default_output_config()
                    .map(|c| c.channels())
                    .unwrap_or(0),
                input_channels: device
                    .default_input_config()
                    .map(|c| c.channels())
                    .unwrap_or(0),
                name,
            });
        }
        Ok(devices)
    }

    fn create_output_device(&self, id: Option<&str>) -> Result<Box<dyn OutputDevice>, BackendError> {
        let device = self.find(id, true)?;
        tracing::debug!(device = ?device.name().ok(), "Opened cpal output device");
        Ok(Box::new(CpalOutputDevice { device }))
    }

    fn create_input_device(&self, id: Option<&str>) -> Result<Box<dyn InputDevice>, BackendError> {
        let device = self.find(id, false)?;
        tracing::debug!(device = ?device.name().ok(), "Opened cpal input device");
        Ok(Box::new(CpalInputDevice { device }))
    }
}

fn stream_config(size_bytes: usize, format: &WaveFormat) -> Result<StreamConfig, BackendError> {
    if format.bits_per_sample != 16 || format.channels == 0 {
        return Err(BackendError::InvalidParam(format!("{:?}", format)));
    }
    if size_bytes == 0 || size_bytes % format.block_align() != 0 {
        return Err(BackendError::InvalidParam(format!(
            "{} bytes is not a whole number of frames",
            size_bytes
        )));
    }
    Ok(StreamConfig {
        channels: format.channels,
        sample_rate: SampleRate(format.frame_rate),
        buffer_size: cpal::BufferSize::Default,
    })
}

/// State shared between a buffer handle and its stream callback
struct Shared {
    arena: Mutex<Vec<u8>>,
    cursor: AtomicUsize,
    active: AtomicBool,
    looping: AtomicBool,
    /// Bytes moved by the most recent callback
    period: AtomicUsize,
}

impl Shared {
    fn new(size_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            arena: Mutex::new(vec![0; size_bytes]),
            cursor: AtomicUsize::new(0),
            active: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            period: AtomicUsize::new(0),
        })
    }

    fn render(&self, out: &mut [f32]) {
        if !self.active.load(Ordering::Acquire) {
            out.fill(0.0);
            return;
        }
        // Never block the audio thread on the producer
        let Ok(arena) = self.arena.try_lock() else {
            out.fill(0.0);
            return;
        };
        let cap = arena.len();
        let mut cursor = self.cursor.load(Ordering::Acquire);
        let mut samples = out.iter_mut();
        for sample in samples.by_ref() {
            let value = i16::from_le_bytes([arena[cursor], arena[cursor + 1]]);
            *sample = value as f32 / 32768.0;
            cursor += 2;
            if cursor >= cap {
                cursor = 0;
                if !self.looping.load(Ordering::Relaxed) {
                    self.active.store(false, Ordering::Release);
                    break;
                }
            }
        }
        for sample in samples {
            *sample = 0.0;
        }
        self.period.store(out.len() * 2, Ordering::Relaxed);
        self.cursor.store(cursor, Ordering::Release);
    }

    fn capture(&self, input: &[f32]) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }
        let Ok(mut arena) = self.arena.try_lock() else {
            return;
        };
        let cap = arena.len();
        let mut cursor = self.cursor.load(Ordering::Acquire);
        for sample in input {
            let value = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            arena[cursor..cursor + 2].copy_from_slice(&value.to_le_bytes());
            cursor = (cursor + 2) % cap;
        }
        self.period.store(input.len() * 2, Ordering::Relaxed);
        self.cursor.store(cursor, Ordering::Release);
    }
}

struct CpalOutputDevice {
    device: Device,
}

impl OutputDevice for CpalOutputDevice {
    fn set_cooperative_mode(&mut self, mode: CooperativeMode) -> Result<(), BackendError> {
        // cpal leaves sharing to the host
        tracing::debug!(?mode, "Cooperative mode is host managed");
        Ok(())
    }

    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError> {
        let config = stream_config(size_bytes, format)?;
        let shared = Shared::new(size_bytes);
        let callback = Arc::clone(&shared);
        let stream = self
            .device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback.render(data),
                move |err| {
                    tracing::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(build_error)?;
        Ok(Box::new(CpalBuffer {
            stream,
            shared,
            capacity: size_bytes,
            block_align: format.block_align(),
            capture: false,
        }))
    }
}

struct CpalInputDevice {
    device: Device,
}

impl InputDevice for CpalInputDevice {
    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError> {
        let config = stream_config(size_bytes, format)?;
        let shared = Shared::new(size_bytes);
        let callback = Arc::clone(&shared);
        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| callback.capture(data),
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(build_error)?;
        Ok(Box::new(CpalBuffer {
            stream,
            shared,
            capacity: size_bytes,
            block_align: format.block_align(),
            capture: true,
        }))
    }
}

struct CpalBuffer {
    stream: Stream,
    shared: Arc<Shared>,
    capacity: usize,
    block_align: usize,
    capture: bool,
}

impl HardwareBuffer for CpalBuffer {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn current_position(&mut self) -> Result<Cursors, BackendError> {
        let cap = self.capacity();
        let device = self.shared.cursor.load(Ordering::Acquire);
        let safe = if self.capture {
            // Callbacks write whole periods under the arena lock
            device
        } else {
            let lead = self.shared.period.load(Ordering::Relaxed).max(self.block_align);
            (device + lead.min(cap - self.block_align)) % cap
        };
        Ok(Cursors { device, safe })
    }

    fn set_current_position(&mut self, offset: usize) -> Result<(), BackendError> {
        if offset >= self.capacity() || offset % self.block_align != 0 {
            return Err(BackendError::InvalidParam(format!("position {}", offset)));
        }
        self.shared.cursor.store(offset, Ordering::Release);
        Ok(())
    }

    fn play(&mut self, looping: bool) -> Result<(), BackendError> {
        self.shared
            .looping
            .store(looping || self.capture, Ordering::Relaxed);
        self.stream.play().map_err(driver)?;
        self.shared.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        self.shared.active.store(false, Ordering::Release);
        self.stream.pause().map_err(driver)
    }

    fn status(&mut self) -> Result<BufferStatus, BackendError> {
        Ok(BufferStatus {
            active: self.shared.active.load(Ordering::Acquire),
            looping: self.shared.looping.load(Ordering::Relaxed),
            buffer_lost: self.shared.arena.is_poisoned(),
        })
    }

    fn lock(
        &mut self,
        offset: usize,
        len: usize,
        access: &mut LockAccess<'_>,
    ) -> Result<(), BackendError> {
        let mut arena = self
            .shared
            .arena
            .lock()
            .map_err(|_| BackendError::BufferLost)?;
        let cap = arena.len();
        if offset >= cap || len > cap {
            return Err(BackendError::InvalidParam(format!(
                "lock of {} bytes at {} in a {}-byte buffer",
                len, offset, cap
            )));
        }
        let spans = WrapSpans::new(offset, len, cap);
        let (first, second) = spans.split(&mut arena);
        access(first, second);
        Ok(())
    }
}
