//! Device backend interface
//!
//! A backend hands out devices, devices hand out looped hardware buffers,
//! and a hardware buffer exposes only what a position-readback driver
//! offers: a coarse cursor pair, play/stop, and locked access to its memory.
//!
//! The backend is resolved once at startup into [`Backend`]. A missing audio
//! subsystem is the distinct [`Backend::Unavailable`] variant rather than a
//! set of stand-in entry points that fail on every call.

use crate::error::BackendError;
use serde::Serialize;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;
pub mod sim;

/// Hardware cursor pair reported by a buffer.
///
/// For playback, `device` is the play cursor and `safe` the write cursor:
/// `[device, safe)` is being consumed and must not be touched.
/// For capture, `device` is the capture cursor and `safe` the read cursor:
/// `[safe, device)` is still being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursors {
    pub device: usize,
    pub safe: usize,
}

/// Interleaved signed 16-bit PCM description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaveFormat {
    pub channels: u16,
    pub frame_rate: u32,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    pub fn pcm16(frame_rate: u32, channels: u16) -> Self {
        Self {
            channels,
            frame_rate,
            bits_per_sample: 16,
        }
    }

    /// Bytes per frame
    pub fn block_align(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn avg_bytes_per_sec(&self) -> u64 {
        self.frame_rate as u64 * self.block_align() as u64
    }
}

/// How the application shares the output device with others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooperativeMode {
    /// Shared with other applications at the mixer's format
    Normal,
    /// Our format wins and no other application is heard
    Exclusive,
}

/// Status flags of a hardware buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferStatus {
    /// Hardware is playing or capturing
    pub active: bool,
    /// Hardware restarts at offset 0 after reaching the end
    pub looping: bool,
    /// Buffer memory was reclaimed by the driver
    pub buffer_lost: bool,
}

/// Information about an available device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub output_channels: u16,
    pub input_channels: u16,
}

/// Callback given both spans of a locked region, in ring order
pub type LockAccess<'a> = dyn FnMut(&mut [u8], &mut [u8]) + 'a;

/// A looped buffer the hardware engine plays from or captures into.
///
/// Dropping the buffer releases it.
pub trait HardwareBuffer {
    /// Buffer size in bytes
    fn capacity(&self) -> usize;

    /// Read the current cursor pair
    fn current_position(&mut self) -> Result<Cursors, BackendError>;

    /// Move the hardware cursor to `offset`
    fn set_current_position(&mut self, offset: usize) -> Result<(), BackendError>;

    /// Start the engine. Playback buffers honour `looping`; capture always loops.
    fn play(&mut self, looping: bool) -> Result<(), BackendError>;

    fn stop(&mut self) -> Result<(), BackendError>;

    fn status(&mut self) -> Result<BufferStatus, BackendError>;

    /// Lock `len` bytes starting at `offset` and hand them to `access`.
    ///
    /// The region is split at the end of the buffer into at most two spans
    /// and is unlocked when `access` returns. Fails with
    /// [`BackendError::PositionChanged`] when the hardware moved into the
    /// requested region while locking.
    fn lock(
        &mut self,
        offset: usize,
        len: usize,
        access: &mut LockAccess<'_>,
    ) -> Result<(), BackendError>;
}

/// An opened playback device
pub trait OutputDevice {
    fn set_cooperative_mode(&mut self, mode: CooperativeMode) -> Result<(), BackendError>;

    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError>;
}

/// An opened capture device
pub trait InputDevice {
    fn create_buffer(
        &mut self,
        size_bytes: usize,
        format: &WaveFormat,
    ) -> Result<Box<dyn HardwareBuffer>, BackendError>;
}

/// Factory for devices. `None` selects the default device.
pub trait AudioBackend {
    fn name(&self) -> &str;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    fn create_output_device(&self, id: Option<&str>) -> Result<Box<dyn OutputDevice>, BackendError>;

    fn create_input_device(&self, id: Option<&str>) -> Result<Box<dyn InputDevice>, BackendError>;
}

/// Backend chosen at startup
pub enum Backend {
    Available(Box<dyn AudioBackend>),
    Unavailable { reason: String },
}

impl Backend {
    /// Wrap a concrete backend
    pub fn new(backend: impl AudioBackend + 'static) -> Self {
        Backend::Available(Box::new(backend))
    }

    /// Pick the platform backend if one was compiled in and a host answers
    pub fn resolve_default() -> Self {
        #[cfg(feature = "cpal-backend")]
        {
            match cpal_backend::CpalBackend::new() {
                Ok(backend) => {
                    tracing::info!(backend = backend.name(), "Audio backend resolved");
                    Backend::new(backend)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "No audio host available");
                    Backend::Unavailable {
                        reason: e.to_string(),
                    }
                }
            }
        }

        #[cfg(not(feature = "cpal-backend"))]
        {
            Backend::Unavailable {
                reason: "built without a hardware backend".to_string(),
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Backend::Available(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Backend::Available(backend) => backend.name(),
            Backend::Unavailable { .. } => "unavailable",
        }
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        match self {
            Backend::Available(backend) => backend.list_devices(),
            Backend::Unavailable { .. } => Err(BackendError::Unavailable),
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Available(backend) => f
                .debug_tuple("Available")
                .field(&backend.name())
                .finish(),
            Backend::Unavailable { reason } => f
                .debug_struct("Unavailable")
                .field("reason", reason)
                .finish(),
        }
    }
}
