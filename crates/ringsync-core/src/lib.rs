//! Ringsync Core - producer/consumer sync over looped hardware buffers
//!
//! Drives an application's PCM stream into (and out of) a looped buffer
//! whose hardware exposes only a modulo position register. The session
//! reports free space and captured data, copies blocks across the wrap
//! point, and detects underflow and overflow, using a high-resolution clock
//! to recover laps the position register cannot show.

pub mod backend;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod session;
pub mod stats;

pub use backend::{AudioBackend, Backend, BufferStatus, Cursors, DeviceInfo, WaveFormat};
pub use buffer::state::{BufferPhase, InputBufferState, OutputBufferState, WrapCorrection};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::SessionConfig;
pub use error::{BackendError, SessionError};
pub use session::DeviceSession;
pub use stats::SessionStats;

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default frame rate (CD audio)
pub const DEFAULT_FRAME_RATE: u32 = 44100;

/// Default interleaved channel count
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default looped buffer size: 2048 stereo 16-bit frames
pub const DEFAULT_BUFFER_BYTES: usize = 8192;
