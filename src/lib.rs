//! Ringsync - producer/consumer sync over looped hardware audio buffers
//!
//! This library re-exports the session, backends and diagnostics from
//! `ringsync-core`, plus the tone producer loop the `ringsync` binary runs.

pub use ringsync_core::{backend, buffer, clock, config, error, session, stats};

pub use ringsync_core::{
    Backend, BackendError, BufferPhase, Clock, DeviceSession, ManualClock, MonotonicClock,
    SessionConfig, SessionError, SessionStats, WrapCorrection,
};
pub use ringsync_core::{DEFAULT_BUFFER_BYTES, DEFAULT_CHANNELS, DEFAULT_FRAME_RATE, VERSION};

pub mod stream;
