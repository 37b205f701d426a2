//! Producer loop feeding a tone through a [`DeviceSession`]
//!
//! Polls at a fixed interval, tops the output buffer up to its free space
//! and drains the capture buffer when one is open.

use ringsync_core::{DeviceSession, SessionError};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Interleaved 16-bit sine generator, same sample on every channel
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    phase: f32,
    step: f32,
    amplitude: f32,
    channels: usize,
}

impl ToneGenerator {
    pub fn new(frequency: f32, frame_rate: u32, channels: u16) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / frame_rate as f32,
            amplitude: 0.25,
            channels: channels.max(1) as usize,
        }
    }

    /// Fill `out` with whole frames; a trailing partial frame is left silent
    pub fn fill(&mut self, out: &mut [u8]) {
        let frame_bytes = self.channels * 2;
        let mut frames = out.chunks_exact_mut(frame_bytes);
        for frame in frames.by_ref() {
            let value = (self.phase.sin() * self.amplitude * i16::MAX as f32) as i16;
            for sample in frame.chunks_exact_mut(2) {
                sample.copy_from_slice(&value.to_le_bytes());
            }
            self.phase = (self.phase + self.step) % TAU;
        }
        frames.into_remainder().fill(0);
    }
}

/// How long and how the producer runs
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub duration: Duration,
    pub poll_interval: Duration,
    /// One producer stall injected halfway through
    pub stall: Option<Duration>,
    pub tone_hz: f32,
}

/// Totals gathered by [`run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub polls: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub lock_retries: u64,
}

/// Stream a tone until `duration` elapses or `running` clears.
///
/// The output buffer must be initialised; the input side is drained when it
/// is initialised too. Both are started here and stopped on exit.
pub fn run(
    session: &mut DeviceSession,
    options: &StreamOptions,
    running: &AtomicBool,
) -> anyhow::Result<StreamReport> {
    let (frame_rate, channels) = match session.output_state() {
        Some(state) => (state.frame_rate(), (state.frame_size() / 2) as u16),
        None => anyhow::bail!("output buffer is not initialised"),
    };
    let mut tone = ToneGenerator::new(options.tone_hz, frame_rate, channels);
    let mut report = StreamReport::default();
    let mut scratch = Vec::new();
    let capture = session.input_state().is_some();

    // Prime the whole buffer before the hardware starts reading it
    top_up(session, &mut tone, &mut scratch, &mut report)?;
    session.start_output()?;
    if capture {
        session.start_input()?;
    }

    let started = Instant::now();
    let mut stall = options.stall;
    while running.load(Ordering::SeqCst) && started.elapsed() < options.duration {
        std::thread::sleep(options.poll_interval);

        if started.elapsed() >= options.duration / 2 {
            if let Some(pause) = stall.take() {
                tracing::info!(stall_ms = pause.as_millis() as u64, "Injecting producer stall");
                std::thread::sleep(pause);
            }
        }

        top_up(session, &mut tone, &mut scratch, &mut report)?;
        if capture {
            drain(session, &mut scratch, &mut report)?;
        }
        report.polls += 1;
    }

    session.stop_output()?;
    if capture {
        session.stop_input()?;
    }
    tracing::info!(
        polls = report.polls,
        bytes_written = report.bytes_written,
        bytes_read = report.bytes_read,
        "Stream finished"
    );
    Ok(report)
}

fn top_up(
    session: &mut DeviceSession,
    tone: &mut ToneGenerator,
    scratch: &mut Vec<u8>,
    report: &mut StreamReport,
) -> anyhow::Result<()> {
    let space = session.query_output_space()?;
    if space == 0 {
        return Ok(());
    }
    scratch.resize(space, 0);
    tone.fill(scratch);
    match session.write_block(scratch) {
        Ok(written) => report.bytes_written += written as u64,
        Err(e @ SessionError::LockFailed { .. }) => {
            tracing::debug!(error = %e, "Write lock raced the hardware, retrying next poll");
            report.lock_retries += 1;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn drain(
    session: &mut DeviceSession,
    scratch: &mut Vec<u8>,
    report: &mut StreamReport,
) -> anyhow::Result<()> {
    let filled = session.query_input_filled()?;
    if filled == 0 {
        return Ok(());
    }
    scratch.resize(filled, 0);
    match session.read_block(scratch) {
        Ok(read) => report.bytes_read += read as u64,
        Err(e) if e.is_retriable() => {
            tracing::debug!(error = %e, "Read lock raced the hardware, retrying next poll");
            report.lock_retries += 1;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
