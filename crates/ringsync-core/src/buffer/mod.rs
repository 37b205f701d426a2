//! Looped buffer bookkeeping: per-direction state, cursor tracking, block copies

pub mod block;
pub mod state;
pub mod tracker;
