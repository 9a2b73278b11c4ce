//! Maintenance jobs

pub mod scratch_gc;

pub use scratch_gc::{SweepStats, sweep_scratch};
