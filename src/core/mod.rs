//! Core functionality for the logger.
//!
//! This module contains:
//! - The reading store holding the latest reading per source
//! - Sampling loops polling each source at its own cadence
//! - The aggregator merging readings into fixed-format rows

pub mod aggregator;
pub mod sampler;
pub mod store;

// Re-export commonly used types
pub use aggregator::{assemble, header, Aggregator, Cell, Column, OutputRecord, COLUMN_COUNT, SENTINEL};
pub use sampler::{PollWorker, Sampler, SamplerTiming, ShutdownSignal};
pub use store::{ReadingSlot, ReadingStore, Snapshot};
