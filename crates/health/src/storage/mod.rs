//! Storage layer for synced records
//!
//! Provides the [`Sink`] trait with file-backed ([`CsvSink`]) and in-memory
//! ([`MemorySink`]) implementations.

mod aggregate;
mod buffer;
mod csv;
mod memory;
mod traits;

pub use aggregate::{Records, TIMESTAMP_FORMAT, daily_sum};
pub use buffer::MetricBuffers;
pub use csv::CsvSink;
pub use memory::{MemoryOutputs, MemorySink};
pub use traits::{FlushReport, Sink};
