//! Sink Implementations
//!
//! Concrete notification and table sinks: JSON-lines files for local runs
//! and in-memory sinks for tests and embedding.

mod jsonl;
mod memory;

pub use jsonl::{JsonlNotificationSink, JsonlTableSink};
pub use memory::{MemoryNotificationSink, MemoryTableSink};
