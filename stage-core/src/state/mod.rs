//! Shared and private state mutated by the performance loop.
//!
//! - [`Blackboard`]: the append-only log every actor sees
//! - [`MemoryBank`]: one actor's private memory

pub mod blackboard;
pub mod memory;

pub use blackboard::{Blackboard, DialogueEntry, Fact, QuoteRef};
pub use memory::{MemoryBank, MemorySnapshot, DEFAULT_SHORT_TERM_CAPACITY, LONG_TERM_VIEW};
