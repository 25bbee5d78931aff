//! Memory Manager - object registry and cycle collection
//!
//! This component provides:
//! - A heap registry holding weak handles to every allocated object
//! - A trace-and-dereference collector that breaks reference cycles
//!   unreachable from a given root set

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gc;
pub mod heap;

// Re-export main types
pub use gc::{CollectStats, Collector, MarkColor, Marker};
pub use heap::Heap;
