//! Signal queue and the processors that consume it.
//!
//! - `SignalQueue`: bounded FIFO or priority buffer with an explicit overflow policy
//! - `SignalBatcher`: count/time-bounded accumulator
//! - `RealtimeProcessor` / `BatchProcessor`: the two consumption strategies

pub mod batcher;
pub mod error;
pub mod processor;
pub mod signal_queue;

pub use batcher::SignalBatcher;
pub use error::{ProcessorError, QueueError};
pub use processor::{BatchProcessor, Processor, ProcessorState, ProcessorStats, RealtimeProcessor};
pub use signal_queue::{Enqueued, SignalComparator, SignalQueue};
