//! Storage-backed delay queue.
//!
//! A bounded, durable FIFO over a single memory-mapped file: every payload
//! is retained for a fixed delay after insertion and then handed to a submit
//! callback; when the queue overflows, the oldest payload is evicted through
//! the same callback. The file holds an index ring of time-stamped entries
//! and a slot store of chained payload chunks; an in-memory free list tracks
//! available slots. A read-only export mode walks a queue file without
//! mutating it.

pub mod clock;
pub mod error;
pub mod freelist;
pub mod layout;
pub mod mmap;
pub mod queue;
pub mod ring;
pub mod slots;

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use error::{Error, Result};
pub use freelist::FreeList;
pub use queue::{
    Callback, DelayQueue, QueueExport, COMMAND_CHANNEL_CAPACITY, DEFAULT_ELEMENTS,
    MIN_FIRE_DURATION,
};
pub use ring::IndexRing;
pub use slots::{SlotStore, END_OF_SLOTS, MAX_PAYLOAD, MAX_SLOTS_PER_CHAIN, SLOT_SIZE};
