//! Sequencing domain - scope counters and account update numbering.

pub mod allocator;
pub mod updates;

pub use allocator::{
    allocate_batch_in, allocate_next_in, AllocationError, SequenceAllocator, MAX_BATCH_SIZE,
};
pub use updates::next_update;
