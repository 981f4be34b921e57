//! Synchronization primitives underpinning the dispatch machinery.

pub mod queue;
pub mod semaphore;

pub use queue::{PushError, WorkQueue};
pub use semaphore::Semaphore;
