//! Delivery queue
//!
//! Bounded-concurrency drain of finished artifacts to storage targets.

pub mod queue;
pub mod shipper;

pub use queue::{DeliveryQueue, EnqueueResult};
pub use shipper::{ArtifactShipper, FsArtifactShipper};
