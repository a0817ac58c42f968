#![warn(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod node;
pub mod record;
pub mod topic;
pub mod xml;

use async_trait::async_trait;

pub use error::{BusError, FetchError};
pub use node::{Node, Object, Scalar};
pub use record::{Deletion, KnownRecord, Location, Publication, SituationRecord};

/// Produces one complete publication per call, or fails as a whole.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self) -> Result<Publication, FetchError>;
}

/// Delivers a payload to a topic with at-least-once semantics.
#[async_trait]
pub trait BusClient: Send + Sync + 'static {
    async fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}
