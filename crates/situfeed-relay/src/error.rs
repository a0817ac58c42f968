use situfeed_core::BusError;
use situfeed_mapping::TransformError;
use thiserror::Error;

/// Failure to hand one record or deletion notice to the bus.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Bus(#[from] BusError),
}

pub type Result<T> = std::result::Result<T, PublishError>;
