use thiserror::Error;

/// Failure of a whole fetch. Nothing from a failed fetch is ever classified.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("feed returned HTTP {0}")]
    Status(u16),
    #[error("feed transport failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("feed request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("feed body is not valid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("feed document is malformed: {0}")]
    Malformed(String),
    #[error("unexpected payload type: {0}")]
    UnexpectedPayload(String),
}

/// Failure reported by a bus client.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus send failed: {0}")]
    Send(String),
    #[error("bus send timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("bus connection closed")]
    Closed,
}
