use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mapping config not found: {0}")]
    NotFound(String),
    #[error("failed to read mapping config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid mapping config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid mapping for {type_name}: {reason}")]
    Invalid { type_name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("object graph nested deeper than {0} levels")]
    TooDeep(usize),
    #[error("field `{0}` holds a number JSON cannot represent")]
    NonFiniteNumber(String),
    #[error("record of type {0} does not produce a wire object")]
    NotAnObject(String),
}

pub type Result<T> = std::result::Result<T, TransformError>;
