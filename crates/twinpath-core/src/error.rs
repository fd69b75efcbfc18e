use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwinpathError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("a dispatcher is already running for this orchestrator")]
    DispatcherRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TwinpathError>;
