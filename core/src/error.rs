use nanoedge_executor::ExecutorError;
use nanoedge_state::PortError;
use nanoedge_state::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service `{0}` not found")]
    NotFound(String),
    #[error("service `{name}` failed to start: {message}")]
    StartFailed { name: String, message: String },
    #[error("no free port remains in the configured range")]
    PortsExhausted,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Port(PortError),
}

impl From<PortError> for ServiceError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::Exhausted => ServiceError::PortsExhausted,
            other => ServiceError::Port(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("function `{0}` not found")]
    NotFound(String),
    #[error("function `{0}` is disabled")]
    Disabled(String),
    #[error("function execution timed out after {0} ms")]
    Timeout(u64),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
