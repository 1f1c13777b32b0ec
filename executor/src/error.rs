use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn sandbox runner: {message}")]
    SpawnFailed { message: String },
    #[error("sandbox runner not found: {0}")]
    RunnerMissing(String),
    #[error("failed to materialize execution unit: {0}")]
    UnitSetup(#[from] std::io::Error),
    #[error("module failed to load: {message}")]
    ModuleLoad { message: String },
    #[error("script has no default export")]
    NoDefaultExport,
    #[error("handler threw: {message}")]
    HandlerThrew {
        message: String,
        stack: Option<String>,
    },
    #[error("execution was terminated")]
    Terminated,
    #[error("channel to sandbox closed")]
    ChannelClosed,
}

impl ExecutorError {
    pub(crate) fn spawn_failed(err: impl ToString) -> Self {
        Self::SpawnFailed {
            message: err.to_string(),
        }
    }

    /// Classify an `error` frame reported by the adapter. The adapter
    /// prefixes the message for the two load-time failures so the host can
    /// tell them apart from a throwing handler.
    pub fn from_child_report(message: &str, stack: Option<String>) -> Self {
        if let Some(rest) = message.strip_prefix("module load failed: ") {
            return Self::ModuleLoad {
                message: rest.to_string(),
            };
        }
        if message == "no default export" {
            return Self::NoDefaultExport;
        }
        Self::HandlerThrew {
            message: message.to_string(),
            stack,
        }
    }
}
