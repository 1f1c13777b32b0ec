//! The NanoEdge runtime plane: service lifecycle + reverse proxy, the
//! per-invocation function dispatcher, and the queue executor that drains
//! durable tasks. All persistence goes through `nanoedge-state`; all child
//! processes go through `nanoedge-executor`.

mod error;
mod functions;
mod proxy;
mod queue;
mod services;

pub use error::InvokeError;
pub use error::ServiceError;
pub use functions::FunctionDispatcher;
pub use functions::Reply;
pub use functions::StreamEvent;
pub use proxy::forward;
pub use queue::QueueExecutor;
pub use services::RunningService;
pub use services::ServiceManager;
pub use services::ServiceStatus;
pub use services::ServiceSummary;
