//! SQLite-backed store for the NanoEdge runtime.
//!
//! Everything the runtime persists lives here: service, function, and task
//! records, the task queue with its append-only trace log, runtime
//! configuration, and the durable port reservation table. The store exposes
//! transactional primitives; policy (when to allocate, when to retry) stays
//! with the components that call in.

mod error;
mod migrations;
mod model;
mod store;

pub use error::PortError;
pub use error::StoreError;
pub use model::ClaimedQueueEntry;
pub use model::CreateFunctionParams;
pub use model::CreateServiceParams;
pub use model::CreateTaskParams;
pub use model::FunctionRecord;
pub use model::QueueEntry;
pub use model::QueueStatus;
pub use model::ServiceRecord;
pub use model::TaskRecord;
pub use model::TraceEvent;
pub use model::TraceEventKind;
pub use model::UpdateFunctionParams;
pub use model::UpdateServiceParams;
pub use model::UpdateTaskParams;
pub use store::Store;

/// Recognized configuration keys and their defaults.
pub mod config {
    pub const AVAILABLE_PORT_START: &str = "available_port_start";
    pub const AVAILABLE_PORT_END: &str = "available_port_end";
    pub const MAIN_PORT: &str = "main_port";
    pub const JWT_SECRET: &str = "jwt_secret";
    pub const FUNCTION_EXECUTION_TIMEOUT_MS: &str = "function_execution_timeout_ms";

    pub const DEFAULT_PORT_START: u16 = 8001;
    pub const DEFAULT_PORT_END: u16 = 8999;
    pub const DEFAULT_MAIN_PORT: u16 = 8000;
    pub const DEFAULT_FUNCTION_TIMEOUT_MS: u64 = 30_000;
}
