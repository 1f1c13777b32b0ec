mod function;
mod queue;
mod service;
mod task;
mod trace;

pub use function::CreateFunctionParams;
pub use function::FunctionRecord;
pub use function::UpdateFunctionParams;
pub use queue::ClaimedQueueEntry;
pub use queue::QueueEntry;
pub use queue::QueueStatus;
pub use service::CreateServiceParams;
pub use service::ServiceRecord;
pub use service::UpdateServiceParams;
pub use task::CreateTaskParams;
pub use task::TaskRecord;
pub use task::UpdateTaskParams;
pub use trace::TraceEvent;
pub use trace::TraceEventKind;

pub(crate) use function::FunctionRow;
pub(crate) use queue::QueueRow;
pub(crate) use service::ServiceRow;
pub(crate) use task::TaskRow;
pub(crate) use trace::TraceRow;

use chrono::DateTime;
use chrono::Utc;

use crate::StoreError;

pub(crate) fn epoch_to_datetime(
    what: &'static str,
    seconds: i64,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| StoreError::corrupt(what, format!("timestamp {seconds} out of range")))
}
