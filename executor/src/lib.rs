//! Isolated execution of user-supplied JavaScript.
//!
//! Each execution unit — a source string plus a capability set — runs in its
//! own Deno child process. The capability set maps directly onto Deno's
//! permission flags (deny-by-default; `net` always granted), and the host
//! talks to a small adapter prelude over newline-delimited JSON on the
//! child's stdio. See `adapter/` for the two delivery modes.

mod adapter;
mod error;
mod handle;
mod permissions;
mod spawn;

pub use error::ExecutorError;
pub use handle::ExecutorHandle;

use std::path::Path;
use std::path::PathBuf;

use nanoedge_protocol::Permissions;

use crate::adapter::materialize_unit;
use crate::spawn::spawn_child;

/// How the unit's reply is delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Long-lived HTTP handler bound to a pre-assigned local port.
    Service { service_name: String, port: u16 },
    /// One-shot request/response or streaming invocation.
    Function { function_name: String },
}

impl ExecutionMode {
    pub(crate) fn unit_name(&self) -> &str {
        match self {
            ExecutionMode::Service { service_name, .. } => service_name,
            ExecutionMode::Function { function_name } => function_name,
        }
    }
}

/// One unit of execution: user code, its grants, and a delivery mode.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub code: String,
    pub permissions: Permissions,
    pub mode: ExecutionMode,
}

/// Spawns sandboxed children for execution units.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    runner: PathBuf,
    static_root: PathBuf,
}

impl ScriptExecutor {
    /// Locate the sandbox runner on PATH. `static_root` is the directory
    /// whose `<service_name>/` subdirectories hold uploaded static assets.
    pub fn new(static_root: PathBuf) -> Result<Self, ExecutorError> {
        let runner = which::which("deno")
            .map_err(|err| ExecutorError::RunnerMissing(err.to_string()))?;
        Ok(Self {
            runner,
            static_root,
        })
    }

    /// Use an explicit runner binary instead of resolving `deno` from PATH.
    pub fn with_runner(runner: PathBuf, static_root: PathBuf) -> Self {
        Self {
            runner,
            static_root,
        }
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    /// Materialize the unit into a scratch directory and spawn the child.
    /// The returned handle owns every resource; dropping it kills the child
    /// and removes the scratch directory.
    pub async fn spawn(&self, unit: ExecutionUnit) -> Result<ExecutorHandle, ExecutorError> {
        let materialized = materialize_unit(&unit).await?;
        let child = spawn_child(&self.runner, &unit, &materialized, &self.static_root)?;
        Ok(ExecutorHandle::new(child, materialized))
    }
}
