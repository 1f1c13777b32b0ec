use std::path::PathBuf;

use tempfile::TempDir;

use crate::ExecutionMode;
use crate::ExecutionUnit;
use crate::ExecutorError;

const SERVICE_ADAPTER: &str = include_str!("service.js");
const FUNCTION_ADAPTER: &str = include_str!("function.js");

/// An execution unit written out as a scratch directory: the user code in
/// `unit.js` and the mode's adapter prelude as the entry module. The
/// directory is removed when this value drops.
#[derive(Debug)]
pub(crate) struct MaterializedUnit {
    dir: TempDir,
    entry: PathBuf,
}

impl MaterializedUnit {
    pub(crate) fn entry(&self) -> &PathBuf {
        &self.entry
    }

    pub(crate) fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }
}

pub(crate) async fn materialize_unit(
    unit: &ExecutionUnit,
) -> Result<MaterializedUnit, ExecutorError> {
    let dir = tempfile::Builder::new().prefix("nanoedge-unit-").tempdir()?;
    tokio::fs::write(dir.path().join("unit.js"), unit.code.as_bytes()).await?;

    let adapter = match unit.mode {
        ExecutionMode::Service { .. } => SERVICE_ADAPTER,
        ExecutionMode::Function { .. } => FUNCTION_ADAPTER,
    };
    let entry = dir.path().join("main.js");
    tokio::fs::write(&entry, adapter.as_bytes()).await?;

    Ok(MaterializedUnit { dir, entry })
}
