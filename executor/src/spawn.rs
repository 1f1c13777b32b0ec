use std::path::Path;
use std::process::Stdio;
use tokio::process::Child;
use tokio::process::Command;
use tracing::trace;
use url::Url;

use crate::ExecutionMode;
use crate::ExecutionUnit;
use crate::ExecutorError;
use crate::adapter::MaterializedUnit;
use crate::permissions::permission_args;

/// Environment variables handed to every child. The child sees nothing else
/// from the parent environment except `PATH` (needed to resolve `run`
/// grants) and the names listed in its `env` permission.
const SERVICE_NAME_ENV_VAR: &str = "NANOEDGE_SERVICE_NAME";
const PORT_ENV_VAR: &str = "NANOEDGE_PORT";
const STATIC_URL_ENV_VAR: &str = "NANOEDGE_STATIC_URL";

pub(crate) fn spawn_child(
    runner: &Path,
    unit: &ExecutionUnit,
    materialized: &MaterializedUnit,
    static_root: &Path,
) -> Result<Child, ExecutorError> {
    let static_dir = static_root.join(unit.mode.unit_name());
    let static_url = directory_url(&static_dir)?;

    let mut cmd = Command::new(runner);
    cmd.arg("run");
    cmd.arg("--quiet");
    cmd.arg("--no-prompt");
    cmd.args(permission_args(&unit.permissions, &static_dir));
    cmd.arg(materialized.entry());
    cmd.current_dir(materialized.dir());

    cmd.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    for name in &unit.permissions.env {
        if let Ok(value) = std::env::var(name) {
            cmd.env(name, value);
        }
    }
    cmd.env("NO_COLOR", "1");
    cmd.env(SERVICE_NAME_ENV_VAR, unit.mode.unit_name());
    cmd.env(STATIC_URL_ENV_VAR, static_url.as_str());
    if let ExecutionMode::Service { port, .. } = unit.mode {
        cmd.env(PORT_ENV_VAR, port.to_string());
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Children get their own process group so a kill cannot take the
    // runtime down with it; on Linux they are also torn down if the
    // runtime dies without running its shutdown path.
    #[cfg(unix)]
    {
        cmd.process_group(0);
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    trace!(
        unit = unit.mode.unit_name(),
        runner = %runner.display(),
        "spawning sandbox child"
    );
    cmd.kill_on_drop(true)
        .spawn()
        .map_err(ExecutorError::spawn_failed)
}

fn directory_url(dir: &Path) -> Result<Url, ExecutorError> {
    let absolute = std::path::absolute(dir)?;
    // Trailing slash so relative joins resolve inside the directory.
    let mut display = absolute.to_string_lossy().to_string();
    if !display.ends_with('/') {
        display.push('/');
    }
    Url::from_directory_path(&absolute)
        .or_else(|_| Url::parse(&format!("file://{display}")))
        .map_err(|err| ExecutorError::SpawnFailed {
            message: format!("invalid static directory url: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn directory_url_is_file_scheme_with_trailing_slash() -> anyhow::Result<()> {
        let url = directory_url(Path::new("/srv/static/hello"))?;
        assert_eq!(url.scheme(), "file");
        assert_eq!(url.path(), "/srv/static/hello/");
        Ok(())
    }
}
