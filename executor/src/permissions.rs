use std::path::Path;

use nanoedge_protocol::Permissions;

/// Convert a capability set into Deno permission flags.
///
/// `net` is always granted: services must bind their listener and functions
/// may fetch. Everything else is allow-listed from the record's permission
/// set; the service's static directory is always readable. No flag grants
/// a blanket capability.
pub(crate) fn permission_args(permissions: &Permissions, static_dir: &Path) -> Vec<String> {
    let mut args = vec!["--allow-net".to_string()];

    let mut read = permissions.read.clone();
    let static_dir = static_dir.to_string_lossy().to_string();
    if !read.contains(&static_dir) {
        read.push(static_dir);
    }
    args.push(list_flag("--allow-read", &read));

    if !permissions.write.is_empty() {
        args.push(list_flag("--allow-write", &permissions.write));
    }
    if !permissions.env.is_empty() {
        args.push(list_flag("--allow-env", &permissions.env));
    }
    if !permissions.run.is_empty() {
        args.push(list_flag("--allow-run", &permissions.run));
    }

    args
}

fn list_flag(flag: &str, entries: &[String]) -> String {
    format!("{flag}={}", entries.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn net_is_always_granted_and_static_dir_readable() {
        let args = permission_args(&Permissions::default(), Path::new("/srv/static/hello"));
        assert_eq!(
            args,
            vec![
                "--allow-net".to_string(),
                "--allow-read=/srv/static/hello".to_string(),
            ]
        );
    }

    #[test]
    fn declared_grants_become_scoped_flags() {
        let permissions = Permissions {
            read: vec!["/data".to_string()],
            write: vec!["/tmp/out".to_string()],
            env: vec!["HOME".to_string(), "LANG".to_string()],
            run: vec!["/usr/bin/convert".to_string()],
        };
        let args = permission_args(&permissions, Path::new("/srv/static/svc"));
        assert_eq!(
            args,
            vec![
                "--allow-net".to_string(),
                "--allow-read=/data,/srv/static/svc".to_string(),
                "--allow-write=/tmp/out".to_string(),
                "--allow-env=HOME,LANG".to_string(),
                "--allow-run=/usr/bin/convert".to_string(),
            ]
        );
    }

    #[test]
    fn static_dir_is_not_duplicated() {
        let permissions = Permissions {
            read: vec!["/srv/static/svc".to_string()],
            ..Default::default()
        };
        let args = permission_args(&permissions, Path::new("/srv/static/svc"));
        assert_eq!(args[1], "--allow-read=/srv/static/svc");
    }
}
