use serde::Deserialize;
use serde::Serialize;

/// Capability set attached to a service or function record.
///
/// Entries are URI/path strings for `read`, `write`, and `run`, and plain
/// variable names for `env`. Network access is not listed here: it is always
/// granted to children (services must bind a listener and functions may
/// fetch), while everything below is deny-by-default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub read: Vec<String>,
    pub write: Vec<String>,
    pub env: Vec<String>,
    pub run: Vec<String>,
}

impl Permissions {
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.env.is_empty() && self.run.is_empty()
    }

    /// Append a readable root, deduplicating exact matches.
    pub fn grant_read(&mut self, root: impl Into<String>) {
        let root = root.into();
        if !self.read.contains(&root) {
            self.read.push(root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_default_to_empty() -> anyhow::Result<()> {
        let permissions: Permissions = serde_json::from_str(r#"{"read": ["/srv/static"]}"#)?;
        assert_eq!(permissions.read, vec!["/srv/static".to_string()]);
        assert_eq!(permissions.write, Vec::<String>::new());
        assert_eq!(permissions.env, Vec::<String>::new());
        assert_eq!(permissions.run, Vec::<String>::new());
        Ok(())
    }

    #[test]
    fn grant_read_deduplicates() {
        let mut permissions = Permissions::default();
        permissions.grant_read("/srv/static/hello");
        permissions.grant_read("/srv/static/hello");
        assert_eq!(permissions.read.len(), 1);
    }
}
