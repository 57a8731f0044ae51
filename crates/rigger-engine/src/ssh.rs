use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rigger_domain::{Value, VariableTree};
use tracing::{debug, info};

use crate::error::SshConfigError;
use crate::fs_util::write_if_changed;
use crate::workspace::path_fingerprint;

pub const USER_VAR: &str = "ansible_user";
pub const PRIVATE_KEY_VAR: &str = "ansible_ssh_private_key";
pub const BASTION_VAR: &str = "bastion_address";
/// Variable set to the generated config's path.
pub const SSH_CONFIG_VAR: &str = "ssh_config_file";
const FINGERPRINT_LEN: usize = 8;

/// Connection settings read from the variable tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    pub user: String,
    pub private_key: String,
    pub bastion: Option<String>,
}

impl SshSettings {
    /// `None` unless both the user and private key variables are set.
    #[must_use]
    pub fn from_variables(variables: &VariableTree) -> Option<Self> {
        let text = |name: &str| {
            variables
                .get(name)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            user: text(USER_VAR)?,
            private_key: text(PRIVATE_KEY_VAR)?,
            bastion: text(BASTION_VAR),
        })
    }

    /// OpenSSH client configuration for these settings.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        match &self.bastion {
            Some(bastion) => {
                self.push_host(&mut out, bastion, None);
                out.push('\n');
                self.push_host(&mut out, &format!("* !{bastion}"), Some(bastion));
            }
            None => self.push_host(&mut out, "*", None),
        }
        out
    }

    fn push_host(&self, out: &mut String, pattern: &str, jump: Option<&str>) {
        let _ = writeln!(out, "Host {pattern}");
        let _ = writeln!(out, "    User {}", self.user);
        let _ = writeln!(out, "    IdentityFile {}", self.private_key);
        let _ = writeln!(out, "    IdentitiesOnly yes");
        let _ = writeln!(out, "    StrictHostKeyChecking accept-new");
        if let Some(jump) = jump {
            let _ = writeln!(out, "    ProxyJump {}@{jump}", self.user);
        }
    }
}

/// Where the SSH config for `config_path` is written inside `dir`.
#[must_use]
pub fn ssh_config_path(dir: &Path, config_path: &Path) -> PathBuf {
    dir.join(format!(
        "ssh_config_{}",
        path_fingerprint(config_path, FINGERPRINT_LEN)
    ))
}

/// Write an SSH config into `dir` when the variables carry SSH settings and
/// point `ssh_config_file` at it.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_ssh_config(
    variables: &mut VariableTree,
    config_path: &Path,
    dir: &Path,
) -> Result<Option<PathBuf>, SshConfigError> {
    let Some(settings) = SshSettings::from_variables(variables) else {
        debug!("no SSH settings in variables, not writing SSH config");
        return Ok(None);
    };

    let path = ssh_config_path(dir, config_path);
    write_if_changed(&path, &settings.render()).map_err(|source| SshConfigError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), bastion = settings.bastion.is_some(), "wrote SSH config");

    variables.insert(
        SSH_CONFIG_VAR.to_string(),
        Value::String(path.display().to_string()),
    );
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::Path;

    use rigger_domain::{Value, VariableTree};

    use super::{SSH_CONFIG_VAR, SshSettings, ssh_config_path, write_ssh_config};

    fn variables(bastion: Option<&str>) -> VariableTree {
        let mut variables = VariableTree::new();
        variables.insert("ansible_user".to_string(), Value::from("deploy"));
        variables.insert(
            "ansible_ssh_private_key".to_string(),
            Value::from("/keys/id_ed25519"),
        );
        if let Some(bastion) = bastion {
            variables.insert("bastion_address".to_string(), Value::from(bastion));
        }
        variables
    }

    #[test]
    fn writes_config_and_sets_variable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut vars = variables(None);
        let config_path = Path::new("/path/to/config.yaml");

        let path = write_ssh_config(&mut vars, config_path, temp.path())
            .expect("write")
            .expect("written");

        assert_eq!(path, ssh_config_path(temp.path(), config_path));
        assert_eq!(
            vars.get(SSH_CONFIG_VAR),
            Some(&Value::String(path.display().to_string()))
        );
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.starts_with("Host *\n    User deploy\n"));
        assert!(!content.contains("ProxyJump"));
    }

    #[test]
    fn bastion_adds_proxy_jump_for_other_hosts() {
        let settings = SshSettings::from_variables(&variables(Some("bastion.example.com")))
            .expect("settings");
        let rendered = settings.render();

        assert!(rendered.starts_with("Host bastion.example.com\n"));
        assert!(rendered.contains("Host * !bastion.example.com\n"));
        assert!(rendered.ends_with("    ProxyJump deploy@bastion.example.com\n"));
    }

    #[test]
    fn missing_settings_write_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut vars = VariableTree::new();
        vars.insert("ansible_user".to_string(), Value::from("deploy"));

        let written =
            write_ssh_config(&mut vars, Path::new("/c.yaml"), temp.path()).expect("write");
        assert!(written.is_none());
        assert!(!vars.contains_key(SSH_CONFIG_VAR));
    }

    #[test]
    fn path_depends_on_config_file() {
        let dir = Path::new("/tmp");
        assert_ne!(
            ssh_config_path(dir, Path::new("/a/config.yaml")),
            ssh_config_path(dir, Path::new("/b/config.yaml"))
        );
    }
}
