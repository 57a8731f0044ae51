use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rigger_domain::{BackendKind, Configuration, TemplateConfig, VariableTree};
use tracing::{debug, info};

use crate::env::Environment;
use crate::error::ConfigError;
use crate::fs_util::absolute_normalized;
use crate::resolver::Resolver;
use crate::template::{AnsibleContext, BackendContext, RenderContext, TerraformContext};
use crate::workspace::WorkspaceLayout;

/// Configuration file read when none is given on the command line.
pub const DEFAULT_CONFIG_FILE: &str = "rigger.yaml";
/// Optional file at the root of a template source.
pub const TEMPLATE_CONFIG_FILE: &str = "template-cfg.yaml";

/// A configuration file with its environment selected and all references resolved.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Absolute path of the configuration file.
    pub path: PathBuf,
    pub environment: String,
    pub config: Configuration,
    /// Resolved variables of the selected environment.
    pub variables: VariableTree,
}

impl LoadedConfig {
    /// Read, parse, validate and resolve the configuration at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, the environment
    /// has no variables, a reference cannot be resolved, or validation fails.
    pub fn load<E: Environment + ?Sized>(
        path: &Path,
        environment: &str,
        env: &E,
    ) -> Result<Self, ConfigError> {
        let path = absolute_normalized(path).map_err(|source| ConfigError::Absolute {
            path: path.to_path_buf(),
            source,
        })?;
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Configuration =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), environment, "loaded configuration");

        Self::from_configuration(path, config, environment, env)
    }

    /// Validate and resolve an already parsed configuration.
    ///
    /// # Errors
    ///
    /// See [`LoadedConfig::load`].
    pub fn from_configuration<E: Environment + ?Sized>(
        path: PathBuf,
        mut config: Configuration,
        environment: &str,
        env: &E,
    ) -> Result<Self, ConfigError> {
        validate(&config)?;

        let mut variables = if config.variables.is_empty() {
            VariableTree::new()
        } else {
            config.variables.get(environment).cloned().ok_or_else(|| {
                ConfigError::UnknownEnvironment {
                    environment: environment.to_string(),
                    path: path.clone(),
                }
            })?
        };

        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let resolver = Resolver::new(env, base_dir);
        resolver
            .resolve_tree(&mut variables)
            .map_err(|source| ConfigError::Resolve {
                field: "variables".to_string(),
                path: path.clone(),
                source,
            })?;

        if let Some(local) = config
            .terraform
            .as_mut()
            .and_then(|terraform| terraform.backend.as_mut())
            .and_then(|backend| backend.local.as_mut())
        {
            for (field, value) in [
                ("terraform.backend.local.path", &mut local.path),
                ("terraform.backend.local.workspace", &mut local.workspace),
            ] {
                if let Some(raw) = value.as_mut() {
                    *raw = resolver
                        .resolve_scalar(raw)
                        .map_err(|source| ConfigError::Resolve {
                            field: field.to_string(),
                            path: path.clone(),
                            source,
                        })?;
                }
            }
        }
        debug!(variables = variables.len(), "resolved configuration variables");

        Ok(Self {
            path,
            environment: environment.to_string(),
            config,
            variables,
        })
    }

    /// Directory containing the configuration file.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    /// Build the template context, filling unset local backend paths from `layout`.
    #[must_use]
    pub fn render_context(
        &self,
        layout: &WorkspaceLayout,
        template: Option<&TemplateConfig>,
    ) -> RenderContext {
        let terraform = self.config.terraform.as_ref().map(|terraform| TerraformContext {
            backend: terraform.backend.as_ref().map(|backend| {
                let local = backend.local.clone().unwrap_or_default();
                match backend.kind {
                    BackendKind::Local => BackendContext {
                        kind: backend.kind.as_str().to_string(),
                        path: Some(self.local_path(local.path, &layout.default_state_file())),
                        workspace: Some(
                            self.local_path(local.workspace, &layout.default_state_workspace()),
                        ),
                    },
                    BackendKind::Remote => BackendContext {
                        kind: backend.kind.as_str().to_string(),
                        path: local.path,
                        workspace: local.workspace,
                    },
                }
            }),
            providers: terraform.providers.clone(),
        });

        let roles_dir = template
            .and_then(|template| template.ansible_roles_dir.as_ref())
            .map(|dir| dir.display().to_string());
        let ansible = match (&self.config.ansible, roles_dir) {
            (None, None) => None,
            (ansible, roles_dir) => Some(AnsibleContext {
                inventory_file: ansible.as_ref().and_then(|a| a.inventory_file.clone()),
                playbook_file: ansible.as_ref().and_then(|a| a.playbook_file.clone()),
                roles_dir,
            }),
        };

        RenderContext {
            vars: self.variables.clone(),
            tags: self.config.tags.clone(),
            template_repo: self.config.template_repo.clone(),
            template_version: self.config.template_version.clone(),
            template_dir: self.config.template_dir.clone(),
            terraform,
            ansible,
        }
    }

    fn local_path(&self, configured: Option<String>, default: &Path) -> String {
        match configured.filter(|value| !value.is_empty()) {
            Some(value) if Path::new(&value).is_absolute() => value,
            Some(value) => self.base_dir().join(value).display().to_string(),
            None => default.display().to_string(),
        }
    }
}

fn validate(config: &Configuration) -> Result<(), ConfigError> {
    let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());
    if !present(config.template_repo.as_deref()) && !present(config.template_dir.as_deref()) {
        return Err(ConfigError::MissingTemplateSource);
    }
    if config
        .terraform
        .as_ref()
        .is_some_and(|terraform| terraform.providers.is_empty())
    {
        return Err(ConfigError::NoTerraformProviders);
    }
    Ok(())
}

/// Load `template-cfg.yaml` from `template_root`, joining relative paths onto it.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_template_config(template_root: &Path) -> Result<Option<TemplateConfig>, ConfigError> {
    let path = template_root.join(TEMPLATE_CONFIG_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "template config file does not exist");
            return Ok(None);
        }
        Err(source) => return Err(ConfigError::TemplateConfigRead { path, source }),
    };
    let mut template: TemplateConfig =
        serde_yaml::from_str(&content).map_err(|source| ConfigError::TemplateConfigParse {
            path: path.clone(),
            source,
        })?;

    for dir in [
        &mut template.terraform_extra_dir,
        &mut template.ansible_extra_dir,
        &mut template.ansible_roles_dir,
    ]
    .into_iter()
    .flatten()
    {
        if dir.is_relative() {
            *dir = template_root.join(&*dir);
        }
    }
    debug!(path = %path.display(), ?template, "loaded template config");
    Ok(Some(template))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::{Path, PathBuf};

    use rigger_domain::{Configuration, Value};

    use super::{LoadedConfig, TEMPLATE_CONFIG_FILE, load_template_config};
    use crate::env::MapEnvironment;
    use crate::error::{ConfigError, ResolveError};
    use crate::workspace::WorkspaceLayout;

    const CONFIG: &str = r"
template-dir: templates
terraform:
  backend:
    type: local
  providers: [hcloud]
ansible:
  inventory-file: inventory.ini
  playbook-file: site.yaml
variables:
  default:
    token: fromenv:HCLOUD_TOKEN
    key: fromfile:keys/id.pub
    region: fsn1
  staging:
    region: nbg1
tags:
  owner: ops
";

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("rigger.yaml");
        fs::write(&path, content).expect("write config");
        path
    }

    #[test]
    fn loads_and_resolves_selected_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), CONFIG);
        fs::create_dir_all(temp.path().join("keys")).expect("mkdir");
        fs::write(temp.path().join("keys/id.pub"), "ssh-ed25519 AAAA\n").expect("write key");
        let env = MapEnvironment::new().with_var("HCLOUD_TOKEN", "secret");

        let loaded = LoadedConfig::load(&path, "default", &env).expect("load");

        assert_eq!(loaded.variables.get("token"), Some(&Value::from("secret")));
        assert_eq!(
            loaded.variables.get("key"),
            Some(&Value::from("ssh-ed25519 AAAA"))
        );
        assert_eq!(loaded.base_dir(), temp.path());
    }

    #[test]
    fn blank_variables_load_as_null() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            temp.path(),
            "template-dir: templates\nvariables:\n  default:\n    optional_thing:\n    other: ~\n    name: web\n",
        );

        let loaded = LoadedConfig::load(&path, "default", &MapEnvironment::new()).expect("load");

        assert_eq!(loaded.variables.get("optional_thing"), Some(&Value::Null));
        assert_eq!(loaded.variables.get("other"), Some(&Value::Null));
        assert_eq!(loaded.variables.get("name"), Some(&Value::from("web")));
    }

    #[test]
    fn selects_other_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), CONFIG);

        let loaded = LoadedConfig::load(&path, "staging", &MapEnvironment::new()).expect("load");
        assert_eq!(loaded.variables.get("region"), Some(&Value::from("nbg1")));
        assert_eq!(loaded.variables.len(), 1);
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), CONFIG);

        let error = LoadedConfig::load(&path, "prod", &MapEnvironment::new()).expect_err("prod");
        assert!(matches!(error, ConfigError::UnknownEnvironment { .. }));
    }

    #[test]
    fn unset_reference_names_the_variable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), CONFIG);

        let error = LoadedConfig::load(&path, "default", &MapEnvironment::new())
            .expect_err("unset variable");
        let ConfigError::Resolve { source, .. } = error else {
            unreachable!("expected resolve error");
        };
        let ResolveError::AtKey { key, source } = source else {
            unreachable!("expected keyed error");
        };
        assert_eq!(key, "token");
        assert!(matches!(
            *source,
            ResolveError::UnsetEnvironmentVariable { ref name } if name == "HCLOUD_TOKEN"
        ));
    }

    #[test]
    fn missing_template_source_is_rejected() {
        let error = LoadedConfig::from_configuration(
            PathBuf::from("/w/rigger.yaml"),
            Configuration::default(),
            "default",
            &MapEnvironment::new(),
        )
        .expect_err("no source");
        assert!(matches!(error, ConfigError::MissingTemplateSource));
    }

    #[test]
    fn terraform_without_providers_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            temp.path(),
            "template-dir: t\nterraform:\n  providers: []\n",
        );
        let error =
            LoadedConfig::load(&path, "default", &MapEnvironment::new()).expect_err("providers");
        assert!(matches!(error, ConfigError::NoTerraformProviders));
    }

    #[test]
    fn render_context_fills_default_backend_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_config(temp.path(), CONFIG);
        let env = MapEnvironment::new()
            .with_var("HCLOUD_TOKEN", "secret")
            .with_home(temp.path());
        fs::create_dir_all(temp.path().join("keys")).expect("mkdir");
        fs::write(temp.path().join("keys/id.pub"), "k").expect("write key");
        let loaded = LoadedConfig::load(&path, "default", &env).expect("load");
        let layout =
            WorkspaceLayout::derive(temp.path(), &loaded.config, &loaded.path).expect("layout");

        let context = loaded.render_context(&layout, None);
        let backend = context
            .terraform
            .and_then(|terraform| terraform.backend)
            .expect("backend");
        assert_eq!(backend.kind, "local");
        assert_eq!(
            backend.path,
            Some(layout.default_state_file().display().to_string())
        );
        let ansible = context.ansible.expect("ansible");
        assert_eq!(ansible.playbook_file.as_deref(), Some("site.yaml"));
        assert_eq!(context.tags.get("owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn template_config_paths_are_joined_onto_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(
            temp.path().join(TEMPLATE_CONFIG_FILE),
            "terraform-extra-dir: tf-extra\nansible-roles-dir: /opt/roles\n",
        )
        .expect("write template config");

        let template = load_template_config(temp.path())
            .expect("load")
            .expect("present");
        assert_eq!(
            template.terraform_extra_dir,
            Some(temp.path().join("tf-extra"))
        );
        assert_eq!(template.ansible_roles_dir, Some(PathBuf::from("/opt/roles")));
        assert_eq!(template.ansible_extra_dir, None);
    }

    #[test]
    fn missing_template_config_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(load_template_config(temp.path()).expect("load").is_none());
    }
}
