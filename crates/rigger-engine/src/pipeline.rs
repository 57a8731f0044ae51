use std::path::{Path, PathBuf};

use rigger_domain::{Category, CategoryReport, RenderReport, TemplateConfig};
use tracing::{info, warn};

use crate::config::{LoadedConfig, load_template_config};
use crate::env::Environment;
use crate::error::{PipelineError, RenderError, WorkspaceError};
use crate::executor::{AnsibleExecutor, TerraformExecutor};
use crate::materialize::{CategoryJob, CategoryRequirement, materialize_category};
use crate::ssh::write_ssh_config;
use crate::template::TemplateRenderer;
use crate::workspace::WorkspaceLayout;

/// Load the configuration and derive its workspace layout.
///
/// # Errors
///
/// Returns an error when the configuration is invalid or the home directory
/// is unavailable.
pub fn load_workspace<E: Environment + ?Sized>(
    config_path: &Path,
    environment: &str,
    env: &E,
) -> Result<(LoadedConfig, WorkspaceLayout), PipelineError> {
    let loaded = LoadedConfig::load(config_path, environment, env)?;
    let home = env
        .home_dir()
        .ok_or(WorkspaceError::HomeDirectoryUnavailable)?;
    let layout = WorkspaceLayout::derive(&home, &loaded.config, &loaded.path)?;
    Ok((loaded, layout))
}

/// Template root for a configuration without a template repository:
/// `template-dir`, relative to the configuration file.
#[must_use]
pub fn local_template_root(loaded: &LoadedConfig) -> Option<PathBuf> {
    let dir = loaded
        .config
        .template_dir
        .as_deref()
        .filter(|dir| !dir.trim().is_empty())?;
    let dir = Path::new(dir);
    Some(if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        loaded.base_dir().join(dir)
    })
}

/// Paths of external tools; `None` means look them up on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    pub terraform: Option<PathBuf>,
    pub playbook: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub skip_terraform: bool,
    pub skip_ansible: bool,
    pub tools: ToolPaths,
    /// Directory receiving the generated SSH config.
    pub ssh_config_dir: PathBuf,
}

/// A loaded configuration bound to a template source and its workspace.
#[derive(Debug, Clone)]
pub struct Session {
    pub loaded: LoadedConfig,
    pub layout: WorkspaceLayout,
    pub template_root: PathBuf,
    pub template_config: Option<TemplateConfig>,
}

impl Session {
    /// Read the template config and create the workspace directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the template config is invalid or a directory
    /// cannot be created.
    pub fn new(
        loaded: LoadedConfig,
        layout: WorkspaceLayout,
        template_root: PathBuf,
    ) -> Result<Self, PipelineError> {
        info!(path = %template_root.display(), "using template directory");
        let template_config = load_template_config(&template_root)?;
        layout.ensure()?;
        Ok(Self {
            loaded,
            layout,
            template_root,
            template_config,
        })
    }

    fn override_root(&self, category: Category) -> Option<PathBuf> {
        let template = self.template_config.as_ref()?;
        match category {
            Category::Terraform => template.terraform_extra_dir.clone(),
            Category::Ansible => template.ansible_extra_dir.clone(),
        }
    }

    fn job(&self, category: Category, requirement: CategoryRequirement) -> CategoryJob {
        CategoryJob {
            category,
            requirement,
            base_root: self.template_root.join(category.dir_name()),
            override_root: self.override_root(category),
            output_dir: self.layout.category_output(category),
        }
    }

    /// Render one category against the current variables.
    ///
    /// # Errors
    ///
    /// Returns an error when rendering or manifest reconciliation fails.
    pub fn render(
        &self,
        category: Category,
        requirement: CategoryRequirement,
    ) -> Result<CategoryReport, RenderError> {
        let context = self
            .loaded
            .render_context(&self.layout, self.template_config.as_ref());
        let renderer = TemplateRenderer::new(&context)?;
        materialize_category(&self.job(category, requirement), &renderer)
    }

    /// Render terraform (required) and ansible (optional) templates.
    ///
    /// # Errors
    ///
    /// Returns the first category failure.
    pub fn render_all(&self) -> Result<RenderReport, RenderError> {
        let mut report = self.empty_report();
        report
            .categories
            .push(self.render(Category::Terraform, CategoryRequirement::Required)?);
        report
            .categories
            .push(self.render(Category::Ansible, CategoryRequirement::Optional)?);
        Ok(report)
    }

    /// Render, provision with terraform, then configure with ansible.
    ///
    /// Terraform outputs are merged into the variables before the ansible
    /// templates are rendered.
    ///
    /// # Errors
    ///
    /// Returns the first render, tool or SSH config failure.
    pub fn setup(&mut self, options: &SetupOptions) -> Result<RenderReport, PipelineError> {
        let mut report = self.empty_report();
        report
            .categories
            .push(self.render(Category::Terraform, CategoryRequirement::Required)?);

        let terraform = self.terraform(&options.tools)?;
        if options.skip_terraform {
            info!("skipping terraform provisioning");
        } else {
            terraform.init()?;
            terraform.apply()?;
        }
        let outputs = terraform.outputs()?;
        info!(outputs = outputs.len(), "merging terraform outputs into variables");
        self.loaded.variables.extend(outputs);

        write_ssh_config(
            &mut self.loaded.variables,
            &self.loaded.path,
            &options.ssh_config_dir,
        )?;

        if options.skip_ansible {
            info!("skipping ansible configuration");
            return Ok(report);
        }

        let ansible_report = self.render(Category::Ansible, CategoryRequirement::Optional)?;
        let skipped = ansible_report.skipped;
        report.categories.push(ansible_report);
        if skipped {
            warn!("no ansible templates rendered, not running playbook");
            return Ok(report);
        }
        self.run_playbook(&options.tools)?;
        Ok(report)
    }

    /// Destroy the infrastructure managed by the rendered terraform tree.
    ///
    /// # Errors
    ///
    /// Returns an error when terraform cannot be found or fails.
    pub fn teardown(&self, tools: &ToolPaths) -> Result<(), PipelineError> {
        self.terraform(tools)?.destroy()?;
        Ok(())
    }

    /// Render everything, then `terraform init`, `validate` and `plan`.
    ///
    /// # Errors
    ///
    /// Returns the first render or terraform failure.
    pub fn test_template(&self, tools: &ToolPaths) -> Result<RenderReport, PipelineError> {
        let report = self.render_all()?;
        let terraform = self.terraform(tools)?;
        terraform.init()?;
        terraform.validate()?;
        terraform.plan()?;
        info!("template validation successful");
        Ok(report)
    }

    fn terraform(&self, tools: &ToolPaths) -> Result<TerraformExecutor, PipelineError> {
        Ok(TerraformExecutor::locate(
            tools.terraform.as_deref(),
            self.layout.category_output(Category::Terraform),
        )?)
    }

    fn run_playbook(&self, tools: &ToolPaths) -> Result<(), PipelineError> {
        let ansible = self.loaded.config.ansible.as_ref();
        let inventory = ansible.and_then(|ansible| ansible.inventory_file.as_deref());
        let playbook = ansible.and_then(|ansible| ansible.playbook_file.as_deref());
        let (Some(inventory), Some(playbook)) = (inventory, playbook) else {
            warn!("ansible inventory file or playbook not specified, not running playbook");
            return Ok(());
        };

        let roles_dir = self
            .template_config
            .as_ref()
            .and_then(|template| template.ansible_roles_dir.clone());
        AnsibleExecutor::locate(
            tools.playbook.as_deref(),
            self.layout.category_output(Category::Ansible),
            roles_dir,
        )?
        .run_playbook(inventory, playbook)?;
        Ok(())
    }

    fn empty_report(&self) -> RenderReport {
        RenderReport {
            target: Some(format!(
                "{} [{}]",
                self.loaded.path.display(),
                self.loaded.environment
            )),
            categories: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::Path;

    use rigger_domain::Category;

    use super::{Session, load_workspace, local_template_root};
    use crate::env::MapEnvironment;
    use crate::ledger::MANIFEST_FILE_NAME;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, content).expect("write");
    }

    fn session(root: &Path, config: &str) -> Session {
        let config_path = root.join("project/rigger.yaml");
        write(&config_path, config);
        let env = MapEnvironment::new()
            .with_var("DNS_TOKEN", "dns-secret")
            .with_home(root.join("home"));
        let (loaded, layout) = load_workspace(&config_path, "default", &env).expect("load");
        let template_root = local_template_root(&loaded).expect("template root");
        Session::new(loaded, layout, template_root).expect("session")
    }

    const CONFIG: &str = "\
template-dir: templates
output-dir: out
terraform:
  backend:
    type: local
  providers: [hcloud]
variables:
  default:
    dns_token: $DNS_TOKEN
    servers: [web, db]
";

    #[test]
    fn render_all_writes_both_categories_with_override() {
        let temp = tempfile::tempdir().expect("tempdir");
        let templates = temp.path().join("project/templates");
        write(
            &templates.join("terraform/main.tf.tmpl"),
            "token = \"[[ vars.dns_token ]]\"\nstate = \"[[ terraform.backend.path ]]\"\n",
        );
        write(&templates.join("terraform/vars.tf"), "base");
        write(&templates.join("tf-extra/vars.tf"), "override");
        write(
            &templates.join("template-cfg.yaml"),
            "terraform-extra-dir: tf-extra\n",
        );
        write(
            &templates.join("ansible/inventory.ini.tmpl"),
            "[% for s in vars.servers %][[ s ]]\n[% endfor %]",
        );

        let session = session(temp.path(), CONFIG);
        let report = session.render_all().expect("render");

        let out = temp.path().join("project/out");
        let main = fs::read_to_string(out.join("terraform/main.tf")).expect("main.tf");
        assert!(main.starts_with("token = \"dns-secret\"\n"));
        assert!(main.contains(&session.layout.default_state_file().display().to_string()));
        assert_eq!(
            fs::read_to_string(out.join("terraform/vars.tf")).expect("vars.tf"),
            "override"
        );
        assert_eq!(
            fs::read_to_string(out.join("ansible/inventory.ini")).expect("inventory"),
            "web\ndb\n"
        );
        assert!(out.join("terraform").join(MANIFEST_FILE_NAME).is_file());
        assert!(out.join("ansible").join(MANIFEST_FILE_NAME).is_file());
        assert_eq!(report.categories.len(), 2);
        assert!(report.has_changes());
    }

    #[test]
    fn render_all_skips_missing_ansible_templates() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(
            &temp.path().join("project/templates/terraform/main.tf"),
            "x",
        );

        let report = session(temp.path(), CONFIG).render_all().expect("render");
        let ansible = report.category(Category::Ansible).expect("ansible report");
        assert!(ansible.skipped);
    }

    #[test]
    fn local_template_root_is_relative_to_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        write(&temp.path().join("project/templates/terraform/main.tf"), "x");
        let session = session(temp.path(), CONFIG);
        assert_eq!(
            session.template_root,
            temp.path().join("project/templates")
        );
        assert!(
            session
                .layout
                .state_dir
                .starts_with(temp.path().join("home/.rigger")),
            "unexpected state dir: {}",
            session.layout.state_dir.display()
        );
    }

    #[cfg(unix)]
    mod tools {
        #![allow(clippy::expect_used)]

        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};

        use super::{session, write};
        use crate::pipeline::{SetupOptions, ToolPaths};

        fn script(path: &Path, body: &str) -> PathBuf {
            write(path, &format!("#!/bin/sh\n{body}\n"));
            let mut permissions = fs::metadata(path).expect("metadata").permissions();
            permissions.set_mode(0o755);
            fs::set_permissions(path, permissions).expect("chmod");
            path.to_path_buf()
        }

        const CONFIG: &str = "\
template-dir: templates
output-dir: out
terraform:
  providers: [hcloud]
ansible:
  inventory-file: hosts.ini
  playbook-file: site.yaml
variables:
  default:
    ansible_user: deploy
    ansible_ssh_private_key: /keys/id
";

        #[test]
        fn setup_feeds_terraform_outputs_into_ansible_templates() {
            let temp = tempfile::tempdir().expect("tempdir");
            let templates = temp.path().join("project/templates");
            write(&templates.join("terraform/main.tf"), "resource {}");
            write(
                &templates.join("ansible/hosts.ini.tmpl"),
                "[[ vars.server_ip ]] ansible_ssh_common_args='-F [[ vars.ssh_config_file ]]'\n",
            );
            let bin = temp.path().join("bin");
            let terraform = script(
                &bin.join("terraform"),
                "if [ \"$1\" = output ]; then echo '{\"server_ip\": {\"value\": \"192.0.2.10\"}}'; else echo \"$@\" >> tf.log; fi",
            );
            let playbook = script(&bin.join("ansible-playbook"), "echo \"$@\" > playbook.log");

            let mut session = session(temp.path(), CONFIG);
            let options = SetupOptions {
                skip_terraform: false,
                skip_ansible: false,
                tools: ToolPaths {
                    terraform: Some(terraform),
                    playbook: Some(playbook),
                },
                ssh_config_dir: temp.path().join("ssh"),
            };
            fs::create_dir_all(&options.ssh_config_dir).expect("mkdir ssh");

            let report = session.setup(&options).expect("setup");

            let out = temp.path().join("project/out");
            assert_eq!(
                fs::read_to_string(out.join("terraform/tf.log")).expect("tf log"),
                "init\napply -auto-approve\n"
            );
            let hosts = fs::read_to_string(out.join("ansible/hosts.ini")).expect("hosts");
            assert!(hosts.starts_with("192.0.2.10 ansible_ssh_common_args='-F "));
            assert!(hosts.contains(&temp.path().join("ssh").display().to_string()));
            assert_eq!(
                fs::read_to_string(out.join("ansible/playbook.log")).expect("playbook log"),
                "-i hosts.ini site.yaml\n"
            );
            assert_eq!(report.categories.len(), 2);
        }

        #[test]
        fn skip_flags_bypass_apply_and_playbook() {
            let temp = tempfile::tempdir().expect("tempdir");
            let templates = temp.path().join("project/templates");
            write(&templates.join("terraform/main.tf"), "resource {}");
            let terraform = script(
                &temp.path().join("bin/terraform"),
                "if [ \"$1\" = output ]; then echo '{}'; else echo \"$@\" >> tf.log; fi",
            );

            let mut session = session(temp.path(), CONFIG);
            let options = SetupOptions {
                skip_terraform: true,
                skip_ansible: true,
                tools: ToolPaths {
                    terraform: Some(terraform),
                    playbook: None,
                },
                ssh_config_dir: temp.path().to_path_buf(),
            };

            let report = session.setup(&options).expect("setup");
            assert!(!temp.path().join("project/out/terraform/tf.log").exists());
            assert_eq!(report.categories.len(), 1);
        }
    }

    #[test]
    fn absolute_template_dir_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        let templates = temp.path().join("elsewhere");
        write(&templates.join("terraform/main.tf"), "x");
        let config = format!("template-dir: {}\n", templates.display());
        let session = session(temp.path(), &config);
        assert_eq!(session.template_root, templates);
    }
}
