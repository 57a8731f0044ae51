use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::value::VariableTree;

/// Name of the variable environment used when none is requested.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Top-level `rigger.yaml` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform: Option<TerraformConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible: Option<AnsibleConfig>,
    /// Variable trees keyed by environment name.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableTree>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TerraformConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<TerraformBackend>,
    #[serde(default)]
    pub providers: Vec<String>,
}

impl TerraformConfig {
    #[must_use]
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.iter().any(|provider| provider == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TerraformBackend {
    #[serde(rename = "type")]
    pub kind: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// Local state backend. Empty fields are filled from the derived state directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocalBackend {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AnsibleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_file: Option<String>,
}

/// Optional `template-cfg.yaml` shipped at the root of a template source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TemplateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_extra_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_extra_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ansible_roles_dir: Option<PathBuf>,
}

/// Independent render target inside a template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Terraform,
    Ansible,
}

impl Category {
    /// Directory name used both under the template root and under the output root.
    #[must_use]
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::Ansible => "ansible",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.dir_name())
    }
}
