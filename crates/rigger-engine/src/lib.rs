mod config;
mod env;
mod error;
mod executor;
mod fs_util;
mod ledger;
mod materialize;
mod pipeline;
mod resolver;
mod ssh;
mod template;
mod workspace;

pub use config::{DEFAULT_CONFIG_FILE, LoadedConfig, TEMPLATE_CONFIG_FILE, load_template_config};
pub use env::{Environment, MapEnvironment, SystemEnvironment};
pub use error::{
    ConfigError, ExecutorError, LedgerError, PipelineError, RenderError, ResolveError,
    SshConfigError, WorkspaceError,
};
pub use executor::{
    AnsibleExecutor, PLAYBOOK_BINARY, TERRAFORM_BINARY, TerraformExecutor, locate_binary,
    parse_outputs,
};
pub use ledger::{MANIFEST_FILE_NAME, Manifest, ReconcileOutcome, read_previous, reconcile};
pub use materialize::{CategoryJob, CategoryRequirement, SourceLayer, materialize_category};
pub use pipeline::{SetupOptions, Session, ToolPaths, load_workspace, local_template_root};
pub use resolver::{Resolver, ValueKind, classify_value, extract_environment_name};
pub use ssh::{SSH_CONFIG_VAR, SshSettings, ssh_config_path, write_ssh_config};
pub use template::{
    AnsibleContext, BackendContext, RenderContext, TEMPLATE_SUFFIX, TemplateRenderer,
    SyntaxError, TerraformContext, output_file_name, translate_delimiters,
};
pub use workspace::{
    TOOL_HOME_DIR, WorkspaceLayout, derive_base_directory, derive_transient_name,
    path_fingerprint,
};
