use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use rigger_domain::{Category, DomainValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed environment reference \"{input}\"")]
    MalformedReference { input: String },
    #[error("referenced environment variable {name} is not set")]
    UnsetEnvironmentVariable { name: String },
    #[error("cannot expand \"~\" in {path}: home directory is unavailable")]
    HomeDirectoryUnavailable { path: String },
    #[error("failed to read file referenced by \"{reference}\": {path}")]
    FileRead {
        reference: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("variable {key}")]
    AtKey {
        key: String,
        #[source]
        source: Box<ResolveError>,
    },
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid template repository URL: {url}")]
    InvalidSourceUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("template repository URL has no host: {url}")]
    MissingHost { url: String },
    #[error("home directory is unavailable")]
    HomeDirectoryUnavailable,
    #[error("configuration file path has no file name: {path}")]
    ConfigPathWithoutName { path: PathBuf },
    #[error("failed to create directory {path}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to read manifest {path}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write manifest {path}")]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{category} template directory does not exist: {path}")]
    MissingTemplateDirectory { category: Category, path: PathBuf },
    #[error("failed while walking {category} templates under {root}")]
    Walk {
        category: Category,
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("{path} is not inside template root {root}")]
    RelativePath { path: PathBuf, root: PathBuf },
    #[error("{category} templates {first} and {second} both render to {output}")]
    OutputCollision {
        category: Category,
        first: PathBuf,
        second: PathBuf,
        output: PathBuf,
    },
    /// Templates are read as UTF-8 text; binary files fail here.
    #[error("failed to read {category} template {path}")]
    ReadTemplate {
        category: Category,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {message}")]
    TemplateSyntax {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("failed to parse template {path}")]
    TemplateParse {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
    #[error("failed to render template {path}")]
    TemplateRender {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
    #[error("failed to build template context")]
    Context {
        #[source]
        source: tera::Error,
    },
    #[error("failed to write {category} output {path}")]
    OutputWrite {
        category: Category,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid output path")]
    OutputPath(#[from] DomainValidationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse configuration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to read template config {path}")]
    TemplateConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse template config {path}")]
    TemplateConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("variables for environment \"{environment}\" are not defined in {path}")]
    UnknownEnvironment { environment: String, path: PathBuf },
    #[error("either template-repo or template-dir must be specified")]
    MissingTemplateSource,
    #[error("at least one Terraform provider is required")]
    NoTerraformProviders,
    #[error("failed to resolve {field} in {path}")]
    Resolve {
        field: String,
        path: PathBuf,
        #[source]
        source: ResolveError,
    },
    #[error("failed to determine absolute path of {path}")]
    Absolute {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("binary \"{binary}\" not found on PATH")]
    BinaryNotFound { binary: String },
    #[error("failed to execute {program} {args}")]
    CommandSpawn {
        program: String,
        args: String,
        #[source]
        source: io::Error,
    },
    #[error("command failed: {program} {args} (exit: {status})")]
    CommandFailed {
        program: String,
        args: String,
        status: ExitStatus,
    },
    #[error("failed to decode terraform outputs")]
    OutputDecode {
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum SshConfigError {
    #[error("failed to write SSH config {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    SshConfig(#[from] SshConfigError),
}
