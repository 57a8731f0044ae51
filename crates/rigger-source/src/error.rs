use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid template repository URL: {input}")]
    InvalidSourceUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },
    #[error("file:// repositories are not supported; use template-dir for local templates")]
    FileSchemeNotSupported,
    #[error(
        "unsupported repository scheme \"{scheme}\"; expected https://, http://, git:// or ssh://"
    )]
    UnsupportedRepositoryScheme { scheme: String },
    #[error("repository URL must include a host")]
    MissingRepositoryHost,
    #[error("repository URLs with passwords are not supported")]
    PasswordNotSupported,
    #[error("failed to remove stale checkout {path}")]
    RemoveStaleCheckout {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to create checkout parent directory {path}")]
    CreateCheckoutParent {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to prepare clone from {repo_url}")]
    PrepareClone {
        repo_url: String,
        #[source]
        source: Box<gix::clone::Error>,
    },
    #[error("template-version \"{revision}\" is a commit hash; use a branch or tag name")]
    CommitRevisionNotSupported { revision: String },
    #[error("invalid git ref name: {reference}")]
    InvalidGitRefName { reference: String },
    #[error("failed to fetch template repository {repo_url}")]
    FetchRemote {
        repo_url: String,
        #[source]
        source: Box<gix::clone::fetch::Error>,
    },
    #[error("failed to check out template repository {repo_url}")]
    CheckoutRemote {
        repo_url: String,
        #[source]
        source: Box<gix::clone::checkout::main_worktree::Error>,
    },
    #[error("template subdirectory cannot contain '..'")]
    ParentDirNotAllowed,
    #[error("template subdirectory must be relative")]
    AbsoluteSubdirNotAllowed,
    #[error("template directory \"{subdir}\" does not exist in the template repository")]
    MissingTemplateDirectory { subdir: String },
    #[error("failed to canonicalize {path}")]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("template directory escapes the repository checkout")]
    TemplateDirectoryEscapesCheckout,
}
