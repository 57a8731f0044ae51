use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod config;
mod report;
mod value;

pub use config::{
    AnsibleConfig, BackendKind, Category, Configuration, DEFAULT_ENVIRONMENT, LocalBackend,
    TemplateConfig, TerraformBackend, TerraformConfig,
};
pub use report::{CategoryReport, GeneratedFile, LayerKind, RenderReport};
pub use value::{Value, VariableTree};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("path must be absolute: {path}")]
    PathMustBeAbsolute { path: PathBuf },
}

/// A path known to be absolute; manifest entries are stored this way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Wrap `path`, rejecting relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error when `path` is not absolute.
    pub fn new(path: PathBuf) -> Result<Self, DomainValidationError> {
        if path.is_absolute() {
            Ok(Self(path))
        } else {
            Err(DomainValidationError::PathMustBeAbsolute { path })
        }
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl TryFrom<PathBuf> for AbsolutePath {
    type Error = DomainValidationError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl Deref for AbsolutePath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.as_path()
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(formatter)
    }
}

impl From<AbsolutePath> for PathBuf {
    fn from(value: AbsolutePath) -> Self {
        value.0
    }
}
