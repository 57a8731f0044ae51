use std::fs;
use std::path::{Component, Path, PathBuf};

use rigger_domain::{Category, Configuration};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::error::WorkspaceError;

/// Directory under the user's home that holds all derived workspaces.
pub const TOOL_HOME_DIR: &str = ".rigger";
const TRANSIENT_HASH_LEN: usize = 12;
const TRANSIENT_STEM_MAX: usize = 32;
const CHECKOUT_DIR_NAME: &str = "checkout";
const OUTPUT_DIR_NAME: &str = "output";
const STATE_FILE_NAME: &str = "terraform.tfstate";
const STATE_WORKSPACE_DIR_NAME: &str = "terraform.tf.d";

/// Deterministic base directory for a template source identity.
///
/// `home/.rigger`, then `<host>/<url path>` for a repository URL, then the
/// subdirectory. Only normal path components are appended, so absolute or
/// `..`-laden subdirectories stay under the base. Performs no filesystem access.
///
/// # Errors
///
/// Returns an error when the URL cannot be parsed or has no host.
pub fn derive_base_directory(
    home: &Path,
    repo_url: Option<&str>,
    subdir: Option<&str>,
) -> Result<PathBuf, WorkspaceError> {
    let mut path = home.join(TOOL_HOME_DIR);

    if let Some(raw) = repo_url.map(str::trim).filter(|raw| !raw.is_empty()) {
        let parsed = Url::parse(raw).map_err(|source| WorkspaceError::InvalidSourceUrl {
            url: raw.to_string(),
            source,
        })?;
        let host = parsed
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| WorkspaceError::MissingHost {
                url: raw.to_string(),
            })?;
        match parsed.port() {
            Some(port) => path.push(format!("{host}_{port}")),
            None => path.push(host),
        }
        if let Some(segments) = parsed.path_segments() {
            for segment in segments {
                push_normal_components(&mut path, Path::new(segment));
            }
        }
    }

    if let Some(subdir) = subdir.filter(|subdir| !subdir.is_empty()) {
        push_normal_components(&mut path, Path::new(subdir));
    }

    Ok(path)
}

fn push_normal_components(path: &mut PathBuf, relative: &Path) {
    for component in relative.components() {
        if let Component::Normal(segment) = component {
            path.push(segment);
        }
    }
}

/// Short, filesystem-safe name for a configuration file's transient directories.
///
/// Combines the sanitized file stem with a hash of the absolute path, so the
/// same file always maps to the same name and same-named files elsewhere don't.
///
/// # Errors
///
/// Returns an error when the path has no file name.
pub fn derive_transient_name(config_path: &Path) -> Result<String, WorkspaceError> {
    let stem = config_path
        .file_stem()
        .map(|stem| sanitize_stem(&stem.to_string_lossy()))
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| WorkspaceError::ConfigPathWithoutName {
            path: config_path.to_path_buf(),
        })?;
    Ok(format!(
        "{stem}-{}",
        path_fingerprint(config_path, TRANSIENT_HASH_LEN)
    ))
}

/// First `len` hex characters of the SHA-256 of the absolute form of `path`.
#[must_use]
pub fn path_fingerprint(path: &Path, len: usize) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.as_os_str().as_encoded_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(len);
    hex
}

fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .take(TRANSIENT_STEM_MAX)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Directories used by one configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Where a remote template repository is checked out.
    pub checkout_dir: Option<PathBuf>,
    /// Per-configuration state (terraform state, default outputs).
    pub state_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Derive the layout for `config` loaded from the absolute `config_path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the template repository URL is invalid or the
    /// configuration path has no file name.
    pub fn derive(
        home: &Path,
        config: &Configuration,
        config_path: &Path,
    ) -> Result<Self, WorkspaceError> {
        let repo = config.template_repo.as_deref();
        let checkout_dir = match repo.filter(|repo| !repo.trim().is_empty()) {
            Some(repo) => {
                Some(derive_base_directory(home, Some(repo), None)?.join(CHECKOUT_DIR_NAME))
            }
            None => None,
        };
        let state_dir = derive_base_directory(home, repo, config.template_dir.as_deref())?
            .join(derive_transient_name(config_path)?);
        let output_dir = match &config.output_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => config_path
                .parent()
                .map_or_else(|| dir.clone(), |parent| parent.join(dir)),
            None => state_dir.join(OUTPUT_DIR_NAME),
        };

        Ok(Self {
            checkout_dir,
            state_dir,
            output_dir,
        })
    }

    #[must_use]
    pub fn category_output(&self, category: Category) -> PathBuf {
        self.output_dir.join(category.dir_name())
    }

    #[must_use]
    pub fn default_state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    #[must_use]
    pub fn default_state_workspace(&self) -> PathBuf {
        self.state_dir.join(STATE_WORKSPACE_DIR_NAME)
    }

    /// Create the state and output directories.
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn ensure(&self) -> Result<(), WorkspaceError> {
        for dir in [
            &self.state_dir,
            &self.default_state_workspace(),
            &self.output_dir,
        ] {
            debug!(path = %dir.display(), "ensuring workspace directory");
            fs::create_dir_all(dir).map_err(|source| WorkspaceError::CreateDirectory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }
}
