use std::collections::BTreeSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rigger_domain::AbsolutePath;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::fs_util::normalize_path;

/// File inside each category output directory listing the generated files.
pub const MANIFEST_FILE_NAME: &str = ".rigger-generated";

/// Output files written by one render pass, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<AbsolutePath>,
    index: BTreeSet<PathBuf>,
}

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a written file. Returns `false` if it was already recorded.
    pub fn record(&mut self, path: AbsolutePath) -> bool {
        if !self.index.insert(path.to_path_buf()) {
            return false;
        }
        self.entries.push(path);
        true
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains(path)
    }

    #[must_use]
    pub fn entries(&self) -> &[AbsolutePath] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What reconciliation did to the category directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

#[must_use]
pub fn manifest_path(category_dir: &Path) -> PathBuf {
    category_dir.join(MANIFEST_FILE_NAME)
}

/// Read the manifest left by the previous pass. A missing manifest is empty.
///
/// # Errors
///
/// Returns an error when the manifest exists but cannot be read.
pub fn read_previous(category_dir: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    let path = manifest_path(category_dir);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect()),
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no previous manifest");
            Ok(Vec::new())
        }
        Err(source) => Err(LedgerError::ManifestRead { path, source }),
    }
}

/// Delete files generated by the previous pass that `current` no longer
/// contains, then replace the manifest with `current`.
///
/// Deletion is best effort: failures are logged and reported as warnings.
/// Previous entries outside `category_dir` are never deleted.
///
/// # Errors
///
/// Returns an error only when the new manifest cannot be written.
pub fn reconcile(category_dir: &Path, current: &Manifest) -> Result<ReconcileOutcome, LedgerError> {
    let mut outcome = ReconcileOutcome::default();

    let previous = match read_previous(category_dir) {
        Ok(previous) => previous,
        Err(error) => {
            warn!(error = %error, "ignoring unreadable manifest");
            outcome.warnings.push(error.to_string());
            Vec::new()
        }
    };

    let root = normalize_path(category_dir);
    for entry in &previous {
        let stale = normalize_path(entry);
        if current.contains(&stale) {
            continue;
        }
        if !stale.starts_with(&root) || stale == root {
            warn!(path = %entry.display(), dir = %category_dir.display(), "manifest entry outside output directory, not deleting");
            outcome.warnings.push(format!(
                "manifest entry {} is outside {}; not deleted",
                entry.display(),
                category_dir.display()
            ));
            continue;
        }

        match fs::remove_file(&stale) {
            Ok(()) => {
                info!(path = %stale.display(), "deleted stale generated file");
                outcome.removed.push(stale);
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %stale.display(), "stale generated file already gone");
            }
            Err(error) => {
                warn!(path = %stale.display(), error = %error, "failed to delete stale generated file");
                outcome.warnings.push(format!(
                    "failed to delete stale file {}: {error}",
                    stale.display()
                ));
            }
        }
    }

    write_manifest(category_dir, current)?;
    Ok(outcome)
}

fn write_manifest(category_dir: &Path, manifest: &Manifest) -> Result<(), LedgerError> {
    let path = manifest_path(category_dir);
    let io_error = |source| LedgerError::ManifestIo {
        path: path.clone(),
        source,
    };

    let mut file = NamedTempFile::new_in(category_dir).map_err(io_error)?;
    for entry in manifest.entries() {
        writeln!(file, "{}", entry.display()).map_err(io_error)?;
    }
    file.flush().map_err(io_error)?;
    file.persist(&path).map_err(|error| io_error(error.error))?;

    debug!(path = %path.display(), entries = manifest.len(), "wrote manifest");
    Ok(())
}
