use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Category;

/// Which source layer produced an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Base,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub source: PathBuf,
    pub layer: LayerKind,
    /// `false` when the file already held the rendered content.
    pub changed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: Category,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub skipped: bool,
    pub files: Vec<GeneratedFile>,
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

impl CategoryReport {
    #[must_use]
    pub const fn skipped(category: Category, source_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            category,
            source_dir,
            output_dir,
            skipped: true,
            files: Vec::new(),
            removed: Vec::new(),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.files.iter().filter(|file| file.changed).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderReport {
    pub target: Option<String>,
    pub categories: Vec<CategoryReport>,
}

impl RenderReport {
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.categories
            .iter()
            .any(|category| category.changed_count() > 0 || !category.removed.is_empty())
    }

    #[must_use]
    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories
            .iter()
            .find(|report| report.category == category)
    }
}
