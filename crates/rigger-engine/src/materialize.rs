use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rigger_domain::{AbsolutePath, Category, CategoryReport, GeneratedFile, LayerKind};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::RenderError;
use crate::fs_util::{absolute_normalized, write_if_changed};
use crate::ledger::{self, Manifest};
use crate::template::{TemplateRenderer, output_file_name};

/// Whether a missing category source directory is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryRequirement {
    Required,
    Optional,
}

/// A template tree whose files map to paths relative to `root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLayer {
    pub root: PathBuf,
    pub kind: LayerKind,
}

/// Everything needed to render one category.
#[derive(Debug, Clone)]
pub struct CategoryJob {
    pub category: Category,
    pub requirement: CategoryRequirement,
    /// `<template root>/<category>`.
    pub base_root: PathBuf,
    pub override_root: Option<PathBuf>,
    pub output_dir: PathBuf,
}

#[derive(Debug)]
struct RenderEntry {
    source: PathBuf,
    layer: LayerKind,
}

#[derive(Debug, Default)]
struct WalkResult {
    directories: BTreeSet<PathBuf>,
    entries: BTreeMap<PathBuf, RenderEntry>,
}

/// Render one category into its output directory and reconcile the manifest.
///
/// All templates are rendered in memory before anything is written, so a
/// template error leaves the output directory untouched.
///
/// # Errors
///
/// Returns an error when a required source directory is missing, two files of
/// one layer map to the same output, a template fails to read, parse or
/// render, an output cannot be written, or the manifest cannot be rewritten.
pub fn materialize_category(
    job: &CategoryJob,
    renderer: &TemplateRenderer,
) -> Result<CategoryReport, RenderError> {
    let category = job.category;
    let output_dir = absolute_normalized(&job.output_dir).map_err(|source| {
        RenderError::OutputWrite {
            category,
            path: job.output_dir.clone(),
            source,
        }
    })?;

    if !job.base_root.is_dir() {
        return match job.requirement {
            CategoryRequirement::Required => Err(RenderError::MissingTemplateDirectory {
                category,
                path: job.base_root.clone(),
            }),
            CategoryRequirement::Optional => {
                warn!(category = %category, path = %job.base_root.display(), "template directory does not exist, skipping");
                Ok(CategoryReport::skipped(
                    category,
                    job.base_root.clone(),
                    output_dir,
                ))
            }
        };
    }

    create_dir(category, &output_dir)?;
    info!(category = %category, output = %output_dir.display(), "rendering templates");

    let mut warnings = Vec::new();
    let mut layers = vec![SourceLayer {
        root: job.base_root.clone(),
        kind: LayerKind::Base,
    }];
    if let Some(root) = &job.override_root {
        if root.is_dir() {
            layers.push(SourceLayer {
                root: root.clone(),
                kind: LayerKind::Override,
            });
        } else {
            warn!(category = %category, path = %root.display(), "override template directory does not exist, skipping");
            warnings.push(format!(
                "override template directory {} does not exist",
                root.display()
            ));
        }
    }

    let mut walk = WalkResult::default();
    for layer in &layers {
        collect_layer(category, layer, &mut walk)?;
    }

    let mut rendered = Vec::with_capacity(walk.entries.len());
    for (relative, entry) in walk.entries {
        let source =
            fs::read_to_string(&entry.source).map_err(|source| RenderError::ReadTemplate {
                category,
                path: entry.source.clone(),
                source,
            })?;
        let content = renderer.render(&entry.source, &source)?;
        rendered.push((output_dir.join(relative), entry, content));
    }

    for directory in &walk.directories {
        create_dir(category, &output_dir.join(directory))?;
    }

    let mut manifest = Manifest::new();
    let mut files = Vec::with_capacity(rendered.len());
    for (path, entry, content) in rendered {
        let changed =
            write_if_changed(&path, &content).map_err(|source| RenderError::OutputWrite {
                category,
                path: path.clone(),
                source,
            })?;
        debug!(category = %category, path = %path.display(), changed, "wrote output");
        manifest.record(AbsolutePath::new(path.clone())?);
        files.push(GeneratedFile {
            path,
            source: entry.source,
            layer: entry.layer,
            changed,
        });
    }

    let outcome = ledger::reconcile(&output_dir, &manifest)?;
    warnings.extend(outcome.warnings);

    let report = CategoryReport {
        category,
        source_dir: job.base_root.clone(),
        output_dir,
        skipped: false,
        files,
        removed: outcome.removed,
        warnings,
    };
    info!(
        category = %category,
        files = report.files.len(),
        changed = report.changed_count(),
        removed = report.removed.len(),
        "rendered templates"
    );
    Ok(report)
}

fn collect_layer(
    category: Category,
    layer: &SourceLayer,
    walk: &mut WalkResult,
) -> Result<(), RenderError> {
    let mut claimed: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for entry in WalkDir::new(&layer.root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| RenderError::Walk {
            category,
            root: layer.root.clone(),
            source,
        })?;
        let relative = entry.path().strip_prefix(&layer.root).map_err(|_| {
            RenderError::RelativePath {
                path: entry.path().to_path_buf(),
                root: layer.root.clone(),
            }
        })?;

        if entry.file_type().is_dir() {
            walk.directories.insert(relative.to_path_buf());
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let output = output_relative_path(relative);
        if let Some(first) = claimed.get(&output) {
            return Err(RenderError::OutputCollision {
                category,
                first: first.clone(),
                second: entry.path().to_path_buf(),
                output,
            });
        }
        claimed.insert(output.clone(), entry.path().to_path_buf());

        if let Some(previous) = walk.entries.get(&output) {
            debug!(
                category = %category,
                replaced = %previous.source.display(),
                by = %entry.path().display(),
                "override template replaces base template"
            );
        }
        walk.entries.insert(
            output,
            RenderEntry {
                source: entry.path().to_path_buf(),
                layer: layer.kind,
            },
        );
    }

    Ok(())
}

fn output_relative_path(relative: &Path) -> PathBuf {
    let name = relative
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    relative.with_file_name(output_file_name(&name))
}

fn create_dir(category: Category, path: &Path) -> Result<(), RenderError> {
    fs::create_dir_all(path).map_err(|source| RenderError::OutputWrite {
        category,
        path: path.to_path_buf(),
        source,
    })
}
