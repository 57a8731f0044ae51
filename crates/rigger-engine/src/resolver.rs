use std::fs;
use std::path::{Path, PathBuf};

use rigger_domain::{Value, VariableTree};
use tracing::debug;

use crate::env::Environment;
use crate::error::ResolveError;

const ENV_PREFIX: &str = "fromenv:";
const FILE_PREFIXES: [&str; 2] = ["fromfile:", "filecontent:"];

/// How a configuration string is interpreted before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Literal,
    EnvironmentReference,
    FileContentReference,
}

/// Classify a configuration string by its indirection marker.
///
/// `fromenv:` always marks an environment reference, even when the name after it
/// is malformed. Shell-style `$NAME` / `${NAME}` only count when the whole
/// string is a well-formed reference; anything else containing `$` is literal.
#[must_use]
pub fn classify_value(input: &str) -> ValueKind {
    if input.starts_with(ENV_PREFIX) || shell_reference_name(input).is_some() {
        ValueKind::EnvironmentReference
    } else if file_reference_path(input).is_some() {
        ValueKind::FileContentReference
    } else {
        ValueKind::Literal
    }
}

/// Extract the variable name from an environment reference.
///
/// Accepts `fromenv:NAME`, `fromenv:${NAME}`, `$NAME` and `${NAME}`.
///
/// # Errors
///
/// Returns [`ResolveError::MalformedReference`] when no valid identifier can be
/// parsed.
pub fn extract_environment_name(input: &str) -> Result<&str, ResolveError> {
    let body = input.strip_prefix(ENV_PREFIX).unwrap_or(input);
    let body = body.strip_prefix('$').unwrap_or(body);
    let name = match body.strip_prefix('{') {
        Some(braced) => braced.strip_suffix('}'),
        None => Some(body),
    };

    match name {
        Some(name) if is_identifier(name) => Ok(name),
        _ => Err(ResolveError::MalformedReference {
            input: input.to_string(),
        }),
    }
}

fn shell_reference_name(input: &str) -> Option<&str> {
    let rest = input.strip_prefix('$')?;
    let name = match rest.strip_prefix('{') {
        Some(braced) => braced.strip_suffix('}')?,
        None => rest,
    };
    is_identifier(name).then_some(name)
}

fn file_reference_path(input: &str) -> Option<&str> {
    FILE_PREFIXES
        .iter()
        .find_map(|prefix| input.strip_prefix(prefix))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Resolves indirection references against an injected environment.
///
/// Relative file references are read from `base_dir`, normally the directory
/// of the configuration file.
pub struct Resolver<'a, E: Environment + ?Sized> {
    env: &'a E,
    base_dir: PathBuf,
}

impl<'a, E: Environment + ?Sized> Resolver<'a, E> {
    pub fn new(env: &'a E, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            env,
            base_dir: base_dir.into(),
        }
    }

    /// Resolve one configuration string.
    ///
    /// Environment references resolve to the variable's value.
    ///
    /// # Errors
    ///
    /// Fails when a reference is malformed, its variable is unset or empty, or
    /// its file cannot be read.
    pub fn resolve_scalar(&self, input: &str) -> Result<String, ResolveError> {
        match classify_value(input) {
            ValueKind::Literal => Ok(input.to_string()),
            ValueKind::EnvironmentReference => {
                let name = extract_environment_name(input)?;
                debug!(variable = name, "resolving environment reference");
                match self.env.var(name) {
                    Some(value) if !value.is_empty() => Ok(value),
                    _ => Err(ResolveError::UnsetEnvironmentVariable {
                        name: name.to_string(),
                    }),
                }
            }
            ValueKind::FileContentReference => {
                let raw = file_reference_path(input).unwrap_or_default();
                let path = self.reference_path(raw)?;
                debug!(path = %path.display(), "resolving file content reference");
                let content =
                    fs::read_to_string(&path).map_err(|source| ResolveError::FileRead {
                        reference: input.to_string(),
                        path: path.clone(),
                        source,
                    })?;
                Ok(content.trim().to_string())
            }
        }
    }

    /// Resolve every string in `tree` in place, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first resolution failure, tagged with the dotted key path of
    /// the offending value.
    pub fn resolve_tree(&self, tree: &mut VariableTree) -> Result<(), ResolveError> {
        for (key, value) in tree.iter_mut() {
            self.resolve_value(value, key)?;
        }
        Ok(())
    }

    fn resolve_value(&self, value: &mut Value, key_path: &str) -> Result<(), ResolveError> {
        match value {
            Value::String(text) => {
                *text = self
                    .resolve_scalar(text)
                    .map_err(|source| ResolveError::AtKey {
                        key: key_path.to_string(),
                        source: Box::new(source),
                    })?;
            }
            Value::Sequence(items) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.resolve_value(item, &format!("{key_path}[{index}]"))?;
                }
            }
            Value::Mapping(mapping) => {
                for (key, nested) in mapping.iter_mut() {
                    self.resolve_value(nested, &format!("{key_path}.{key}"))?;
                }
            }
            Value::Null | Value::Bool(_) | Value::Integer(_) | Value::Float(_) => {}
        }
        Ok(())
    }

    fn reference_path(&self, raw: &str) -> Result<PathBuf, ResolveError> {
        let expanded = if raw == "~" || raw.starts_with("~/") {
            let home = self
                .env
                .home_dir()
                .ok_or_else(|| ResolveError::HomeDirectoryUnavailable {
                    path: raw.to_string(),
                })?;
            home.join(raw.trim_start_matches('~').trim_start_matches('/'))
        } else {
            PathBuf::from(raw)
        };

        if expanded.is_absolute() {
            Ok(expanded)
        } else {
            Ok(join_relative(&self.base_dir, &expanded))
        }
    }
}

fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    if base.as_os_str().is_empty() {
        relative.to_path_buf()
    } else {
        base.join(relative)
    }
}
