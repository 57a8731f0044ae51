use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;

/// Lexically resolve `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            Component::Normal(segment) => out.push(segment),
            Component::RootDir => out.push(component.as_os_str()),
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
        }
    }

    out
}

/// Absolute, normalized form of `path`, relative to the current directory.
///
/// # Errors
///
/// Returns an error when the current directory cannot be determined.
pub fn absolute_normalized(path: &Path) -> std::io::Result<PathBuf> {
    std::path::absolute(path).map(|absolute| normalize_path(&absolute))
}

/// Write `content` to `path` unless the file already holds exactly that.
///
/// The write goes through a temporary file in the same directory that is then
/// renamed over the destination. Returns whether the file changed.
///
/// # Errors
///
/// Returns an error when the destination cannot be read, written or replaced.
pub fn write_if_changed(path: &Path, content: &str) -> std::io::Result<bool> {
    match fs::read(path) {
        Ok(current) if current == content.as_bytes() => return Ok(false),
        Ok(_) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }

    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            ErrorKind::InvalidInput,
            format!("output path has no parent: {}", path.display()),
        )
    })?;
    let mut file = NamedTempFile::new_in(parent)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::{Path, PathBuf};

    use super::{normalize_path, write_if_changed};

    #[test]
    fn normalize_resolves_dot_components() {
        assert_eq!(
            normalize_path(Path::new("/a/./b/../c")),
            PathBuf::from("/a/c")
        );
    }

    #[test]
    fn write_if_changed_skips_identical_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("main.tf");

        assert!(write_if_changed(&path, "a").expect("first write"));
        assert!(!write_if_changed(&path, "a").expect("same content"));
        assert!(write_if_changed(&path, "b").expect("new content"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "b");
    }
}
