//! Output paths relative to the build target root.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::fs::relative_path;

/// Error building a `TargetRelativePath`.
#[derive(Debug, Error)]
pub enum TargetPathError {
    #[error("target path must be relative: {0}")]
    Absolute(PathBuf),

    #[error("target path escapes the target root: {0}")]
    Escapes(PathBuf),

    #[error("target path is empty")]
    Empty,

    #[error("`{path}` is not inside target root `{root}`")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

/// A path relative to the build output root.
///
/// This is the unit of a builder's declared output. Paths are normalized on
/// construction (`.` components dropped) and may never leave the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct TargetRelativePath(PathBuf);

impl TargetRelativePath {
    /// Create a target-relative path, rejecting absolute or escaping paths.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, TargetPathError> {
        let path = path.as_ref();
        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => return Err(TargetPathError::Escapes(path.to_path_buf())),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(TargetPathError::Absolute(path.to_path_buf()))
                }
            }
        }

        if normalized.as_os_str().is_empty() {
            return Err(TargetPathError::Empty);
        }

        Ok(TargetRelativePath(normalized))
    }

    /// Express an absolute path as relative to `root`.
    pub fn from_absolute(root: &Path, path: &Path) -> Result<Self, TargetPathError> {
        if !path.starts_with(root) {
            return Err(TargetPathError::OutsideRoot {
                path: path.to_path_buf(),
                root: root.to_path_buf(),
            });
        }
        Self::new(relative_path(root, path))
    }

    /// Append a relative component.
    pub fn join(&self, child: impl AsRef<Path>) -> Result<Self, TargetPathError> {
        Self::new(self.0.join(child))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }
}

impl fmt::Display for TargetRelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for TargetRelativePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl TryFrom<PathBuf> for TargetRelativePath {
    type Error = TargetPathError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        TargetRelativePath::new(path)
    }
}

impl From<TargetRelativePath> for PathBuf {
    fn from(path: TargetRelativePath) -> Self {
        path.0
    }
}

/// The directory every `TargetRelativePath` is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRoot {
    root: PathBuf,
}

impl TargetRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TargetRoot { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a target-relative path.
    pub fn resolve(&self, path: &TargetRelativePath) -> PathBuf {
        self.root.join(path.as_path())
    }

    /// Whether a recorded output is still present on disk.
    pub fn exists(&self, path: &TargetRelativePath) -> bool {
        self.resolve(path).exists()
    }

    /// Express a path under this root as target-relative.
    pub fn relativize(&self, path: &Path) -> Result<TargetRelativePath, TargetPathError> {
        TargetRelativePath::from_absolute(&self.root, path)
    }
}
