//! Case-insensitive file and directory path values.
//!
//! rFactor 2 writes Windows paths into its configuration files, and the game
//! itself treats them case-insensitively. These wrappers keep the raw path
//! string verbatim while comparing and hashing it the way the game does, and
//! split it into segments on either `\` or `/`.
//!
//! # Example
//!
//! ```
//! use liverysync_monitor::paths::FilePath;
//!
//! let file = FilePath::new(r"C:\rF2\Installed\Vehicles\Foo\1.0\car.veh").unwrap();
//! assert_eq!(file.name(), "car.veh");
//! assert_eq!(file.directory().unwrap().name(), "1.0");
//! assert_eq!(file, FilePath::new(r"c:\RF2\installed\vehicles\foo\1.0\CAR.VEH").unwrap());
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur when constructing a path value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// The path was empty or only whitespace.
    #[error("path cannot be empty")]
    Empty,

    /// The path ends in a separator and cannot name a file.
    #[error("path does not look like a file: {0}")]
    NotAFile(String),

    /// The path is a bare root, which is never a file.
    #[error("path is a root, not a file: {0}")]
    Root(String),

    /// The path is not valid UTF-8.
    #[error("path is not valid UTF-8: {0}")]
    NotUnicode(PathBuf),
}

/// Result type for path construction.
pub type Result<T> = std::result::Result<T, PathError>;

fn is_separator(c: char) -> bool {
    c == '\\' || c == '/'
}

/// Length in bytes of the root prefix (`/`, `\`, `C:` or `C:\`), zero for relative paths.
fn root_len(path: &str) -> usize {
    let bytes = path.as_bytes();
    match bytes {
        [b'/' | b'\\', ..] => 1,
        [drive, b':', sep, ..] if drive.is_ascii_alphabetic() && (*sep == b'/' || *sep == b'\\') => 3,
        [drive, b':', ..] if drive.is_ascii_alphabetic() => 2,
        _ => 0,
    }
}

/// Splits `path` at its last separator, keeping the root intact.
///
/// Returns the container portion, or `None` if there is no separator.
fn container_of(path: &str) -> Option<&str> {
    let idx = path.rfind(is_separator)?;
    let root = root_len(path);
    let end = if idx < root { root } else { idx };
    Some(&path[..end])
}

fn last_segment(path: &str) -> &str {
    match path.rfind(is_separator) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn hash_ignore_case<H: Hasher>(value: &str, state: &mut H) {
    for b in value.bytes() {
        state.write_u8(b.to_ascii_lowercase());
    }
    state.write_u8(0xff);
}

/// An immutable path to a file.
#[derive(Debug, Clone)]
pub struct FilePath {
    full_name: String,
}

impl FilePath {
    /// Creates a file path from a raw string.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is empty, ends in a separator, or is a bare root.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        if path.trim().is_empty() {
            return Err(PathError::Empty);
        }
        if path.ends_with(is_separator) {
            return Err(PathError::NotAFile(path));
        }
        if root_len(&path) == path.len() {
            return Err(PathError::Root(path));
        }
        Ok(Self { full_name: path })
    }

    /// Creates a file path relative to a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the joined path is not a valid file path.
    pub fn in_directory(directory: &DirectoryPath, relative: &str) -> Result<Self> {
        Self::try_from(directory.as_path().join(relative).as_path())
    }

    /// The raw path string.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The final segment of the path.
    #[must_use]
    pub fn name(&self) -> &str {
        last_segment(&self.full_name)
    }

    /// True when the path is a bare file name with no directory component.
    #[must_use]
    pub fn directory_missing(&self) -> bool {
        self.name().len() == self.full_name.len()
    }

    /// The containing directory, or `None` for a bare file name.
    #[must_use]
    pub fn directory(&self) -> Option<DirectoryPath> {
        container_of(&self.full_name).map(|dir| DirectoryPath {
            full_name: dir.to_string(),
        })
    }

    /// True when the path points to an existing regular file.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.as_path().is_file()
    }

    /// Path segments from the root down to the file name.
    #[must_use]
    pub fn parts(&self) -> Vec<String> {
        let mut parts = self.directory().map(|d| d.parts()).unwrap_or_default();
        parts.push(self.name().to_string());
        parts
    }

    /// Borrows the path as a [`Path`].
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.full_name)
    }
}

impl PartialEq for FilePath {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.full_name, &other.full_name)
    }
}

impl Eq for FilePath {}

impl Hash for FilePath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ignore_case(&self.full_name, state);
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

impl AsRef<Path> for FilePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl TryFrom<&Path> for FilePath {
    type Error = PathError;

    fn try_from(path: &Path) -> Result<Self> {
        let raw = path
            .to_str()
            .ok_or_else(|| PathError::NotUnicode(path.to_path_buf()))?;
        Self::new(raw)
    }
}

/// An immutable path to a directory.
#[derive(Debug, Clone)]
pub struct DirectoryPath {
    full_name: String,
}

impl DirectoryPath {
    /// Creates a directory path from a raw string.
    ///
    /// Trailing separators are dropped, except the one belonging to a root.
    ///
    /// # Errors
    ///
    /// Returns [`PathError::Empty`] if the path is empty or only whitespace.
    pub fn new(path: impl Into<String>) -> Result<Self> {
        let mut path = path.into();
        if path.trim().is_empty() {
            return Err(PathError::Empty);
        }
        let root = root_len(&path);
        while path.len() > root.max(1) && path.ends_with(is_separator) {
            path.pop();
        }
        Ok(Self { full_name: path })
    }

    /// The raw path string.
    #[must_use]
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// The final segment, empty for a root.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.is_root() {
            ""
        } else {
            last_segment(&self.full_name)
        }
    }

    /// The root prefix, empty for relative paths.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.full_name[..root_len(&self.full_name)]
    }

    /// True when the path is exactly its root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        root_len(&self.full_name) == self.full_name.len()
    }

    /// The parent directory, `None` for a root or a single relative segment.
    #[must_use]
    pub fn parent(&self) -> Option<DirectoryPath> {
        if self.is_root() {
            return None;
        }
        container_of(&self.full_name).map(|dir| DirectoryPath {
            full_name: dir.to_string(),
        })
    }

    /// True when the directory exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.as_path().is_dir()
    }

    /// Path segments, root first.
    #[must_use]
    pub fn parts(&self) -> Vec<String> {
        let mut parts = Vec::new();
        let mut current = Some(self.clone());
        while let Some(dir) = current {
            if dir.is_root() {
                parts.push(dir.full_name.clone());
            } else {
                parts.push(dir.name().to_string());
            }
            current = dir.parent();
        }
        parts.reverse();
        parts
    }

    /// Borrows the path as a [`Path`].
    #[must_use]
    pub fn as_path(&self) -> &Path {
        Path::new(&self.full_name)
    }
}

impl PartialEq for DirectoryPath {
    fn eq(&self, other: &Self) -> bool {
        eq_ignore_case(&self.full_name, &other.full_name)
    }
}

impl Eq for DirectoryPath {}

impl Hash for DirectoryPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_ignore_case(&self.full_name, state);
    }
}

impl fmt::Display for DirectoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}

impl AsRef<Path> for DirectoryPath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl TryFrom<&Path> for DirectoryPath {
    type Error = PathError;

    fn try_from(path: &Path) -> Result<Self> {
        let raw = path
            .to_str()
            .ok_or_else(|| PathError::NotUnicode(path.to_path_buf()))?;
        Self::new(raw)
    }
}
