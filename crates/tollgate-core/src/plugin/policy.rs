//! Load policy for native plugin files.
//!
//! Checks applied to a plugin path before the dynamic loader sees it:
//! regular file, platform library extension, size limit and an optional
//! allow-list of directories.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Library extensions accepted on this platform.
#[cfg(target_os = "macos")]
pub const PLATFORM_EXTENSIONS: &[&str] = &["dylib"];

#[cfg(target_os = "windows")]
pub const PLATFORM_EXTENSIONS: &[&str] = &["dll"];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const PLATFORM_EXTENSIONS: &[&str] = &["so"];

/// Default maximum plugin file size (100 MB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Policy checked for every native plugin path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadPolicy {
    /// Directories plugins must live under. Empty allows any directory.
    pub allowed_dirs: Vec<PathBuf>,

    /// Maximum plugin file size in bytes
    pub max_file_size: u64,

    /// Reject files without the platform's library extension
    pub require_platform_extension: bool,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            allowed_dirs: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            require_platform_extension: true,
        }
    }
}

impl LoadPolicy {
    /// A policy that only requires the path to be a regular file.
    pub fn permissive() -> Self {
        Self {
            allowed_dirs: Vec::new(),
            max_file_size: u64::MAX,
            require_platform_extension: false,
        }
    }

    /// Add an allowed directory.
    pub fn add_allowed_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.allowed_dirs.push(path.as_ref().to_path_buf());
        self
    }

    /// Set the maximum plugin file size.
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set whether the platform library extension is required.
    pub fn with_platform_extension(mut self, require: bool) -> Self {
        self.require_platform_extension = require;
        self
    }

    /// Validate an existing plugin path.
    pub fn check(&self, path: &Path) -> Result<(), PolicyViolation> {
        let metadata = std::fs::metadata(path).map_err(|source| PolicyViolation::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if !metadata.is_file() {
            return Err(PolicyViolation::NotAFile(path.to_path_buf()));
        }

        if self.require_platform_extension {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !PLATFORM_EXTENSIONS.contains(&ext) {
                return Err(PolicyViolation::InvalidExtension {
                    path: path.to_path_buf(),
                    expected: PLATFORM_EXTENSIONS,
                });
            }
        }

        if metadata.len() > self.max_file_size {
            return Err(PolicyViolation::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                max: self.max_file_size,
            });
        }

        if !self.allowed_dirs.is_empty() {
            let canonical = path.canonicalize().map_err(|source| PolicyViolation::Io {
                path: path.to_path_buf(),
                source,
            })?;

            let allowed = self.allowed_dirs.iter().any(|dir| {
                dir.canonicalize()
                    .map(|dir| canonical.starts_with(dir))
                    .unwrap_or(false)
            });
            if !allowed {
                return Err(PolicyViolation::OutsideAllowedDirs(path.to_path_buf()));
            }
        }

        Ok(())
    }
}

/// A plugin path rejected by [`LoadPolicy`].
#[derive(Debug, thiserror::Error)]
pub enum PolicyViolation {
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("invalid library extension for {}, expected one of {expected:?}", .path.display())]
    InvalidExtension {
        path: PathBuf,
        expected: &'static [&'static str],
    },

    #[error("{} is too large: {size} bytes (max {max})", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("{} is outside the allowed plugin directories", .0.display())]
    OutsideAllowedDirs(PathBuf),

    #[error("cannot inspect {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
