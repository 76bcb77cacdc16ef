//! Filesystem-backed resource.

use super::Resource;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A resource backed by a file on the local filesystem.
///
/// The file may legitimately be missing: [`Resource::exists`] then reports
/// `false` instead of failing, so the service can track its appearance.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::resource::{FileResource, Resource};
///
/// let resource = FileResource::new("config/services.yaml");
/// if resource.exists().unwrap_or(false) {
///     println!("modified at {:?}", resource.last_modified());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct FileResource {
    path: PathBuf,
}

impl FileResource {
    /// Create a resource for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Resource for FileResource {
    fn description(&self) -> String {
        format!("file:{}", self.path.display())
    }

    fn exists(&self) -> io::Result<bool> {
        self.path.try_exists()
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        fs::metadata(&self.path)?.modified()
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}
