//! Versioned resource implementations.
//!
//! A resource is a named blob of configuration that the reload path checks
//! for existence and modification time, and that a container builder reads.

mod file;
mod memory;

pub use file::FileResource;
pub use memory::MemoryResource;

use std::io::{self, Read};
use std::path::Path;
use std::time::SystemTime;

/// Trait for versioned configuration resources.
///
/// Implement this trait to back a reloadable service with something other
/// than local files (remote stores, generated content, ...).
pub trait Resource: Send + Sync {
    /// Human-readable description, used in logs and to pick a content format.
    fn description(&self) -> String;

    /// Whether the resource currently exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self) -> io::Result<bool>;

    /// Last modification time of the resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is absent or cannot be inspected.
    fn last_modified(&self) -> io::Result<SystemTime>;

    /// Open the resource content for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource is absent or cannot be opened.
    fn open(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Local filesystem path backing this resource, if any.
    ///
    /// File watchers only attach to resources that report a path.
    fn path(&self) -> Option<&Path> {
        None
    }
}
