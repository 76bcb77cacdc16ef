//! In-memory resource with explicit modification times.

use super::Resource;
use parking_lot::RwLock;
use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Debug)]
struct MemoryState {
    content: Option<Vec<u8>>,
    modified: SystemTime,
}

/// A resource held in memory.
///
/// Clones share the same content, so one clone can be handed to a service
/// while another is used to update, touch or remove it. Modification times
/// are set explicitly, which makes change detection deterministic.
///
/// # Examples
///
/// ```rust
/// use hotswap_context::resource::{MemoryResource, Resource};
/// use std::time::{Duration, SystemTime};
///
/// let resource = MemoryResource::absent("inline.yaml");
/// assert!(!resource.exists().unwrap());
///
/// let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1);
/// resource.set("primary: greeter", t1);
/// assert_eq!(resource.last_modified().unwrap(), t1);
/// ```
#[derive(Debug, Clone)]
pub struct MemoryResource {
    name: String,
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryResource {
    /// Create a resource that does not exist yet.
    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(MemoryState {
                content: None,
                modified: SystemTime::UNIX_EPOCH,
            })),
        }
    }

    /// Create a resource with content, modified now.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let resource = Self::absent(name);
        resource.set(content, SystemTime::now());
        resource
    }

    /// Replace the content and modification time.
    pub fn set(&self, content: impl Into<Vec<u8>>, modified: SystemTime) {
        let mut state = self.state.write();
        state.content = Some(content.into());
        state.modified = modified;
    }

    /// Change the modification time without touching the content.
    ///
    /// Has no effect on an absent resource.
    pub fn touch(&self, modified: SystemTime) {
        let mut state = self.state.write();
        if state.content.is_some() {
            state.modified = modified;
        }
    }

    /// Remove the resource.
    pub fn remove(&self) {
        self.state.write().content = None;
    }

    fn not_found(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("resource '{}' does not exist", self.name),
        )
    }
}

impl Resource for MemoryResource {
    fn description(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn exists(&self) -> io::Result<bool> {
        Ok(self.state.read().content.is_some())
    }

    fn last_modified(&self) -> io::Result<SystemTime> {
        let state = self.state.read();
        match state.content {
            Some(_) => Ok(state.modified),
            None => Err(self.not_found()),
        }
    }

    fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        let state = self.state.read();
        match &state.content {
            Some(content) => Ok(Box::new(Cursor::new(content.clone()))),
            None => Err(self.not_found()),
        }
    }
}
