//! File watching for automatic change checks.

use crate::core::ReloadableService;
use crate::error::{Result, ServiceError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Watches resource files and signals when any of them may have changed.
///
/// The directory containing each file is watched rather than the file
/// itself, so files that do not exist yet, are replaced atomically or are
/// removed are all noticed. Bursts of events are coalesced: one signal is
/// sent once the debounce duration has passed without further events.
///
/// A signal only means "check now". Whether anything actually changed is
/// decided by [`ReloadableService::check_and_reload`].
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::watch::ResourceWatcher;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (watcher, mut rx) = ResourceWatcher::new(Duration::from_millis(200))?;
/// watcher.watch("/etc/myapp/context.yaml").await?;
///
/// while let Some(()) = rx.recv().await {
///     println!("Context file touched, checking for changes");
/// }
/// # Ok(())
/// # }
/// ```
pub struct ResourceWatcher {
    watcher: Arc<tokio::sync::Mutex<RecommendedWatcher>>,
    debounce_duration: Duration,
    /// Watched files, shared with the notify callback for filtering.
    files: Arc<RwLock<HashSet<PathBuf>>>,
    /// Watched directories and how many watched files live in each.
    directories: Arc<tokio::sync::Mutex<HashMap<PathBuf, usize>>>,
}

impl ResourceWatcher {
    /// Create a new resource watcher.
    ///
    /// Must be called from within a Tokio runtime. The receiver gets one
    /// message per debounced burst of file events.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying file watcher cannot be created.
    pub fn new(debounce_duration: Duration) -> Result<(Self, mpsc::Receiver<()>)> {
        let (tx, rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
        let files: Arc<RwLock<HashSet<PathBuf>>> = Arc::default();

        let filter = Arc::clone(&files);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                let watched = filter.read();
                if event.paths.iter().any(|path| watched.contains(path)) {
                    let _ = event_tx.send(());
                }
            }
            Err(e) => tracing::warn!(error = %e, "File watcher error"),
        })
        .map_err(|e| ServiceError::Watch(format!("Failed to create file watcher: {e}")))?;

        let debounce = debounce_duration;
        tokio::spawn(async move {
            while event_rx.recv().await.is_some() {
                // Trailing debounce: wait for a quiet period.
                let mut deadline = Instant::now() + debounce;
                loop {
                    tokio::select! {
                        () = sleep_until(deadline) => break,
                        more = event_rx.recv() => match more {
                            Some(()) => deadline = Instant::now() + debounce,
                            None => break,
                        },
                    }
                }
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                watcher: Arc::new(tokio::sync::Mutex::new(watcher)),
                debounce_duration,
                files,
                directories: Arc::default(),
            },
            rx,
        ))
    }

    /// Add a file to watch for changes. The file itself may not exist yet,
    /// but its directory must.
    ///
    /// # Errors
    ///
    /// Returns an error if the containing directory cannot be resolved or watched.
    pub async fn watch(&self, path: impl AsRef<Path>) -> Result<()> {
        let (directory, file) = resolve(path.as_ref())?;

        if self.files.read().contains(&file) {
            return Ok(());
        }

        let mut directories = self.directories.lock().await;
        if !directories.contains_key(&directory) {
            self.watcher
                .lock()
                .await
                .watch(&directory, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    ServiceError::Watch(format!("Failed to watch {}: {e}", directory.display()))
                })?;
        }
        *directories.entry(directory).or_insert(0) += 1;
        self.files.write().insert(file.clone());

        tracing::debug!(path = %file.display(), "Watching resource");
        Ok(())
    }

    /// Stop watching a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be resolved or its directory
    /// cannot be unwatched.
    pub async fn unwatch(&self, path: impl AsRef<Path>) -> Result<()> {
        let (directory, file) = resolve(path.as_ref())?;

        if !self.files.write().remove(&file) {
            return Ok(());
        }

        let mut directories = self.directories.lock().await;
        let remaining = directories.get_mut(&directory).map(|count| {
            *count -= 1;
            *count
        });
        if remaining == Some(0) {
            directories.remove(&directory);
            self.watcher.lock().await.unwatch(&directory).map_err(|e| {
                ServiceError::Watch(format!("Failed to unwatch {}: {e}", directory.display()))
            })?;
        }

        Ok(())
    }

    /// Get the debounce duration for this watcher.
    pub fn debounce_duration(&self) -> Duration {
        self.debounce_duration
    }

    /// Get the currently watched files, sorted.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.files.read().iter().cloned().collect();
        paths.sort();
        paths
    }
}

/// Split a file path into its canonical directory and the file path inside it.
fn resolve(path: &Path) -> Result<(PathBuf, PathBuf)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ServiceError::Watch(format!("Not a file path: {}", path.display())))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let directory = parent.canonicalize().map_err(|e| {
        ServiceError::Watch(format!("Failed to resolve {}: {e}", parent.display()))
    })?;
    let file = directory.join(file_name);
    Ok((directory, file))
}

/// A running file watch that feeds a service.
///
/// The watch stops when this value is dropped or the service is stopped.
pub struct WatchTask {
    watcher: ResourceWatcher,
    task: JoinHandle<()>,
}

impl WatchTask {
    /// The underlying watcher, e.g. to watch additional files.
    pub fn watcher(&self) -> &ResourceWatcher {
        &self.watcher
    }

    /// Whether the watch loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T: Any + Send + Sync> ReloadableService<T> {
    /// Watch every file-backed resource and run a change check whenever one
    /// of them is touched.
    ///
    /// Must be called from within a Tokio runtime. Resources without a file
    /// path are not watched; combine with a [`super::ReloadScheduler`] for those.
    ///
    /// # Errors
    ///
    /// Returns an error if the watcher cannot be created or a resource
    /// directory cannot be watched.
    pub async fn watch_resources(self: &Arc<Self>, debounce: Duration) -> Result<WatchTask> {
        let (watcher, mut rx) = ResourceWatcher::new(debounce)?;
        for resource in self.resources() {
            if let Some(path) = resource.path() {
                watcher.watch(path).await?;
            }
        }

        tracing::info!(
            service = %self.id(),
            files = watcher.watched_paths().len(),
            "Watching service resources"
        );

        let service = Arc::clone(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                if let ControlFlow::Break(()) = super::run_check(&service).await {
                    break;
                }
            }
        });

        Ok(WatchTask { watcher, task })
    }
}
