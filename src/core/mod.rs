//! Core reload machinery: change detection, handles and the service itself.

mod builder;
mod decision;
mod handle;
mod service;
mod settings;

pub use builder::ReloadableServiceBuilder;
pub use decision::{Fingerprint, ScanReport, WatchSet, WatchedResource};
pub use handle::{BuildOutcome, ComponentHandle, PinnedHandle};
pub use service::{ReloadableService, ServiceState};
pub use settings::ServiceSettings;
