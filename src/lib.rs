//! # hotswap-context
//!
//! Reloadable services whose components live in child containers that are
//! rebuilt and hot-swapped when their configuration changes.
//!
//! ## Overview
//!
//! A [`ReloadableService`](core::ReloadableService) exposes one typed
//! component drawn from an isolated child container:
//! - Readers pin the published component without ever waiting on a reload
//! - Changes are detected from the existence and modification time of each
//!   configuration resource
//! - A failed or rejected rebuild keeps the previous component published
//! - A replaced container is closed only after its last reader is done
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hotswap_context::prelude::*;
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Database {
//!     url: String,
//!     pool_size: u32,
//! }
//!
//! # fn example() -> hotswap_context::error::Result<()> {
//! // context.yaml:
//! //   components:
//! //     database:
//! //       kind: database
//! //       url: postgres://localhost/app
//! //       pool_size: 8
//! let builder = ConfigContainerBuilder::new()
//!     .with_factory("database", |ctx| ctx.settings::<Database>());
//!
//! let service = ReloadableService::builder("database")
//!     .with_file("config/context.yaml")
//!     .build::<Database>(builder);
//! service.start()?;
//!
//! // Pinned until the handle is dropped
//! if let Some(db) = service.get_handle() {
//!     println!("Connecting to {} with {} connections", db.url, db.pool_size);
//! }
//!
//! // Rebuild if context.yaml changed since the last check
//! service.check_and_reload()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `file-watch` (default): reload when watched files change
//! - `scheduler` (default): periodic change checks
//! - `metrics`: OpenTelemetry reload metrics
//!
//! ```toml
//! [dependencies]
//! hotswap-context = { version = "0.1", features = ["metrics"] }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![deny(unsafe_code)]

pub mod container;
pub mod core;
pub mod error;
pub mod resource;
pub mod watch;

#[cfg(feature = "metrics")]
pub mod metrics;

/// Convenient re-exports for common usage patterns.
pub mod prelude {
    pub use crate::container::{
        ComponentContext, ComponentRef, ConfigContainerBuilder, Container, ContainerBuilder,
        Destroy,
    };
    pub use crate::core::{
        PinnedHandle, ReloadableService, ReloadableServiceBuilder, ServiceSettings, ServiceState,
    };
    pub use crate::error::{BuildError, Result, ServiceError, ValidationError};
    pub use crate::resource::{FileResource, MemoryResource, Resource};
    pub use crate::watch::ReloadEvent;
}
