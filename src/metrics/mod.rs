//! Built-in metrics for reload operations.
//!
//! Provides OpenTelemetry metrics tracking:
//! - Reload attempts/success/failures
//! - Reload duration
//! - Type mismatches and validation failures
//! - Age of the published component
//!
//! # Examples
//!
//! ```rust,no_run
//! use hotswap_context::prelude::*;
//! use opentelemetry::global;
//!
//! # fn example(builder: ConfigContainerBuilder) {
//! let meter = global::meter("my-app");
//!
//! let service = ReloadableService::builder("greeter")
//!     .with_file("services.yaml")
//!     .with_metrics(meter)
//!     .build::<String>(builder);
//! # }
//! ```

mod reload_metrics;

pub use reload_metrics::ReloadMetrics;
