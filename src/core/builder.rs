//! Builder for constructing ReloadableService instances.

use crate::container::{
    ComponentPostProcessor, Container, ContainerBuilder, ConversionService,
    DefinitionPostProcessor,
};
use crate::core::service::{ReloadableService, ServiceParts, Validator};
use crate::core::settings::ServiceSettings;
use crate::error::ValidationError;
use crate::resource::{FileResource, Resource};
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "metrics")]
use crate::metrics::ReloadMetrics;

/// Type alias for any-based validator functions used during building.
type AnyValidator =
    Arc<dyn Fn(&dyn Any) -> std::result::Result<(), ValidationError> + Send + Sync>;

/// Builder for constructing a [`ReloadableService`].
///
/// Nothing is read or built until [`ReloadableService::start`] is called.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::prelude::*;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Banner {
///     text: String,
/// }
///
/// # fn example() -> Result<()> {
/// let builder = ConfigContainerBuilder::new()
///     .with_factory("banner", |ctx| ctx.settings::<Banner>());
///
/// let service = ReloadableService::builder("banner")
///     .with_file("config/banner.yaml")
///     .with_file("config/banner.local.yaml")
///     .with_profile("production")
///     .build::<Banner>(builder);
/// service.start()?;
/// # Ok(())
/// # }
/// ```
pub struct ReloadableServiceBuilder {
    id: String,
    resources: Vec<Arc<dyn Resource>>,
    parent: Option<Arc<dyn Container>>,
    definition_processors: Vec<Arc<dyn DefinitionPostProcessor>>,
    component_processors: Vec<Arc<dyn ComponentPostProcessor>>,
    profiles: Vec<String>,
    conversion: Option<Arc<dyn ConversionService>>,
    component_name: Option<String>,
    validator: Option<AnyValidator>,
    fail_fast: bool,
    check_interval: Option<Duration>,
    #[cfg(feature = "metrics")]
    metrics: Option<ReloadMetrics>,
}

impl ReloadableServiceBuilder {
    /// Create a builder for the service with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resources: Vec::new(),
            parent: None,
            definition_processors: Vec::new(),
            component_processors: Vec::new(),
            profiles: Vec::new(),
            conversion: None,
            component_name: None,
            validator: None,
            fail_fast: false,
            check_interval: None,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Files are merged in the order they are added; later files override
    /// earlier ones. The file does not need to exist yet.
    pub fn with_file(self, path: impl Into<PathBuf>) -> Self {
        self.with_resource(FileResource::new(path))
    }

    /// Add a configuration resource.
    pub fn with_resource<R: Resource + 'static>(self, resource: R) -> Self {
        self.with_shared_resource(Arc::new(resource))
    }

    /// Add a configuration resource shared with other owners.
    pub fn with_shared_resource(mut self, resource: Arc<dyn Resource>) -> Self {
        self.resources.push(resource);
        self
    }

    /// Set the parent container consulted for components not defined in the
    /// child container.
    pub fn with_parent(mut self, parent: Arc<dyn Container>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Activate a profile. Profiles apply in the order they are activated.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profiles.push(profile.into());
        self
    }

    /// Activate several profiles.
    pub fn with_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles.extend(profiles.into_iter().map(Into::into));
        self
    }

    /// Add a hook run over the component definitions of every rebuild.
    pub fn with_definition_processor<P: DefinitionPostProcessor + 'static>(
        mut self,
        processor: P,
    ) -> Self {
        self.definition_processors.push(Arc::new(processor));
        self
    }

    /// Add a hook run over every component constructed by a rebuild.
    pub fn with_component_processor<P: ComponentPostProcessor + 'static>(
        mut self,
        processor: P,
    ) -> Self {
        self.component_processors.push(Arc::new(processor));
        self
    }

    /// Set the conversion applied to component settings.
    pub fn with_conversion<C: ConversionService + 'static>(mut self, conversion: C) -> Self {
        self.conversion = Some(Arc::new(conversion));
        self
    }

    /// Expose the component with this name instead of the container's
    /// primary component.
    pub fn with_component_name(mut self, name: impl Into<String>) -> Self {
        self.component_name = Some(name.into());
        self
    }

    /// Add a validation function a new component must pass before it is
    /// published.
    ///
    /// A rejected component is unloaded and the previous one stays published.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use hotswap_context::prelude::*;
    /// use serde::Deserialize;
    ///
    /// #[derive(Debug, Deserialize)]
    /// struct Pool {
    ///     size: u32,
    /// }
    ///
    /// let service = ReloadableService::builder("pool")
    ///     .with_file("pool.yaml")
    ///     .with_validation(|pool: &Pool| {
    ///         if pool.size == 0 {
    ///             return Err(ValidationError::invalid_field("size", "must be positive"));
    ///         }
    ///         Ok(())
    ///     })
    ///     .build::<Pool>(ConfigContainerBuilder::new().with_factory("pool", |ctx| ctx.settings::<Pool>()));
    /// ```
    pub fn with_validation<F, T>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> std::result::Result<(), ValidationError> + Send + Sync + 'static,
        T: 'static,
    {
        self.validator = Some(Arc::new(move |component: &dyn Any| {
            let typed = component
                .downcast_ref::<T>()
                .ok_or_else(|| ValidationError::custom("Type mismatch in validator"))?;
            validator(typed)
        }));
        self
    }

    /// Fail [`ReloadableService::start`] when the initial load fails, instead
    /// of starting in the degraded state.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Interval between periodic change checks. Zero disables them.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Apply settings loaded from a file.
    ///
    /// Resources and profiles are appended; scalar options replace what was
    /// set before.
    pub fn with_settings(mut self, settings: ServiceSettings) -> Self {
        let check_interval = settings.check_interval();
        if let Some(id) = settings.id {
            self.id = id;
        }
        for path in settings.resources {
            self = self.with_file(path);
        }
        self.profiles.extend(settings.profiles);
        if let Some(component) = settings.component {
            self.component_name = Some(component);
        }
        self.fail_fast = settings.fail_fast;
        self.check_interval = check_interval;
        self
    }

    /// Record reload metrics on the given meter.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, meter: opentelemetry::metrics::Meter) -> Self {
        self.metrics = Some(ReloadMetrics::new(meter));
        self
    }

    /// Build the service around the given container builder.
    ///
    /// # Type Parameters
    ///
    /// * `T` - The type of the exposed component
    pub fn build<T>(self, builder: impl ContainerBuilder + 'static) -> ReloadableService<T>
    where
        T: Any + Send + Sync,
    {
        // Convert the Any-based validator to a typed validator
        let validator: Option<Validator<T>> = self.validator.map(|v| {
            Arc::new(move |component: &T| v(component as &dyn Any)) as Validator<T>
        });

        ReloadableService::from_parts(ServiceParts {
            id: self.id,
            builder: Arc::new(builder),
            resources: self.resources,
            parent: self.parent,
            definition_processors: self.definition_processors,
            component_processors: self.component_processors,
            profiles: self.profiles,
            conversion: self.conversion,
            component_name: self.component_name,
            validator,
            fail_fast: self.fail_fast,
            check_interval: self.check_interval,
            #[cfg(feature = "metrics")]
            metrics: self.metrics,
        })
    }
}

impl ReloadableService<()> {
    /// Create a new builder for a service with the given identifier.
    pub fn builder(id: impl Into<String>) -> ReloadableServiceBuilder {
        ReloadableServiceBuilder::new(id)
    }
}
