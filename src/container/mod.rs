//! Child container contracts.
//!
//! A reloadable service never builds components itself. It hands its
//! resources and processors to a [`ContainerBuilder`], receives an isolated
//! [`Container`], looks one component up in it and eventually closes it.
//! [`ConfigContainerBuilder`] is the built-in builder, driven by
//! YAML/TOML/JSON definitions.

mod config_container;

pub use config_container::{ComponentContext, ConfigContainer, ConfigContainerBuilder};

use crate::error::{BuildError, CloseError};
use crate::resource::Resource;
use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Type-erased component value.
pub type AnyComponent = Arc<dyn Any + Send + Sync>;

type Destroyer = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

/// Destroy contract for components that own resources of their own.
///
/// A container destroys the components it built when it is closed. When a
/// handle is unloaded, its container is closed first and then `destroy` is
/// invoked on the exposed component. Each component is destroyed at most
/// once, whichever of the two gets there first.
pub trait Destroy: Send + Sync {
    /// Release whatever the component holds.
    fn destroy(&self);
}

/// A component stored in a container, together with its concrete type name.
#[derive(Clone)]
pub struct ComponentRef {
    value: AnyComponent,
    type_name: &'static str,
    destroyer: Option<Destroyer>,
    // Shared by every clone of this reference.
    destroyed: Arc<AtomicBool>,
}

impl ComponentRef {
    /// Wrap a component value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared component value.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            destroyer: None,
            destroyed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap a component that implements the [`Destroy`] contract.
    pub fn destroyable<T: Destroy + Any>(value: T) -> Self {
        let mut component = Self::new(value);
        component.destroyer = Some(Arc::new(|any: &(dyn Any + Send + Sync)| {
            if let Some(component) = any.downcast_ref::<T>() {
                component.destroy();
            }
        }));
        component
    }

    /// Name of the concrete component type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the component is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        (*self.value).is::<T>()
    }

    /// Get the component as `T`, if it has that type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Whether the component registered a destroy contract.
    pub fn is_destroyable(&self) -> bool {
        self.destroyer.is_some()
    }

    /// Invoke the destroy contract, if any.
    ///
    /// Runs at most once across all clones of this reference, so custom
    /// [`Container`] implementations may call it from `close` as well.
    pub fn destroy(&self) {
        let Some(destroyer) = &self.destroyer else {
            return;
        };
        if !self.destroyed.swap(true, Ordering::AcqRel) {
            destroyer(&*self.value);
        }
    }
}

impl fmt::Debug for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRef")
            .field("type_name", &self.type_name)
            .field("destroyable", &self.is_destroyable())
            .finish()
    }
}

/// An isolated, fully initialized set of components.
///
/// A container is exclusively owned by the handle that wraps it and is
/// closed exactly once, after every reader has released it.
pub trait Container: Send + Sync {
    /// Unique identifier of this container instance.
    fn id(&self) -> &str;

    /// Look up a component by name.
    fn component(&self, name: &str) -> Option<ComponentRef>;

    /// Name of the component exposed when the service does not ask for one.
    fn primary_name(&self) -> Option<&str>;

    /// Names of all components defined in this container.
    fn component_names(&self) -> Vec<String>;

    /// Release the container's resources.
    ///
    /// Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if some resources could not be released.
    fn close(&mut self) -> Result<(), CloseError>;
}

/// A component definition read from configuration, before construction.
#[derive(Debug, Clone)]
pub struct ComponentDefinition {
    /// Component name
    pub name: String,
    /// Factory kind that constructs the component
    pub kind: String,
    /// Remaining settings handed to the factory
    pub settings: config::Value,
}

/// Hook run over all definitions before any component is constructed.
pub trait DefinitionPostProcessor: Send + Sync {
    /// Inspect or rewrite the definitions.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the build.
    fn process(&self, definitions: &mut Vec<ComponentDefinition>) -> Result<(), BuildError>;
}

impl<F> DefinitionPostProcessor for F
where
    F: Fn(&mut Vec<ComponentDefinition>) -> Result<(), BuildError> + Send + Sync,
{
    fn process(&self, definitions: &mut Vec<ComponentDefinition>) -> Result<(), BuildError> {
        self(definitions)
    }
}

/// Hook run over every component right after its construction.
pub trait ComponentPostProcessor: Send + Sync {
    /// Inspect, wrap or replace a freshly built component.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the build.
    fn process(&self, name: &str, component: ComponentRef) -> Result<ComponentRef, BuildError>;
}

impl<F> ComponentPostProcessor for F
where
    F: Fn(&str, ComponentRef) -> Result<ComponentRef, BuildError> + Send + Sync,
{
    fn process(&self, name: &str, component: ComponentRef) -> Result<ComponentRef, BuildError> {
        self(name, component)
    }
}

/// Converts scalar settings before they reach component factories.
pub trait ConversionService: Send + Sync {
    /// Convert the setting found at `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be converted.
    fn convert(&self, key: &str, value: config::Value) -> Result<config::Value, BuildError>;
}

impl<F> ConversionService for F
where
    F: Fn(&str, config::Value) -> Result<config::Value, BuildError> + Send + Sync,
{
    fn convert(&self, key: &str, value: config::Value) -> Result<config::Value, BuildError> {
        self(key, value)
    }
}

/// Everything a builder needs to construct one child container.
#[derive(Clone, Copy)]
pub struct BuildRequest<'a> {
    /// Configuration resources, in merge order
    pub resources: &'a [Arc<dyn Resource>],
    /// Container consulted for components not defined locally
    pub parent: Option<&'a Arc<dyn Container>>,
    /// Hooks run over definitions before construction
    pub definition_processors: &'a [Arc<dyn DefinitionPostProcessor>],
    /// Hooks run over each constructed component
    pub component_processors: &'a [Arc<dyn ComponentPostProcessor>],
    /// Active profile names, in activation order
    pub profiles: &'a [String],
    /// Optional conversion applied to every setting
    pub conversion: Option<&'a Arc<dyn ConversionService>>,
}

/// Builds isolated child containers.
///
/// Implementations must not leak partial state: anything constructed before
/// a failure is released before the error is returned.
pub trait ContainerBuilder: Send + Sync {
    /// Build and fully initialize a container.
    ///
    /// # Errors
    ///
    /// Returns an error if any resource cannot be read or parsed, or if any
    /// component fails to construct.
    fn build(&self, request: &BuildRequest<'_>) -> Result<Box<dyn Container>, BuildError>;
}

impl<F> ContainerBuilder for F
where
    F: Fn(&BuildRequest<'_>) -> Result<Box<dyn Container>, BuildError> + Send + Sync,
{
    fn build(&self, request: &BuildRequest<'_>) -> Result<Box<dyn Container>, BuildError> {
        self(request)
    }
}
