//! Container builder driven by configuration files.
//!
//! Resources are merged in order with the `config` crate (later resources
//! override earlier ones). The merged document declares components:
//!
//! ```yaml
//! primary: greeter
//! components:
//!   greeter:
//!     kind: greeter
//!     message: "hello"
//! profiles:
//!   loud:
//!     components:
//!       greeter:
//!         kind: greeter
//!         message: "HELLO"
//! ```
//!
//! Each `kind` maps to a factory registered on [`ConfigContainerBuilder`].

use super::{
    BuildRequest, ComponentDefinition, ComponentPostProcessor, ComponentRef, Container,
    ContainerBuilder, ConversionService,
};
use crate::error::{BuildError, CloseError};
use crate::resource::Resource;
use config::{FileFormat, Value, ValueKind};
use serde::de::DeserializeOwned;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);

type Factory = Arc<dyn Fn(&ComponentContext<'_>) -> Result<ComponentRef, BuildError> + Send + Sync>;

/// Builds [`ConfigContainer`]s from YAML, TOML or JSON resources.
///
/// The format of each resource is taken from the extension of its
/// description (`.yaml`, `.yml`, `.toml`, `.json`).
///
/// # Examples
///
/// ```rust
/// use hotswap_context::container::ConfigContainerBuilder;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Greeter {
///     message: String,
/// }
///
/// let builder = ConfigContainerBuilder::new()
///     .with_factory("greeter", |ctx| ctx.settings::<Greeter>());
/// assert_eq!(builder.kinds(), vec!["greeter"]);
/// ```
#[derive(Clone, Default)]
pub struct ConfigContainerBuilder {
    factories: HashMap<String, Factory>,
}

impl ConfigContainerBuilder {
    /// Create a builder with no factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing components of type `T` for `kind`.
    pub fn with_factory<T, F>(self, kind: impl Into<String>, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&ComponentContext<'_>) -> Result<T, BuildError> + Send + Sync + 'static,
    {
        self.with_component_factory(kind, move |ctx: &ComponentContext<'_>| {
            factory(ctx).map(ComponentRef::new)
        })
    }

    /// Register a factory that wraps its component itself.
    ///
    /// Use this for components implementing [`super::Destroy`] or for
    /// components exposed as shared trait objects.
    pub fn with_component_factory<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ComponentContext<'_>) -> Result<ComponentRef, BuildError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Registered factory kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<_> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    fn load(&self, resources: &[Arc<dyn Resource>]) -> Result<config::Config, BuildError> {
        let mut builder = config::Config::builder();

        for resource in resources {
            let description = resource.description();
            let read_error = |source| BuildError::Read {
                resource: description.clone(),
                source,
            };

            if !resource.exists().map_err(read_error)? {
                return Err(BuildError::MissingResource(description));
            }

            let format = format_of(&description)?;
            let mut content = String::new();
            resource
                .open()
                .and_then(|mut reader| reader.read_to_string(&mut content))
                .map_err(read_error)?;

            builder = builder.add_source(config::File::from_str(&content, format));
        }

        builder
            .build()
            .map_err(|e| BuildError::Parse(e.to_string()))
    }
}

impl ContainerBuilder for ConfigContainerBuilder {
    fn build(&self, request: &BuildRequest<'_>) -> Result<Box<dyn Container>, BuildError> {
        let merged = self.load(request.resources)?;

        let mut definitions = match lookup(&merged, "components")? {
            Some(table) => read_definitions(table)?,
            None => Vec::new(),
        };
        let mut primary = lookup_string(&merged, "primary")?;

        for profile in request.profiles {
            if let Some(table) = lookup(&merged, &format!("profiles.{profile}.components"))? {
                for overriding in read_definitions(table)? {
                    definitions.retain(|d| d.name != overriding.name);
                    definitions.push(overriding);
                }
            }
            if let Some(name) = lookup_string(&merged, &format!("profiles.{profile}.primary"))? {
                primary = Some(name);
            }
        }

        for processor in request.definition_processors {
            processor.process(&mut definitions)?;
        }

        if let Some(conversion) = request.conversion {
            for definition in &mut definitions {
                let settings = definition.settings.clone();
                definition.settings = convert_value(conversion.as_ref(), &definition.name, settings)?;
            }
        }

        if primary.is_none() && definitions.len() == 1 {
            primary = Some(definitions[0].name.clone());
        }

        let mut names: Vec<String> = definitions.iter().map(|d| d.name.clone()).collect();
        names.sort_unstable();

        let id = format!("context-{}", NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed));
        let session = Session {
            definitions: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            factories: &self.factories,
            processors: request.component_processors,
            parent: request.parent,
            built: RefCell::new(Vec::new()),
            in_progress: RefCell::new(Vec::new()),
        };

        let outcome = names
            .iter()
            .try_for_each(|name| session.get_or_build(name).map(drop))
            .and_then(|()| match &primary {
                Some(name) if !session.definitions.contains_key(name) => {
                    Err(BuildError::NoComponent(name.clone()))
                }
                _ => Ok(()),
            });

        let mut container = ConfigContainer {
            id,
            components: session.built.into_inner(),
            primary,
            parent: request.parent.cloned(),
            closed: false,
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    container = %container.id,
                    components = container.components.len(),
                    "Built container"
                );
                Ok(Box::new(container))
            }
            Err(e) => {
                // Release whatever was constructed before the failure.
                if let Err(close) = container.close() {
                    tracing::warn!(
                        container = %container.id,
                        error = %close,
                        "Failed to close partially built container"
                    );
                }
                Err(e)
            }
        }
    }
}

/// Construction state for one build: lazily builds components on first
/// reference so factories can depend on each other.
struct Session<'a> {
    definitions: HashMap<String, ComponentDefinition>,
    factories: &'a HashMap<String, Factory>,
    processors: &'a [Arc<dyn ComponentPostProcessor>],
    parent: Option<&'a Arc<dyn Container>>,
    built: RefCell<Vec<(String, ComponentRef)>>,
    in_progress: RefCell<Vec<String>>,
}

impl Session<'_> {
    fn get_or_build(&self, name: &str) -> Result<ComponentRef, BuildError> {
        let existing = self
            .built
            .borrow()
            .iter()
            .find(|(built, _)| built == name)
            .map(|(_, component)| component.clone());
        if let Some(component) = existing {
            return Ok(component);
        }

        let Some(definition) = self.definitions.get(name) else {
            return self
                .parent
                .and_then(|parent| parent.component(name))
                .ok_or_else(|| BuildError::NoComponent(name.to_string()));
        };

        if self.in_progress.borrow().iter().any(|pending| pending == name) {
            return Err(BuildError::Definition {
                component: name.to_string(),
                reason: "circular reference".to_string(),
            });
        }

        let factory = self
            .factories
            .get(&definition.kind)
            .ok_or_else(|| BuildError::UnknownKind {
                component: name.to_string(),
                kind: definition.kind.clone(),
            })?;

        self.in_progress.borrow_mut().push(name.to_string());
        let constructed = factory(&ComponentContext {
            definition,
            session: self,
        });
        self.in_progress.borrow_mut().pop();

        let mut component = constructed?;
        for processor in self.processors {
            let original = component.clone();
            component = processor
                .process(name, component)
                .inspect_err(|_| original.destroy())?;
        }

        self.built
            .borrow_mut()
            .push((name.to_string(), component.clone()));
        Ok(component)
    }
}

/// What a component factory sees while constructing one component.
pub struct ComponentContext<'a> {
    definition: &'a ComponentDefinition,
    session: &'a Session<'a>,
}

impl ComponentContext<'_> {
    /// Name of the component being constructed.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Raw settings of the component, without its `kind`.
    pub fn raw_settings(&self) -> &Value {
        &self.definition.settings
    }

    /// Deserialize the component settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings do not match `S`.
    pub fn settings<S: DeserializeOwned>(&self) -> Result<S, BuildError> {
        self.definition
            .settings
            .clone()
            .try_deserialize()
            .map_err(|e| BuildError::Definition {
                component: self.definition.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Resolve another component, constructing it first if needed.
    ///
    /// Names not defined in this container are looked up in the parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the component is unknown, circular, or fails to build.
    pub fn component(&self, name: &str) -> Result<ComponentRef, BuildError> {
        self.session.get_or_build(name)
    }

    /// Resolve another component as `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the component cannot be resolved or is not a `T`.
    pub fn component_as<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, BuildError> {
        let component = self.component(name)?;
        component.downcast::<T>().ok_or_else(|| {
            BuildError::construction(
                self.name(),
                format_args!(
                    "dependency '{}' has type {}, expected {}",
                    name,
                    component.type_name(),
                    std::any::type_name::<T>()
                ),
            )
        })
    }
}

/// Container produced by [`ConfigContainerBuilder`].
pub struct ConfigContainer {
    id: String,
    components: Vec<(String, ComponentRef)>,
    primary: Option<String>,
    parent: Option<Arc<dyn Container>>,
    closed: bool,
}

impl ConfigContainer {
    /// Whether the container has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Container for ConfigContainer {
    fn id(&self) -> &str {
        &self.id
    }

    fn component(&self, name: &str) -> Option<ComponentRef> {
        self.components
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, component)| component.clone())
            .or_else(|| self.parent.as_ref().and_then(|p| p.component(name)))
    }

    fn primary_name(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    fn component_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.components.iter().map(|(n, _)| n.clone()).collect();
        names.sort_unstable();
        names
    }

    fn close(&mut self) -> Result<(), CloseError> {
        if self.closed {
            return Ok(());
        }

        // Dependents were constructed after their dependencies.
        while let Some((name, component)) = self.components.pop() {
            tracing::trace!(container = %self.id, component = %name, "Releasing component");
            component.destroy();
        }
        self.parent = None;
        self.closed = true;

        tracing::debug!(container = %self.id, "Closed container");
        Ok(())
    }
}

fn format_of(description: &str) -> Result<FileFormat, BuildError> {
    let extension = description.rsplit_once('.').map(|(_, ext)| ext);
    match extension {
        Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
        Some("toml") => Ok(FileFormat::Toml),
        Some("json") => Ok(FileFormat::Json),
        _ => Err(BuildError::UnsupportedFormat(description.to_string())),
    }
}

fn lookup(merged: &config::Config, key: &str) -> Result<Option<Value>, BuildError> {
    match merged.get::<Value>(key) {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(BuildError::Parse(e.to_string())),
    }
}

fn lookup_string(merged: &config::Config, key: &str) -> Result<Option<String>, BuildError> {
    lookup(merged, key)?
        .map(|value| value.into_string())
        .transpose()
        .map_err(|e| BuildError::Parse(format!("'{}': {}", key, e)))
}

fn read_definitions(table: Value) -> Result<Vec<ComponentDefinition>, BuildError> {
    let table = table
        .into_table()
        .map_err(|e| BuildError::Parse(format!("components must be a table: {}", e)))?;

    let mut definitions = Vec::with_capacity(table.len());
    for (name, body) in table {
        let invalid = |reason: String| BuildError::Definition {
            component: name.clone(),
            reason,
        };

        let mut settings = body.into_table().map_err(|e| invalid(e.to_string()))?;
        let kind = settings
            .remove("kind")
            .ok_or_else(|| invalid("missing 'kind'".to_string()))?
            .into_string()
            .map_err(|e| invalid(e.to_string()))?;

        definitions.push(ComponentDefinition {
            name: name.clone(),
            kind,
            settings: Value::new(None, ValueKind::Table(settings)),
        });
    }
    Ok(definitions)
}

fn convert_value(
    conversion: &dyn ConversionService,
    key: &str,
    value: Value,
) -> Result<Value, BuildError> {
    match value.kind {
        ValueKind::Table(table) => {
            let mut converted = config::Map::new();
            for (child, inner) in table {
                let path = format!("{}.{}", key, child);
                converted.insert(child, convert_value(conversion, &path, inner)?);
            }
            Ok(Value::new(None, ValueKind::Table(converted)))
        }
        ValueKind::Array(items) => {
            let converted = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| convert_value(conversion, &format!("{}[{}]", key, i), item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::new(None, ValueKind::Array(converted)))
        }
        _ => conversion.convert(key, value),
    }
}
