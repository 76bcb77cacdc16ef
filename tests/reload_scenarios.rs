//! End-to-end reload behavior against configuration files on disk.

use hotswap_context::container::{BuildRequest, ComponentDefinition};
use hotswap_context::prelude::*;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

struct Greeter {
    message: String,
    released: Arc<AtomicUsize>,
}

impl Destroy for Greeter {
    fn destroy(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct GreeterSettings {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Counter {
    value: u32,
}

fn container_builder(released: &Arc<AtomicUsize>) -> ConfigContainerBuilder {
    let released = Arc::clone(released);
    ConfigContainerBuilder::new()
        .with_component_factory("greeter", move |ctx| {
            let settings: GreeterSettings = ctx.settings()?;
            Ok(ComponentRef::destroyable(Greeter {
                message: settings.message,
                released: Arc::clone(&released),
            }))
        })
        .with_factory("counter", |ctx| ctx.settings::<Counter>())
}

fn greeter(message: &str) -> String {
    format!("components:\n  greeter:\n    kind: greeter\n    message: {message}\n")
}

const COUNTER: &str = "components:\n  counter:\n    kind: counter\n    value: 7\n";

/// Write `content` and pin the modification time so checks are deterministic.
fn write_at(path: &Path, content: &str, secs: u64) {
    fs::write(path, content).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs))
        .unwrap();
}

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    released: Arc<AtomicUsize>,
    service: Arc<ReloadableService<Greeter>>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("greeter")
        .with_file(&path)
        .build::<Greeter>(container_builder(&released));
    Fixture {
        _dir: dir,
        path,
        released,
        service: Arc::new(service),
    }
}

#[test]
fn test_reload_lifecycle() {
    let Fixture {
        _dir,
        path,
        released,
        service,
    } = fixture();

    // Missing resource: the first load fails and nothing is published.
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Degraded);
    assert!(service.get_handle().is_none());
    assert!(service.reload_failure().unwrap().contains("context.yaml"));

    // The resource appears with a valid definition.
    write_at(&path, &greeter("hello"), 1);
    assert!(service.check_and_reload().unwrap());
    assert_eq!(service.state(), ServiceState::Healthy);
    let first = service.get_handle().unwrap();
    assert_eq!(first.message, "hello");
    let first_id = first.id();
    first.unpin();

    // Unchanged: no rebuild, same handle.
    assert!(!service.should_reload());
    assert!(!service.check_and_reload().unwrap());
    assert_eq!(service.get_handle().unwrap().id(), first_id);

    // Touched with a component of the wrong type: the previous handle stays.
    write_at(&path, COUNTER, 2);
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::WrongType { .. })
    ));
    assert_eq!(service.state(), ServiceState::Degraded);
    let still = service.get_handle().unwrap();
    assert_eq!(still.id(), first_id);
    assert_eq!(still.message, "hello");
    assert_eq!(released.load(Ordering::SeqCst), 0);

    // A pinned reader keeps the old container alive past publication.
    write_at(&path, &greeter("bonjour"), 3);
    let reloader = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.check_and_reload())
    };

    let mut published = false;
    for _ in 0..200 {
        if service
            .get_handle()
            .is_some_and(|handle| handle.message == "bonjour")
        {
            published = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(published);
    assert_eq!(service.state(), ServiceState::Healthy);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert!(!reloader.is_finished());
    assert_eq!(still.message, "hello");

    still.unpin();
    assert!(reloader.join().unwrap().unwrap());
    assert_eq!(released.load(Ordering::SeqCst), 1);

    service.stop().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn test_removed_resource_keeps_previous_component() {
    let Fixture {
        _dir,
        path,
        service,
        ..
    } = fixture();

    write_at(&path, &greeter("hello"), 1);
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Healthy);

    fs::remove_file(&path).unwrap();
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::Build(BuildError::MissingResource(_)))
    ));
    assert_eq!(service.get_handle().unwrap().message, "hello");

    // A failed attempt is retried on every check until it succeeds.
    assert!(service.check_and_reload().is_err());
    write_at(&path, &greeter("back"), 2);
    assert!(service.check_and_reload().unwrap());
    assert_eq!(service.get_handle().unwrap().message, "back");
}

#[test]
fn test_validation_rejects_component() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("greeter")
        .with_file(&path)
        .with_validation(|greeter: &Greeter| {
            if greeter.message.is_empty() {
                return Err(ValidationError::invalid_field("message", "must not be empty"));
            }
            Ok(())
        })
        .build::<Greeter>(container_builder(&released));

    write_at(&path, &greeter("hello"), 1);
    service.start().unwrap();

    write_at(&path, &greeter("''"), 2);
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::Validation(_))
    ));
    assert_eq!(service.get_handle().unwrap().message, "hello");
    // The rejected component was torn down.
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fail_fast_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("greeter")
        .with_file(&path)
        .fail_fast(true)
        .build::<Greeter>(container_builder(&released));

    assert!(service.start().is_err());
    assert_eq!(service.state(), ServiceState::Uninitialized);

    write_at(&path, &greeter("hello"), 1);
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Healthy);
}

#[test]
fn test_profiles_and_overrides() {
    let dir = TempDir::new().unwrap();
    let base = dir.path().join("base.yaml");
    let local = dir.path().join("local.json");
    write_at(
        &base,
        "components:\n  greeter:\n    kind: greeter\n    message: base\n\
         profiles:\n  french:\n    components:\n      greeter:\n        kind: greeter\n        message: salut\n",
        1,
    );

    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("greeter")
        .with_file(&base)
        .with_file(&local)
        .with_profile("french")
        .build::<Greeter>(container_builder(&released));

    // The second file does not exist yet, so the build fails.
    service.start().unwrap();
    assert!(service.get_handle().is_none());

    write_at(&local, "{}", 1);
    service.check_and_reload().unwrap();
    assert_eq!(service.get_handle().unwrap().message, "salut");
}

#[test]
fn test_named_component_and_parent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    write_at(
        &path,
        "primary: counter\ncomponents:\n  counter:\n    kind: counter\n    value: 3\n  \
         greeter:\n    kind: greeter\n    message: hi\n",
        1,
    );

    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("greeter")
        .with_file(&path)
        .with_component_name("greeter")
        .build::<Greeter>(container_builder(&released));
    service.start().unwrap();
    assert_eq!(service.get_handle().unwrap().message, "hi");

    let counters = ReloadableService::builder("counter")
        .with_file(&path)
        .build::<Counter>(container_builder(&released));
    counters.start().unwrap();
    assert_eq!(counters.get_handle().unwrap().value, 3);
}

#[test]
fn test_stop_waits_for_pins() {
    let Fixture {
        _dir,
        path,
        released,
        service,
    } = fixture();
    write_at(&path, &greeter("hello"), 1);
    service.start().unwrap();

    let pinned = service.get_handle().unwrap();
    let stopper = {
        let service = Arc::clone(&service);
        thread::spawn(move || service.stop())
    };

    thread::sleep(Duration::from_millis(50));
    assert_eq!(released.load(Ordering::SeqCst), 0);
    assert!(service.get_handle().is_none());

    drop(pinned);
    stopper.join().unwrap().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::Stopped(_))
    ));
}

#[test]
fn test_subscribers_receive_events() {
    let Fixture {
        _dir,
        path,
        service,
        ..
    } = fixture();

    let events = Arc::new(Mutex::new(Vec::new()));
    let subscription = {
        let events = Arc::clone(&events);
        service.subscribe(move |event| events.lock().unwrap().push(event.clone()))
    };

    service.start().unwrap();
    write_at(&path, &greeter("hello"), 1);
    service.check_and_reload().unwrap();

    drop(subscription);
    write_at(&path, &greeter("again"), 2);
    service.check_and_reload().unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], ReloadEvent::Failed { service, .. } if service == "greeter"));
    assert!(matches!(&events[1], ReloadEvent::Published { .. }));
}

#[test]
fn test_service_from_settings_file() {
    let dir = TempDir::new().unwrap();
    let context = dir.path().join("context.yaml");
    write_at(&context, &greeter("configured"), 1);

    let settings_path = dir.path().join("service.toml");
    fs::write(
        &settings_path,
        format!(
            "id = \"from-settings\"\nresources = [\"{}\"]\nfail_fast = true\ncheck_interval_ms = 250\n",
            context.display()
        ),
    )
    .unwrap();

    let released = Arc::new(AtomicUsize::new(0));
    let service = ReloadableService::builder("placeholder")
        .with_settings(ServiceSettings::from_file(&settings_path).unwrap())
        .build::<Greeter>(container_builder(&released));

    assert_eq!(service.id(), "from-settings");
    assert_eq!(service.check_interval(), Some(Duration::from_millis(250)));
    service.start().unwrap();
    assert_eq!(service.get_handle().unwrap().message, "configured");
}

#[derive(Debug, Deserialize)]
struct Prefix {
    value: String,
}

#[test]
fn test_parent_processors_and_conversion() {
    let parent_resource: Arc<dyn Resource> = Arc::new(MemoryResource::new(
        "parent.yaml",
        "components:\n  prefix:\n    kind: prefix\n    value: hello\n",
    ));
    let parent_builder =
        ConfigContainerBuilder::new().with_factory("prefix", |ctx| ctx.settings::<Prefix>());
    let parent: Arc<dyn Container> = Arc::from(
        parent_builder
            .build(&BuildRequest {
                resources: std::slice::from_ref(&parent_resource),
                parent: None,
                definition_processors: &[],
                component_processors: &[],
                profiles: &[],
                conversion: None,
            })
            .unwrap(),
    );

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    write_at(
        &path,
        "components:\n  greeter:\n    kind: prefixed\n    message: world\n",
        1,
    );

    let released = Arc::new(AtomicUsize::new(0));
    let builder = {
        let released = Arc::clone(&released);
        container_builder(&released).with_component_factory("prefixed", move |ctx| {
            let prefix = ctx.component_as::<Prefix>("prefix")?;
            let settings: GreeterSettings = ctx.settings()?;
            Ok(ComponentRef::destroyable(Greeter {
                message: format!("{} {}", prefix.value, settings.message),
                released: Arc::clone(&released),
            }))
        })
    };

    let service = ReloadableService::builder("greeter")
        .with_file(&path)
        .with_parent(parent)
        .with_definition_processor(
            |definitions: &mut Vec<ComponentDefinition>| -> std::result::Result<(), BuildError> {
                if definitions.iter().any(|d| d.kind == "counter") {
                    return Err(BuildError::PostProcess("counters are not allowed".to_string()));
                }
                Ok(())
            },
        )
        .with_conversion(
            |key: &str, value: config::Value| -> std::result::Result<config::Value, BuildError> {
                if key != "greeter.message" {
                    return Ok(value);
                }
                let text = value.into_string().map_err(|e| BuildError::Conversion {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(config::Value::new(None, text.to_uppercase()))
            },
        )
        .build::<Greeter>(builder);

    service.start().unwrap();
    assert_eq!(service.get_handle().unwrap().message, "hello WORLD");

    write_at(&path, COUNTER, 2);
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::Build(BuildError::PostProcess(_)))
    ));
    assert_eq!(service.get_handle().unwrap().message, "hello WORLD");
}

struct Pool {
    size: u32,
    released: Arc<AtomicUsize>,
}

impl Destroy for Pool {
    fn destroy(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Deserialize)]
struct PoolSettings {
    size: u32,
}

struct Front {
    pool: Arc<Pool>,
}

fn front(size: u32) -> String {
    format!("primary: front\ncomponents:\n  front:\n    kind: front\n  pool:\n    kind: pool\n    size: {size}\n")
}

#[test]
fn test_dependencies_released_with_their_container() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("context.yaml");
    let released = Arc::new(AtomicUsize::new(0));
    let builder = {
        let released = Arc::clone(&released);
        ConfigContainerBuilder::new()
            .with_component_factory("pool", move |ctx| {
                let settings: PoolSettings = ctx.settings()?;
                Ok(ComponentRef::destroyable(Pool {
                    size: settings.size,
                    released: Arc::clone(&released),
                }))
            })
            .with_factory("front", |ctx| {
                Ok(Front {
                    pool: ctx.component_as::<Pool>("pool")?,
                })
            })
    };
    let service = ReloadableService::builder("front")
        .with_file(&path)
        .build::<Front>(builder);

    write_at(&path, &front(4), 1);
    service.start().unwrap();
    assert_eq!(service.get_handle().unwrap().pool.size, 4);

    // A container rejected for exposing the wrong type releases its pool.
    write_at(&path, "components:\n  pool:\n    kind: pool\n    size: 9\n", 2);
    assert!(matches!(
        service.check_and_reload(),
        Err(ServiceError::WrongType { .. })
    ));
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(service.get_handle().unwrap().pool.size, 4);

    // Replacing the published container releases the old pool once.
    write_at(&path, &front(8), 3);
    assert!(service.check_and_reload().unwrap());
    assert_eq!(service.get_handle().unwrap().pool.size, 8);
    assert_eq!(released.load(Ordering::SeqCst), 2);

    service.stop().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 3);
}
