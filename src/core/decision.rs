//! Change detection over the watched resource set.

use crate::resource::Resource;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;

/// Last observed existence/modification signature of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fingerprint {
    /// Never inspected, or the last inspection failed. Always counts as a change.
    Unknown,
    /// The resource did not exist.
    Absent,
    /// The resource existed with this modification time.
    Present(SystemTime),
}

/// A configured resource together with its last fingerprint.
#[derive(Clone)]
pub struct WatchedResource {
    resource: Arc<dyn Resource>,
    fingerprint: Fingerprint,
}

impl WatchedResource {
    fn new(resource: Arc<dyn Resource>) -> Self {
        Self {
            resource,
            fingerprint: Fingerprint::Unknown,
        }
    }

    /// The watched resource.
    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    /// Fingerprint recorded by the last scan.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    fn inspect(&self) -> io::Result<Fingerprint> {
        if !self.resource.exists()? {
            return Ok(Fingerprint::Absent);
        }
        match self.resource.last_modified() {
            Ok(modified) => Ok(Fingerprint::Present(modified)),
            // Removed between the two calls.
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Fingerprint::Absent),
            Err(e) => Err(e),
        }
    }
}

/// Outcome of one scan over the watched resources.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Indices of resources whose fingerprint changed (inspection failures included)
    pub changed: Vec<usize>,
    /// Indices of resources that could not be inspected
    pub failed: Vec<usize>,
}

impl ScanReport {
    /// Whether any resource changed.
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }
}

/// The ordered set of resources a service is built from.
///
/// Indices are stable for the lifetime of the set. Fingerprints are only
/// updated by [`WatchSet::scan`], so after any scan they reflect what was
/// last observed.
#[derive(Clone, Default)]
pub struct WatchSet {
    entries: Vec<WatchedResource>,
    resources: Vec<Arc<dyn Resource>>,
}

impl WatchSet {
    /// Create a set over the given resources, all fingerprints unknown.
    pub fn new(resources: impl IntoIterator<Item = Arc<dyn Resource>>) -> Self {
        let resources: Vec<_> = resources.into_iter().collect();
        Self {
            entries: resources.iter().cloned().map(WatchedResource::new).collect(),
            resources,
        }
    }

    /// Number of watched resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no resources are watched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The resources, in configuration order.
    pub fn resources(&self) -> &[Arc<dyn Resource>] {
        &self.resources
    }

    /// The watched entries, in configuration order.
    pub fn entries(&self) -> &[WatchedResource] {
        &self.entries
    }

    /// Inspect every resource and commit the new fingerprints.
    ///
    /// An inspection error is logged, reported as a change and leaves the
    /// fingerprint [`Fingerprint::Unknown`]; the scan carries on with the
    /// remaining resources.
    pub fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport::default();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            match entry.inspect() {
                Ok(current) => {
                    if current != entry.fingerprint {
                        tracing::debug!(
                            resource = %entry.resource.description(),
                            previous = ?entry.fingerprint,
                            current = ?current,
                            "Resource changed"
                        );
                        entry.fingerprint = current;
                        report.changed.push(index);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        resource = %entry.resource.description(),
                        error = %e,
                        "Failed to inspect resource, treating it as changed"
                    );
                    entry.fingerprint = Fingerprint::Unknown;
                    report.changed.push(index);
                    report.failed.push(index);
                }
            }
        }

        report
    }

    /// Decide whether the service should be rebuilt.
    ///
    /// An empty set never reloads. A failed previous attempt always reloads.
    /// Otherwise the answer is whether any resource changed since the last
    /// scan. Fingerprints are refreshed in every non-empty case.
    pub fn should_reload(&mut self, last_failed: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        let report = self.scan();
        last_failed || report.has_changes()
    }

    /// Same decision as [`WatchSet::should_reload`], without committing any
    /// fingerprint. A later `should_reload` still sees the change.
    pub fn peek(&self, last_failed: bool) -> bool {
        if self.is_empty() {
            return false;
        }
        if last_failed {
            return true;
        }
        self.entries.iter().any(|entry| match entry.inspect() {
            Ok(current) => current != entry.fingerprint,
            Err(e) => {
                tracing::debug!(
                    resource = %entry.resource.description(),
                    error = %e,
                    "Failed to inspect resource"
                );
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::MemoryResource;
    use proptest::prelude::*;
    use std::io::Read;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn watch(resource: &MemoryResource) -> WatchSet {
        WatchSet::new([Arc::new(resource.clone()) as Arc<dyn Resource>])
    }

    struct BrokenResource;

    impl Resource for BrokenResource {
        fn description(&self) -> String {
            "broken".to_string()
        }

        fn exists(&self) -> io::Result<bool> {
            Err(io::Error::other("permission denied"))
        }

        fn last_modified(&self) -> io::Result<SystemTime> {
            Err(io::Error::other("permission denied"))
        }

        fn open(&self) -> io::Result<Box<dyn Read + Send>> {
            Err(io::Error::other("permission denied"))
        }
    }

    #[test]
    fn test_empty_set_never_reloads() {
        let mut set = WatchSet::new(Vec::new());
        assert!(!set.should_reload(false));
        assert!(!set.should_reload(true));
    }

    #[test]
    fn test_first_scan_counts_as_change() {
        let resource = MemoryResource::absent("app.yaml");
        let mut set = watch(&resource);

        assert!(set.should_reload(false));
        assert_eq!(set.entries()[0].fingerprint(), Fingerprint::Absent);
    }

    #[test]
    fn test_absent_stays_absent() {
        let resource = MemoryResource::absent("app.yaml");
        let mut set = watch(&resource);
        set.scan();

        assert!(!set.should_reload(false));
    }

    #[test]
    fn test_appearance_and_disappearance() {
        let resource = MemoryResource::absent("app.yaml");
        let mut set = watch(&resource);
        set.scan();

        resource.set("a: 1", at(1));
        assert!(set.should_reload(false));
        assert_eq!(set.entries()[0].fingerprint(), Fingerprint::Present(at(1)));

        resource.remove();
        assert!(set.should_reload(false));
        assert_eq!(set.entries()[0].fingerprint(), Fingerprint::Absent);
    }

    #[test]
    fn test_modification_time() {
        let resource = MemoryResource::absent("app.yaml");
        resource.set("a: 1", at(1));
        let mut set = watch(&resource);
        set.scan();

        assert!(!set.should_reload(false));

        resource.touch(at(2));
        assert!(set.should_reload(false));
        assert!(!set.should_reload(false));
    }

    #[test]
    fn test_last_failure_forces_reload() {
        let resource = MemoryResource::new("app.yaml", "a: 1");
        let mut set = watch(&resource);
        set.scan();

        assert!(set.should_reload(true));
        assert!(!set.should_reload(false));
    }

    #[test]
    fn test_inspection_error_counts_as_change_and_scan_continues() {
        let healthy = MemoryResource::absent("b.yaml");
        let mut set = WatchSet::new([
            Arc::new(BrokenResource) as Arc<dyn Resource>,
            Arc::new(healthy.clone()) as Arc<dyn Resource>,
        ]);

        let report = set.scan();
        assert_eq!(report.failed, vec![0]);
        assert_eq!(report.changed, vec![0, 1]);
        assert_eq!(set.entries()[0].fingerprint(), Fingerprint::Unknown);
        assert_eq!(set.entries()[1].fingerprint(), Fingerprint::Absent);

        let report = set.scan();
        assert_eq!(report.changed, vec![0]);
    }

    #[test]
    fn test_peek_leaves_change_for_next_check() {
        let resource = MemoryResource::new("app.yaml", "a: 1");
        let mut set = watch(&resource);
        set.scan();
        assert!(!set.peek(false));

        resource.touch(at(7));
        assert!(set.peek(false));
        assert!(set.peek(false));
        assert_ne!(set.entries()[0].fingerprint(), Fingerprint::Present(at(7)));

        assert!(set.should_reload(false));
        assert!(!set.peek(false));
    }

    #[test]
    fn test_peek_on_empty_and_broken_sets() {
        let empty = WatchSet::new(Vec::new());
        assert!(!empty.peek(true));

        let mut broken = WatchSet::new([Arc::new(BrokenResource) as Arc<dyn Resource>]);
        broken.scan();
        assert!(broken.peek(false));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Set(u64),
        Touch(u64),
        Remove,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0u64..5).prop_map(Step::Set),
            (0u64..5).prop_map(Step::Touch),
            Just(Step::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_rescan_without_change_is_quiet(steps in prop::collection::vec(step(), 0..24)) {
            let resource = MemoryResource::absent("app.yaml");
            let mut set = watch(&resource);

            for step in steps {
                match step {
                    Step::Set(secs) => resource.set("a: 1", at(secs)),
                    Step::Touch(secs) => resource.touch(at(secs)),
                    Step::Remove => resource.remove(),
                }
                set.should_reload(false);
                prop_assert!(!set.should_reload(false));
            }
        }
    }
}
