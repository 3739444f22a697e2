//! DeviceRegistry: the live set of attached keyboards and mice.
//!
//! The registry keeps the most recent device enumeration keyed by
//! [`DeviceHandle`].  [`DeviceRegistry::refresh`] re-enumerates through a
//! [`DeviceSource`], replaces the snapshot and reports the difference, which
//! the dispatcher turns into handler-chain creation and removal.
//!
//! # Concurrency
//!
//! Lookups happen on the hook pump thread for every event, refreshes only on
//! enumeration requests and device hot-plug.  A reader-writer lock lets
//! lookups proceed in parallel; a refresh takes the exclusive side only for
//! the snapshot swap, never while talking to the platform.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::device::{DeviceClass, DeviceHandle, DeviceIdentity, RawDeviceDescriptor};

/// Device listing failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("device enumeration failed during {step}: {reason}")]
pub struct EnumerationError {
    /// Name of the platform call or stage that failed.
    pub step: &'static str,
    pub reason: String,
}

/// Anything that can list the attached input devices.
///
/// Implemented by the platform raw channel; tests supply canned listings.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceSource {
    /// Lists every keyboard and mouse currently attached.
    fn enumerate_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError>;
}

/// Devices that appeared and disappeared in one refresh.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceDelta {
    pub added: Vec<Arc<DeviceIdentity>>,
    pub removed: Vec<Arc<DeviceIdentity>>,
}

impl DeviceDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The live device table.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceHandle, Arc<DeviceIdentity>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-enumerates devices, replaces the snapshot and returns the delta.
    ///
    /// A device whose handle is still listed but whose name or class changed
    /// is reported as removed and re-added.  Duplicate handles in one listing
    /// are ignored after the first.
    ///
    /// # Errors
    ///
    /// Propagates [`EnumerationError`] from the source; the previous snapshot
    /// is kept untouched in that case.
    pub fn refresh(&self, source: &dyn DeviceSource) -> Result<DeviceDelta, EnumerationError> {
        let listing = source.enumerate_devices()?;

        let mut fresh: HashMap<DeviceHandle, Arc<DeviceIdentity>> =
            HashMap::with_capacity(listing.len());
        for desc in listing {
            if fresh.contains_key(&desc.handle) {
                warn!(handle = %desc.handle, "duplicate device handle in listing, ignored");
                continue;
            }
            fresh.insert(desc.handle, Arc::new(DeviceIdentity::from(desc)));
        }

        let mut devices = self.devices.write();
        let mut delta = DeviceDelta::default();
        for (handle, old) in devices.iter() {
            match fresh.get(handle) {
                Some(new) if new == old => {}
                _ => delta.removed.push(Arc::clone(old)),
            }
        }
        for (handle, new) in fresh.iter() {
            match devices.get(handle) {
                Some(old) if old == new => {}
                _ => delta.added.push(Arc::clone(new)),
            }
        }

        // Unchanged devices keep their existing Arc so resolved events stay
        // pointer-equal across refreshes.
        for (handle, slot) in fresh.iter_mut() {
            if let Some(old) = devices.get(handle) {
                if old == slot {
                    *slot = Arc::clone(old);
                }
            }
        }
        *devices = fresh;
        drop(devices);

        delta.added.sort_by_key(|d| d.handle());
        delta.removed.sort_by_key(|d| d.handle());
        debug!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            "device registry refreshed"
        );
        Ok(delta)
    }

    pub fn lookup(&self, handle: DeviceHandle) -> Option<Arc<DeviceIdentity>> {
        self.devices.read().get(&handle).cloned()
    }

    /// All known devices, keyboards first, each class ordered by handle.
    pub fn snapshot(&self) -> Vec<Arc<DeviceIdentity>> {
        let mut all = self.by_class(DeviceClass::Keyboard);
        all.extend(self.by_class(DeviceClass::Mouse));
        all
    }

    pub fn keyboards(&self) -> Vec<Arc<DeviceIdentity>> {
        self.by_class(DeviceClass::Keyboard)
    }

    pub fn mice(&self) -> Vec<Arc<DeviceIdentity>> {
        self.by_class(DeviceClass::Mouse)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn by_class(&self, class: DeviceClass) -> Vec<Arc<DeviceIdentity>> {
        let mut out: Vec<_> = self
            .devices
            .read()
            .values()
            .filter(|d| d.class() == class)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.handle());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kbd(handle: usize, name: &str) -> RawDeviceDescriptor {
        RawDeviceDescriptor::new(DeviceHandle(handle), DeviceClass::Keyboard, name)
    }

    fn mouse(handle: usize, name: &str) -> RawDeviceDescriptor {
        RawDeviceDescriptor::new(DeviceHandle(handle), DeviceClass::Mouse, name)
    }

    fn source_returning(listing: Vec<RawDeviceDescriptor>) -> MockDeviceSource {
        let mut source = MockDeviceSource::new();
        source
            .expect_enumerate_devices()
            .returning(move || Ok(listing.clone()));
        source
    }

    #[test]
    fn test_first_refresh_reports_every_device_as_added() {
        // Arrange
        let registry = DeviceRegistry::new();
        let source = source_returning(vec![kbd(1, "kbd-a"), mouse(2, "mouse-a")]);

        // Act
        let delta = registry.refresh(&source).unwrap();

        // Assert
        assert_eq!(delta.added.len(), 2);
        assert!(delta.removed.is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_refresh_reports_removed_and_added_devices() {
        // Arrange
        let registry = DeviceRegistry::new();
        registry
            .refresh(&source_returning(vec![kbd(1, "kbd-a"), kbd(2, "kbd-b")]))
            .unwrap();

        // Act
        let delta = registry
            .refresh(&source_returning(vec![kbd(2, "kbd-b"), kbd(3, "kbd-c")]))
            .unwrap();

        // Assert
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].handle(), DeviceHandle(3));
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].handle(), DeviceHandle(1));
        assert!(registry.lookup(DeviceHandle(1)).is_none());
    }

    #[test]
    fn test_unchanged_refresh_keeps_identity_pointers() {
        // Arrange
        let registry = DeviceRegistry::new();
        let source = source_returning(vec![kbd(1, "kbd-a")]);
        registry.refresh(&source).unwrap();
        let before = registry.lookup(DeviceHandle(1)).unwrap();

        // Act
        let delta = registry.refresh(&source).unwrap();

        // Assert
        assert!(delta.is_empty());
        let after = registry.lookup(DeviceHandle(1)).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_renamed_device_is_removed_and_re_added() {
        let registry = DeviceRegistry::new();
        registry.refresh(&source_returning(vec![kbd(1, "old")])).unwrap();

        let delta = registry.refresh(&source_returning(vec![kbd(1, "new")])).unwrap();

        assert_eq!(delta.removed[0].name(), "old");
        assert_eq!(delta.added[0].name(), "new");
    }

    #[test]
    fn test_failed_enumeration_keeps_previous_snapshot() {
        // Arrange
        let registry = DeviceRegistry::new();
        registry.refresh(&source_returning(vec![kbd(1, "kbd-a")])).unwrap();
        let mut failing = MockDeviceSource::new();
        failing.expect_enumerate_devices().returning(|| {
            Err(EnumerationError {
                step: "GetRawInputDeviceList",
                reason: "access denied".to_string(),
            })
        });

        // Act
        let result = registry.refresh(&failing);

        // Assert
        assert!(result.is_err());
        assert!(registry.lookup(DeviceHandle(1)).is_some());
    }

    #[test]
    fn test_duplicate_handles_keep_first_entry() {
        let registry = DeviceRegistry::new();
        registry
            .refresh(&source_returning(vec![kbd(1, "first"), kbd(1, "second")]))
            .unwrap();
        assert_eq!(registry.lookup(DeviceHandle(1)).unwrap().name(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_groups_keyboards_before_mice() {
        // Arrange
        let registry = DeviceRegistry::new();
        registry
            .refresh(&source_returning(vec![
                mouse(1, "m1"),
                kbd(4, "k4"),
                kbd(2, "k2"),
            ]))
            .unwrap();

        // Act
        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|d| d.name().to_string())
            .collect();

        // Assert
        assert_eq!(names, vec!["k2", "k4", "m1"]);
        assert_eq!(registry.keyboards().len(), 2);
        assert_eq!(registry.mice().len(), 1);
    }
}
