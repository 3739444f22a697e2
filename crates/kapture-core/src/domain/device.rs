//! Input device identity.
//!
//! Every physical keyboard or mouse attached to the machine is known to the
//! platform by an opaque handle.  Kapture pairs that handle with the
//! human-readable device name the platform reports, which is what handler
//! patterns are matched against.
//!
//! # Handle lifetime
//!
//! A handle is unique for as long as the device stays connected.  When a
//! device disappears from an enumeration its identity is considered removed;
//! if a later enumeration reports the same handle again it is treated as a
//! brand new arrival.

use std::fmt;

/// Opaque platform handle for one physical input device.
///
/// On Windows this is the raw-input `HANDLE` value; on the simulated
/// channels it is any number the test chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub usize);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The two device classes Kapture captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Keyboard,
    Mouse,
}

/// One entry of a platform device listing, before it becomes an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceDescriptor {
    pub handle: DeviceHandle,
    pub class: DeviceClass,
    /// Platform-reported device name, e.g. `\\?\HID#VID_046D&PID_C31C#...`.
    pub name: String,
}

impl RawDeviceDescriptor {
    pub fn new(handle: DeviceHandle, class: DeviceClass, name: impl Into<String>) -> Self {
        Self {
            handle,
            class,
            name: name.into(),
        }
    }
}

/// A known, currently connected input device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    handle: DeviceHandle,
    class: DeviceClass,
    name: String,
}

impl DeviceIdentity {
    pub fn new(handle: DeviceHandle, class: DeviceClass, name: impl Into<String>) -> Self {
        Self {
            handle,
            class,
            name: name.into(),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    /// The platform-reported name that handler patterns are matched against.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<RawDeviceDescriptor> for DeviceIdentity {
    fn from(desc: RawDeviceDescriptor) -> Self {
        Self::new(desc.handle, desc.class, desc.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_from_descriptor_keeps_all_fields() {
        // Arrange
        let desc = RawDeviceDescriptor::new(DeviceHandle(0x2a), DeviceClass::Mouse, "usb-mouse");

        // Act
        let identity = DeviceIdentity::from(desc);

        // Assert
        assert_eq!(identity.handle(), DeviceHandle(0x2a));
        assert_eq!(identity.class(), DeviceClass::Mouse);
        assert_eq!(identity.name(), "usb-mouse");
    }

    #[test]
    fn test_device_handle_displays_as_hex() {
        assert_eq!(DeviceHandle(255).to_string(), "0xff");
    }
}
