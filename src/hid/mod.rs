//! HID transport capability consumed by the mode controller, the pager and
//! the connectivity monitor.
//!
//! The firmware implements it with a Bluedroid HID-over-GATT keyboard
//! ([`ble_keyboard`], ESP-IDF only); tests use [`crate::testing::FakeTransport`].

#[cfg(target_os = "espidf")]
pub mod ble_keyboard;
pub mod keyboard;

pub use keyboard::{KeyCode, KeyboardReport, KEYBOARD_REPORT_MAP, KEYBOARD_REPORT_SIZE};

use std::sync::Arc;

// HID transport error types
#[derive(Debug, Clone, PartialEq)]
pub enum HidError {
    // Bring-up errors
    NotInitialized(String),
    AlreadyInitialized(String),
    ServiceRegistrationFailed(String),
    AdvertisingStartFailed(String),

    // Runtime errors
    NotConnected,
    NotifyFailed(String),

    // ESP-IDF error code with call context
    EspError(i32, String),
}

impl std::fmt::Display for HidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HidError::NotInitialized(msg) => write!(f, "HID transport not initialized: {}", msg),
            HidError::AlreadyInitialized(msg) => {
                write!(f, "HID transport already initialized: {}", msg)
            }
            HidError::ServiceRegistrationFailed(msg) => {
                write!(f, "HID GATT service registration failed: {}", msg)
            }
            HidError::AdvertisingStartFailed(msg) => {
                write!(f, "HID advertising start failed: {}", msg)
            }
            HidError::NotConnected => write!(f, "No HID host connected"),
            HidError::NotifyFailed(msg) => write!(f, "HID report notification failed: {}", msg),
            HidError::EspError(code, msg) => write!(f, "ESP-IDF error {}: {}", code, msg),
        }
    }
}

impl std::error::Error for HidError {}

// Result type for HID transport operations
pub type HidResult<T> = Result<T, HidError>;

/// HID keyboard transport.
///
/// All methods take `&self`: one transport is shared between tasks.
pub trait HidTransport {
    /// One-time bring-up (stack, services, advertising).
    fn begin(&self) -> HidResult<()>;

    /// Non-blocking connection status.
    fn is_connected(&self) -> bool;

    /// Press and release `key`. Fire-and-forget: failures are logged by the
    /// transport and never reported to the caller.
    fn send_key(&self, key: KeyCode);
}

impl<T: HidTransport + ?Sized> HidTransport for Arc<T> {
    fn begin(&self) -> HidResult<()> {
        (**self).begin()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send_key(&self, key: KeyCode) {
        (**self).send_key(key)
    }
}

impl<T: HidTransport + ?Sized> HidTransport for &T {
    fn begin(&self) -> HidResult<()> {
        (**self).begin()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send_key(&self, key: KeyCode) {
        (**self).send_key(key)
    }
}
