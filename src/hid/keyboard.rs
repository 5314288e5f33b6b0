//! HID keyboard report (boot protocol compatible) and the report descriptor
//! published over BLE.
//!
//! Input report layout (8 bytes, report ID 1):
//! ```text
//! Byte 0: Modifier keys (bitfield)
//! Byte 1: Reserved (0x00)
//! Byte 2-7: Up to 6 simultaneous key codes (HID usage page 0x07)
//! ```

use core::fmt;

/// Keyboard input report size in bytes.
pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// Report ID of the keyboard input/output reports in [`KEYBOARD_REPORT_MAP`].
pub const KEYBOARD_REPORT_ID: u8 = 0x01;

/// A HID keyboard usage code (usage page 0x07).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCode(pub u8);

impl KeyCode {
    pub const PAGE_DOWN: KeyCode = KeyCode(0x4E);
    pub const RIGHT_ARROW: KeyCode = KeyCode(0x4F);

    /// The key sent for one "page forward".
    pub const PAGE_FORWARD: KeyCode = KeyCode::RIGHT_ARROW;

    pub const fn usage(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyCode::RIGHT_ARROW => write!(f, "RightArrow"),
            KeyCode::PAGE_DOWN => write!(f, "PageDown"),
            KeyCode(usage) => write!(f, "KeyCode({:#04x})", usage),
        }
    }
}

/// Standard boot-protocol keyboard report.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct KeyboardReport {
    /// Modifier key bitfield.
    pub modifier: u8,
    /// Reserved byte, always zero.
    pub reserved: u8,
    /// Up to 6 simultaneously pressed key codes.
    pub keycodes: [u8; 6],
}

impl KeyboardReport {
    /// All keys released.
    pub const fn released() -> Self {
        Self {
            modifier: 0,
            reserved: 0,
            keycodes: [0; 6],
        }
    }

    /// A single key held, no modifiers.
    pub const fn press(key: KeyCode) -> Self {
        Self {
            modifier: 0,
            reserved: 0,
            keycodes: [key.usage(), 0, 0, 0, 0, 0],
        }
    }

    pub fn is_released(&self) -> bool {
        self.modifier == 0 && self.keycodes.iter().all(|&k| k == 0)
    }

    pub fn to_bytes(&self) -> [u8; KEYBOARD_REPORT_SIZE] {
        let k = &self.keycodes;
        [self.modifier, self.reserved, k[0], k[1], k[2], k[3], k[4], k[5]]
    }
}

/// Report descriptor for the HID service's Report Map characteristic.
///
/// One keyboard collection (report ID 1): 8 modifier bits, a reserved byte,
/// a 5-bit LED output report and a 6-key array, boot-protocol compatible.
pub const KEYBOARD_REPORT_MAP: [u8; 65] = [
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, KEYBOARD_REPORT_ID, //   Report ID (1)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute) ; modifier byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) ; reserved byte
    0x95, 0x05, //   Report Count (5)
    0x75, 0x01, //   Report Size (1)
    0x05, 0x08, //   Usage Page (LEDs)
    0x19, 0x01, //   Usage Minimum (1)
    0x29, 0x05, //   Usage Maximum (5)
    0x91, 0x02, //   Output (Data, Variable, Absolute) ; LED report
    0x95, 0x01, //   Report Count (1)
    0x75, 0x03, //   Report Size (3)
    0x91, 0x01, //   Output (Constant) ; LED report padding
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array) ; key array (6 bytes)
    0xC0, // End Collection
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_report_layout() {
        let report = KeyboardReport::press(KeyCode::PAGE_FORWARD);
        assert_eq!(report.to_bytes(), [0x00, 0x00, 0x4F, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert!(!report.is_released());
    }

    #[test]
    fn test_released_report_is_all_zero() {
        let report = KeyboardReport::released();
        assert_eq!(report.to_bytes(), [0u8; KEYBOARD_REPORT_SIZE]);
        assert!(report.is_released());
        assert_eq!(report, KeyboardReport::default());
    }

    #[test]
    fn test_page_forward_is_right_arrow() {
        assert_eq!(KeyCode::PAGE_FORWARD, KeyCode::RIGHT_ARROW);
        assert_eq!(format!("{:?}", KeyCode::PAGE_FORWARD), "RightArrow");
        assert_eq!(format!("{:?}", KeyCode(0x04)), "KeyCode(0x04)");
    }

    #[test]
    fn test_report_map_is_one_keyboard_collection() {
        assert_eq!(&KEYBOARD_REPORT_MAP[..6], &[0x05, 0x01, 0x09, 0x06, 0xA1, 0x01]);
        assert_eq!(KEYBOARD_REPORT_MAP[6..8], [0x85, KEYBOARD_REPORT_ID]);
        assert_eq!(KEYBOARD_REPORT_MAP.last(), Some(&0xC0));
    }
}
