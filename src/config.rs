// Firmware Configuration Module
// Compile-time timing constants, board pin assignments and device identity
// Timings are fixed by design; only the board layout is selectable (cargo feature)

// Button handling
pub const BUTTON_DEBOUNCE_MS: u32 = 50; // Settle time before re-reading the pin
pub const BUTTON_POLL_MS: u32 = 10; // Edge flag and release poll interval

// Pager timing: uniform draw from [PAGER_MIN_DELAY_MS, PAGER_MAX_DELAY_MS)
pub const PAGER_MIN_DELAY_MS: u32 = 30_000;
pub const PAGER_MAX_DELAY_MS: u32 = 45_000;
pub const PAGER_IDLE_POLL_MS: u32 = 100;

// Connectivity monitor cycle
pub const CONNECTIVITY_POLL_MS: u32 = 100;

// Status LED blink periods
pub const LED_WAITING_HALF_PERIOD_MS: u32 = 250; // 2 Hz
pub const LED_CONNECTED_RECHECK_MS: u32 = 100; // solid on
pub const LED_PAGING_HALF_PERIOD_MS: u32 = 1000; // 0.5 Hz

// BLE device identity
pub const DEVICE_NAME: &str = "AutoPager";
pub const MANUFACTURER_NAME: &str = "ESP32";
pub const BATTERY_LEVEL_PERCENT: u8 = 100;

/// Board pin layout and LED polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardLayout {
    pub button_gpio: u8,
    pub led_gpio: u8,
    pub led_active_low: bool,
}

/// ESP32-C3 SuperMini: BOOT button on GPIO9, blue LED on GPIO8 wired to VCC.
pub const ESP32C3_SUPERMINI: BoardLayout = BoardLayout {
    button_gpio: 9,
    led_gpio: 8,
    led_active_low: true,
};

/// Generic ESP32 DevKit: BOOT button on GPIO0, on-board LED on GPIO2.
pub const ESP32_DEVKIT: BoardLayout = BoardLayout {
    button_gpio: 0,
    led_gpio: 2,
    led_active_low: false,
};

#[cfg(feature = "esp32c3-supermini")]
pub const BOARD: BoardLayout = ESP32C3_SUPERMINI;

#[cfg(not(feature = "esp32c3-supermini"))]
pub const BOARD: BoardLayout = ESP32_DEVKIT;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pager_window_is_non_empty() {
        assert!(PAGER_MIN_DELAY_MS < PAGER_MAX_DELAY_MS);
        assert_eq!(PAGER_MAX_DELAY_MS - PAGER_MIN_DELAY_MS, 15_000);
    }

    #[test]
    fn test_board_layouts() {
        assert_eq!(ESP32C3_SUPERMINI.button_gpio, 9);
        assert!(ESP32C3_SUPERMINI.led_active_low);
        assert_eq!(ESP32_DEVKIT.led_gpio, 2);
        assert!(!ESP32_DEVKIT.led_active_low);
    }
}
