//! AutoPager: a BLE HID keyboard that pages forward on a randomized interval.
//!
//! Four tasks share one [`system_state::ModeCell`]:
//!
//! - [`mode_controller::ButtonHandler`]: debounced button, mode transition table
//! - [`pager::Pager`]: randomized page-forward keystrokes while auto paging
//! - [`led_manager::IndicatorDriver`]: status LED blink pattern per mode
//! - [`connectivity::ConnectivityMonitor`]: syncs the mode with the BLE link
//!
//! Everything here is hardware independent and runs on the host; the ESP-IDF
//! adapters live in [`board`] and [`hid::ble_keyboard`].

#[cfg(target_os = "espidf")]
pub mod board;
pub mod config;
pub mod connectivity;
pub mod hid;
pub mod led_manager;
pub mod mode_controller;
pub mod pager;
pub mod system_state;
pub mod testing;

pub use system_state::{ButtonEdge, ModeCell, ModeSnapshot, SystemState};
