// AutoPager firmware entry point
// Brings up the BLE HID keyboard, the button and the status LED, then spawns
// the four tasks that share the mode cell

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use embassy_executor::Spawner;
    use embassy_time::Delay;
    use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, IOPin, OutputPin};
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::info;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use autopager::board::{self, PushButton, StatusLed};
    use autopager::config::BOARD;
    use autopager::connectivity::ConnectivityMonitor;
    use autopager::hid::ble_keyboard::BleHidKeyboard;
    use autopager::hid::HidTransport;
    use autopager::led_manager::{IndicatorDriver, LedPolarity};
    use autopager::mode_controller::{ButtonHandler, ModeController};
    use autopager::pager::Pager;
    use autopager::{ButtonEdge, ModeCell};

    type Keyboard = Arc<BleHidKeyboard>;

    #[embassy_executor::task]
    async fn led_task(mut driver: IndicatorDriver<StatusLed, Delay>) {
        driver.run().await
    }

    #[embassy_executor::task]
    async fn button_task(mut handler: ButtonHandler<PushButton, Delay, Keyboard>) {
        handler.run().await
    }

    #[embassy_executor::task]
    async fn pager_task(mut pager: Pager<Keyboard, Delay, SmallRng>) {
        pager.run().await
    }

    #[embassy_executor::task]
    async fn connectivity_task(mut monitor: ConnectivityMonitor<Keyboard, Delay>) {
        monitor.run().await
    }

    pub fn start(spawner: Spawner) -> Result<()> {
        let peripherals = Peripherals::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        #[cfg(feature = "esp32c3-supermini")]
        let (button_gpio, led_gpio): (AnyIOPin, AnyOutputPin) = (
            peripherals.pins.gpio9.downgrade(),
            peripherals.pins.gpio8.downgrade_output(),
        );
        #[cfg(not(feature = "esp32c3-supermini"))]
        let (button_gpio, led_gpio): (AnyIOPin, AnyOutputPin) = (
            peripherals.pins.gpio0.downgrade(),
            peripherals.pins.gpio2.downgrade_output(),
        );
        info!(
            "📌 Board: button GPIO{}, LED GPIO{} ({})",
            BOARD.button_gpio,
            BOARD.led_gpio,
            if BOARD.led_active_low { "active-low" } else { "active-high" }
        );

        let keyboard: Keyboard = Arc::new(BleHidKeyboard::new(peripherals.modem, nvs)?);
        keyboard.begin()?;

        // Shared state starts in WaitingConnect with no pending edge
        let mode = Arc::new(ModeCell::new());
        let edge = Arc::new(ButtonEdge::new());

        // LED starts off
        let indicator = IndicatorDriver::new(
            mode.clone(),
            board::status_led(led_gpio)?,
            LedPolarity::from_active_low(BOARD.led_active_low),
            Delay,
        );

        let button = PushButton::new(button_gpio, edge.clone())?;
        let handler = ButtonHandler::new(
            edge,
            button,
            Delay,
            ModeController::new(mode.clone(), keyboard.clone()),
        );

        // SAFETY: esp_random only reads the hardware RNG register
        let seed = unsafe {
            (u64::from(esp_idf_svc::sys::esp_random()) << 32)
                | u64::from(esp_idf_svc::sys::esp_random())
        };
        let pager = Pager::new(
            mode.clone(),
            keyboard.clone(),
            Delay,
            SmallRng::seed_from_u64(seed),
        );

        let monitor = ConnectivityMonitor::new(mode, keyboard, Delay);

        spawner
            .spawn(led_task(indicator))
            .map_err(|e| anyhow!("Failed to spawn LED task: {:?}", e))?;
        spawner
            .spawn(button_task(handler))
            .map_err(|e| anyhow!("Failed to spawn button task: {:?}", e))?;
        spawner
            .spawn(pager_task(pager))
            .map_err(|e| anyhow!("Failed to spawn pager task: {:?}", e))?;
        spawner
            .spawn(connectivity_task(monitor))
            .map_err(|e| anyhow!("Failed to spawn connectivity task: {:?}", e))?;

        info!("✅ All tasks spawned, waiting for a host to connect");
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
#[embassy_executor::main]
async fn main(spawner: embassy_executor::Spawner) {
    // It is necessary to call this function once. Otherwise some patches to the runtime
    // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
    esp_idf_svc::sys::link_patches();

    // Bind the log crate to the ESP Logging facilities
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("🚀 Starting {}", autopager::config::DEVICE_NAME);

    if let Err(e) = firmware::start(spawner) {
        log::error!("❌ Startup failed: {:?}", e);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    println!(
        "autopager is ESP-IDF firmware; build it for an espidf target. \
         On the host, run `cargo test` to exercise the library."
    );
}
