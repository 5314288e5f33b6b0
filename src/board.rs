// Board Support Module
// ESP-IDF GPIO adapters for the toggle button and the status LED

use std::sync::Arc;

use anyhow::{anyhow, Result};
use esp_idf_svc::hal::gpio::{AnyIOPin, AnyOutputPin, Input, InterruptType, Output, PinDriver, Pull};
use log::info;

use crate::mode_controller::ButtonInput;
use crate::system_state::ButtonEdge;

/// Active-low push button with a falling-edge interrupt.
///
/// The interrupt handler only raises the [`ButtonEdge`] flag. ESP-IDF
/// disables the pin interrupt after each notification; [`ButtonInput::rearm`]
/// enables it again.
pub struct PushButton {
    pin: PinDriver<'static, AnyIOPin, Input>,
}

impl PushButton {
    pub fn new(gpio: AnyIOPin, edge: Arc<ButtonEdge>) -> Result<Self> {
        let mut pin = PinDriver::input(gpio)
            .map_err(|e| anyhow!("Failed to configure button GPIO: {}", e))?;

        // Pull-up means a press reads LOW
        pin.set_pull(Pull::Up)
            .map_err(|e| anyhow!("Failed to set pull-up on button GPIO: {}", e))?;
        pin.set_interrupt_type(InterruptType::NegEdge)
            .map_err(|e| anyhow!("Failed to set button interrupt type: {}", e))?;

        // SAFETY: the callback runs in ISR context; it performs a single
        // atomic store and captures only an `Arc` that outlives the driver.
        unsafe {
            pin.subscribe(move || edge.raise())
                .map_err(|e| anyhow!("Failed to subscribe button interrupt: {}", e))?;
        }
        pin.enable_interrupt()
            .map_err(|e| anyhow!("Failed to enable button interrupt: {}", e))?;

        info!("✅ Button configured on GPIO{} (falling edge)", pin.pin());
        Ok(Self { pin })
    }
}

impl ButtonInput for PushButton {
    fn is_pressed(&mut self) -> bool {
        self.pin.is_low()
    }

    fn rearm(&mut self) -> Result<()> {
        self.pin
            .enable_interrupt()
            .map_err(|e| anyhow!("Failed to re-enable button interrupt: {}", e))
    }
}

/// Status LED output driver.
pub type StatusLed = PinDriver<'static, AnyOutputPin, Output>;

pub fn status_led(gpio: AnyOutputPin) -> Result<StatusLed> {
    let led = PinDriver::output(gpio).map_err(|e| anyhow!("Failed to configure LED GPIO: {}", e))?;
    info!("✅ Status LED configured on GPIO{}", led.pin());
    Ok(led)
}
