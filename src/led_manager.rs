use std::sync::Arc;

use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::info;

use crate::config::{LED_CONNECTED_RECHECK_MS, LED_PAGING_HALF_PERIOD_MS, LED_WAITING_HALF_PERIOD_MS};
use crate::system_state::{ModeCell, SystemState};

/// Electrical polarity of the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPolarity {
    ActiveHigh,
    ActiveLow,
}

impl LedPolarity {
    pub const fn from_active_low(active_low: bool) -> Self {
        if active_low {
            LedPolarity::ActiveLow
        } else {
            LedPolarity::ActiveHigh
        }
    }
}

/// One period of the status waveform: on for `on_ms`, then off for `off_ms`.
/// `off_ms == 0` is solid on, re-checked every `on_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub on_ms: u32,
    pub off_ms: u32,
}

impl BlinkPattern {
    pub const fn for_state(state: SystemState) -> Self {
        match state {
            SystemState::WaitingConnect => Self {
                on_ms: LED_WAITING_HALF_PERIOD_MS,
                off_ms: LED_WAITING_HALF_PERIOD_MS,
            },
            SystemState::Connected => Self {
                on_ms: LED_CONNECTED_RECHECK_MS,
                off_ms: 0,
            },
            SystemState::AutoPaging => Self {
                on_ms: LED_PAGING_HALF_PERIOD_MS,
                off_ms: LED_PAGING_HALF_PERIOD_MS,
            },
        }
    }

    pub const fn is_solid(&self) -> bool {
        self.off_ms == 0
    }
}

/// Renders the current mode on the status LED.
///
/// The mode is only re-read at period boundaries, so a change shows up at
/// most one period late.
pub struct IndicatorDriver<P, D> {
    mode: Arc<ModeCell>,
    led: P,
    polarity: LedPolarity,
    delay: D,
    rendered: Option<SystemState>,
}

impl<P, D> IndicatorDriver<P, D>
where
    P: OutputPin,
    D: DelayNs,
{
    pub fn new(mode: Arc<ModeCell>, led: P, polarity: LedPolarity, delay: D) -> Self {
        let mut driver = Self {
            mode,
            led,
            polarity,
            delay,
            rendered: None,
        };
        driver.set_led(false);
        driver
    }

    pub async fn run(&mut self) -> ! {
        info!("LED Task started - connection status indicator");

        loop {
            self.run_period().await;
        }
    }

    /// Play one full period of the current mode's pattern.
    pub async fn run_period(&mut self) -> SystemState {
        let state = self.mode.get();

        // Only log when the rendered mode changes
        if self.rendered != Some(state) {
            match state {
                SystemState::WaitingConnect => info!("🔵 LED blinking 2 Hz - waiting for connection"),
                SystemState::Connected => info!("🟢 LED solid - host connected"),
                SystemState::AutoPaging => info!("🟡 LED blinking 0.5 Hz - auto paging"),
            }
            self.rendered = Some(state);
        }

        let pattern = BlinkPattern::for_state(state);
        self.set_led(true);
        self.delay.delay_ms(pattern.on_ms).await;
        if !pattern.is_solid() {
            self.set_led(false);
            self.delay.delay_ms(pattern.off_ms).await;
        }

        state
    }

    fn set_led(&mut self, on: bool) {
        let high = match self.polarity {
            LedPolarity::ActiveHigh => on,
            LedPolarity::ActiveLow => !on,
        };
        if high {
            self.led.set_high().ok();
        } else {
            self.led.set_low().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLed, VirtualClock};
    use embassy_futures::block_on;

    #[test]
    fn test_patterns_per_state() {
        assert_eq!(
            BlinkPattern::for_state(SystemState::WaitingConnect),
            BlinkPattern { on_ms: 250, off_ms: 250 }
        );
        assert!(BlinkPattern::for_state(SystemState::Connected).is_solid());
        assert_eq!(BlinkPattern::for_state(SystemState::Connected).on_ms, 100);
        assert_eq!(
            BlinkPattern::for_state(SystemState::AutoPaging),
            BlinkPattern { on_ms: 1000, off_ms: 1000 }
        );
    }

    #[test]
    fn test_waiting_blinks_at_2hz() {
        let clock = VirtualClock::new();
        let led = FakeLed::new(&clock);
        let mode = Arc::new(ModeCell::new());
        let mut driver =
            IndicatorDriver::new(mode, led.handle(), LedPolarity::ActiveHigh, clock.delay());

        block_on(driver.run_period());
        block_on(driver.run_period());

        assert_eq!(
            led.writes(),
            vec![(0, false), (0, true), (250, false), (500, true), (750, false)]
        );
        assert_eq!(clock.now_ms(), 1000);
    }

    #[test]
    fn test_connected_is_solid_on() {
        let clock = VirtualClock::new();
        let led = FakeLed::new(&clock);
        let mode = Arc::new(ModeCell::new());
        mode.force(SystemState::Connected);
        let mut driver =
            IndicatorDriver::new(mode, led.handle(), LedPolarity::ActiveHigh, clock.delay());

        for _ in 0..5 {
            block_on(driver.run_period());
        }

        assert!(led.writes()[1..].iter().all(|&(_, high)| high));
        assert_eq!(driver.delay.waits_ms(), vec![100; 5]);
    }

    #[test]
    fn test_active_low_inverts_levels() {
        let clock = VirtualClock::new();
        let led = FakeLed::new(&clock);
        let mode = Arc::new(ModeCell::new());
        mode.force(SystemState::Connected);
        let mut driver =
            IndicatorDriver::new(mode, led.handle(), LedPolarity::ActiveLow, clock.delay());

        // Off at construction drives the pin high
        assert_eq!(led.is_high(), Some(true));
        block_on(driver.run_period());
        assert_eq!(led.is_high(), Some(false));
    }

    #[test]
    fn test_mode_change_applies_at_next_period() {
        let clock = VirtualClock::new();
        let led = FakeLed::new(&clock);
        let mode = Arc::new(ModeCell::new());
        mode.force(SystemState::AutoPaging);
        let writer = mode.clone();
        clock.schedule(300, move || {
            writer.force(SystemState::Connected);
        });
        let mut driver =
            IndicatorDriver::new(mode, led.handle(), LedPolarity::ActiveHigh, clock.delay());

        // The paging period already in progress runs to completion
        assert_eq!(block_on(driver.run_period()), SystemState::AutoPaging);
        assert_eq!(clock.now_ms(), 2000);
        assert_eq!(block_on(driver.run_period()), SystemState::Connected);
    }
}
