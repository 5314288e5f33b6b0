//! Test doubles for the hardware capabilities.
//!
//! All of them run against a [`VirtualClock`]: [`FakeDelay`] advances it
//! instantly instead of sleeping, and scheduled hooks fire at their virtual
//! time in the middle of a wait (a disconnect during a pager wait, a button
//! release during debounce, and so on).

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital::{ErrorType, OutputPin};
use embedded_hal_async::delay::DelayNs;

use crate::hid::{HidResult, HidTransport, KeyCode};
use crate::mode_controller::ButtonInput;

const NS_PER_MS: u64 = 1_000_000;

type Hook = Box<dyn FnOnce() + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared virtual time, in nanoseconds since creation.
#[derive(Default)]
pub struct VirtualClock {
    now_ns: Mutex<u64>,
    hooks: Mutex<Vec<(u64, Hook)>>,
}

impl VirtualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn now_ms(&self) -> u64 {
        *lock(&self.now_ns) / NS_PER_MS
    }

    /// Run `hook` once virtual time reaches `at_ms`.
    pub fn schedule<F>(&self, at_ms: u64, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        lock(&self.hooks).push((at_ms * NS_PER_MS, Box::new(hook)));
    }

    /// Move time forward, firing due hooks in time order.
    pub fn advance_ns(&self, ns: u64) {
        let target = *lock(&self.now_ns) + ns;
        loop {
            let due = {
                let mut hooks = lock(&self.hooks);
                let next = hooks
                    .iter()
                    .enumerate()
                    .filter(|(_, (at, _))| *at <= target)
                    .min_by_key(|(_, (at, _))| *at)
                    .map(|(index, _)| index);
                next.map(|index| hooks.remove(index))
            };
            match due {
                Some((at, hook)) => {
                    {
                        let mut now = lock(&self.now_ns);
                        *now = (*now).max(at);
                    }
                    hook();
                }
                None => break,
            }
        }
        *lock(&self.now_ns) = target;
    }

    pub fn delay(self: &Arc<Self>) -> FakeDelay {
        FakeDelay {
            clock: self.clone(),
            waits_ns: Vec::new(),
        }
    }
}

/// `DelayNs` that advances a [`VirtualClock`] and records every wait.
pub struct FakeDelay {
    clock: Arc<VirtualClock>,
    waits_ns: Vec<u64>,
}

impl FakeDelay {
    pub fn waits_ms(&self) -> Vec<u64> {
        self.waits_ns.iter().map(|ns| ns / NS_PER_MS).collect()
    }

    fn wait(&mut self, ns: u64) {
        self.waits_ns.push(ns);
        self.clock.advance_ns(ns);
    }
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.wait(u64::from(ns));
    }

    async fn delay_us(&mut self, us: u32) {
        self.wait(u64::from(us) * 1_000);
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.wait(u64::from(ms) * NS_PER_MS);
    }
}

/// Transport that records keystrokes and whose connectivity is set by the test.
pub struct FakeTransport {
    clock: Option<Arc<VirtualClock>>,
    connected: AtomicBool,
    begun: AtomicBool,
    sent: Mutex<Vec<(u64, KeyCode)>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    pub fn with_clock(clock: &Arc<VirtualClock>) -> Arc<Self> {
        Arc::new(Self::build(Some(clock.clone())))
    }

    fn build(clock: Option<Arc<VirtualClock>>) -> Self {
        Self {
            clock,
            connected: AtomicBool::new(false),
            begun: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_begun(&self) -> bool {
        self.begun.load(Ordering::SeqCst)
    }

    pub fn sent_keys(&self) -> Vec<KeyCode> {
        lock(&self.sent).iter().map(|(_, key)| *key).collect()
    }

    /// Virtual time (ms) of every keystroke.
    pub fn send_times_ms(&self) -> Vec<u64> {
        lock(&self.sent).iter().map(|(at, _)| *at).collect()
    }
}

impl HidTransport for FakeTransport {
    fn begin(&self) -> HidResult<()> {
        self.begun.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send_key(&self, key: KeyCode) {
        let at = self.clock.as_ref().map(|clock| clock.now_ms()).unwrap_or(0);
        lock(&self.sent).push((at, key));
    }
}

/// Button whose level follows scripted press intervals on the virtual clock.
pub struct FakeButton {
    clock: Arc<VirtualClock>,
    presses: Arc<Mutex<Vec<(u64, u64)>>>,
    rearms: Arc<AtomicUsize>,
}

impl FakeButton {
    pub fn new(clock: &Arc<VirtualClock>) -> Self {
        Self {
            clock: clock.clone(),
            presses: Arc::new(Mutex::new(Vec::new())),
            rearms: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Held down during `[from_ms, to_ms)`.
    pub fn press(&self, from_ms: u64, to_ms: u64) {
        lock(&self.presses).push((from_ms, to_ms));
    }

    /// Number of times edge detection was re-armed.
    pub fn rearm_count(&self) -> usize {
        self.rearms.load(Ordering::SeqCst)
    }

    /// A second handle onto the same script and counters.
    pub fn handle(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            presses: self.presses.clone(),
            rearms: self.rearms.clone(),
        }
    }
}

impl ButtonInput for FakeButton {
    fn is_pressed(&mut self) -> bool {
        let now = self.clock.now_ms();
        lock(&self.presses)
            .iter()
            .any(|&(from, to)| from <= now && now < to)
    }

    fn rearm(&mut self) -> anyhow::Result<()> {
        self.rearms.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Output pin that records `(virtual ms, is_high)` for every write.
pub struct FakeLed {
    clock: Arc<VirtualClock>,
    writes: Arc<Mutex<Vec<(u64, bool)>>>,
}

impl FakeLed {
    pub fn new(clock: &Arc<VirtualClock>) -> Self {
        Self {
            clock: clock.clone(),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn writes(&self) -> Vec<(u64, bool)> {
        lock(&self.writes).clone()
    }

    pub fn is_high(&self) -> Option<bool> {
        lock(&self.writes).last().map(|(_, high)| *high)
    }

    pub fn handle(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            writes: self.writes.clone(),
        }
    }

    fn record(&mut self, high: bool) {
        lock(&self.writes).push((self.clock.now_ms(), high));
    }
}

impl ErrorType for FakeLed {
    type Error = Infallible;
}

impl OutputPin for FakeLed {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.record(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.record(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hooks_fire_in_time_order_during_delay() {
        let clock = VirtualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for at in [300, 100, 200] {
            let order = order.clone();
            let observer = clock.clone();
            clock.schedule(at, move || lock(&order).push((at, observer.now_ms())));
        }

        let mut delay = clock.delay();
        embassy_futures::block_on(delay.delay_ms(250));

        assert_eq!(*lock(&order), vec![(100, 100), (200, 200)]);
        assert_eq!(clock.now_ms(), 250);
        assert_eq!(delay.waits_ms(), vec![250]);
    }

    #[test]
    fn test_button_follows_script() {
        let clock = VirtualClock::new();
        let mut button = FakeButton::new(&clock);
        button.press(10, 20);

        assert!(!button.is_pressed());
        clock.advance_ns(10 * NS_PER_MS);
        assert!(button.is_pressed());
        clock.advance_ns(10 * NS_PER_MS);
        assert!(!button.is_pressed());
    }
}
