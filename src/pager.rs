// Pager Module
// While auto paging and connected: wait a randomized interval, then emit one keystroke
// The wait is never cancelled; a mode change during it suppresses the keystroke instead

use std::sync::Arc;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info};
use rand::Rng;

use crate::config::{PAGER_IDLE_POLL_MS, PAGER_MAX_DELAY_MS, PAGER_MIN_DELAY_MS};
use crate::hid::{HidTransport, KeyCode};
use crate::system_state::{ModeCell, SystemState};

/// What one pager cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagerCycle {
    /// Not paging (or no host): slept one idle poll, no random draw.
    Idle,
    /// Waited `delay_ms` and sent one keystroke.
    Sent { delay_ms: u32 },
    /// Waited `delay_ms`, but the mode or the link changed meanwhile.
    Suppressed { delay_ms: u32 },
}

/// Uniform draw from `[PAGER_MIN_DELAY_MS, PAGER_MAX_DELAY_MS)`.
pub fn draw_delay_ms<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(PAGER_MIN_DELAY_MS..PAGER_MAX_DELAY_MS)
}

pub struct Pager<T, D, R> {
    mode: Arc<ModeCell>,
    transport: T,
    delay: D,
    rng: R,
}

impl<T, D, R> Pager<T, D, R>
where
    T: HidTransport,
    D: DelayNs,
    R: Rng,
{
    pub fn new(mode: Arc<ModeCell>, transport: T, delay: D, rng: R) -> Self {
        Self {
            mode,
            transport,
            delay,
            rng,
        }
    }

    pub async fn run(&mut self) -> ! {
        info!("📄 Pager task started");

        loop {
            self.run_cycle().await;
        }
    }

    pub async fn run_cycle(&mut self) -> PagerCycle {
        let armed = self.mode.snapshot();
        if armed.state != SystemState::AutoPaging || !self.transport.is_connected() {
            self.delay.delay_ms(PAGER_IDLE_POLL_MS).await;
            return PagerCycle::Idle;
        }

        let delay_ms = draw_delay_ms(&mut self.rng);
        info!("⏳ Next page in {} ms", delay_ms);
        self.delay.delay_ms(delay_ms).await;

        // Same epoch means no transition at all happened during the wait,
        // including a leave-and-return to AutoPaging.
        if self.mode.snapshot() == armed && self.transport.is_connected() {
            info!("➡️ Sending page forward");
            self.transport.send_key(KeyCode::PAGE_FORWARD);
            PagerCycle::Sent { delay_ms }
        } else {
            debug!("🚫 Mode changed during wait, page suppressed");
            PagerCycle::Suppressed { delay_ms }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDelay, FakeTransport, VirtualClock};
    use embassy_futures::block_on;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pager(
        clock: &Arc<VirtualClock>,
        state: SystemState,
        connected: bool,
    ) -> (Arc<ModeCell>, Arc<FakeTransport>, Pager<Arc<FakeTransport>, FakeDelay, StdRng>) {
        let mode = Arc::new(ModeCell::new());
        mode.force(state);
        let transport = FakeTransport::with_clock(clock);
        transport.set_connected(connected);
        let pager = Pager::new(
            mode.clone(),
            transport.clone(),
            clock.delay(),
            StdRng::seed_from_u64(7),
        );
        (mode, transport, pager)
    }

    #[test]
    fn test_delay_draws_stay_in_window() {
        let mut rng = StdRng::seed_from_u64(0xA5A5);
        for _ in 0..10_000 {
            let delay = draw_delay_ms(&mut rng);
            assert!((PAGER_MIN_DELAY_MS..PAGER_MAX_DELAY_MS).contains(&delay));
        }
    }

    #[test]
    fn test_idle_when_not_paging() {
        let clock = VirtualClock::new();
        for (state, connected) in [
            (SystemState::WaitingConnect, false),
            (SystemState::Connected, true),
            (SystemState::AutoPaging, false),
        ] {
            let (_mode, transport, mut pager) = pager(&clock, state, connected);
            assert_eq!(block_on(pager.run_cycle()), PagerCycle::Idle);
            assert_eq!(pager.delay.waits_ms(), vec![u64::from(PAGER_IDLE_POLL_MS)]);
            assert!(transport.sent_keys().is_empty());
        }
    }

    #[test]
    fn test_idle_cycle_does_not_consume_random_draw() {
        let clock = VirtualClock::new();
        let (mode, _transport, mut pager) = pager(&clock, SystemState::Connected, true);
        let mut expected = StdRng::seed_from_u64(7);

        block_on(pager.run_cycle());
        mode.force(SystemState::AutoPaging);

        let delay_ms = draw_delay_ms(&mut expected);
        assert_eq!(block_on(pager.run_cycle()), PagerCycle::Sent { delay_ms });
    }

    #[test]
    fn test_sends_one_page_after_randomized_wait() {
        let clock = VirtualClock::new();
        let (_mode, transport, mut pager) = pager(&clock, SystemState::AutoPaging, true);

        let cycle = block_on(pager.run_cycle());
        let PagerCycle::Sent { delay_ms } = cycle else {
            panic!("expected a page, got {:?}", cycle);
        };
        assert!((PAGER_MIN_DELAY_MS..PAGER_MAX_DELAY_MS).contains(&delay_ms));
        assert_eq!(transport.sent_keys(), vec![KeyCode::PAGE_FORWARD]);
        assert_eq!(transport.send_times_ms(), vec![u64::from(delay_ms)]);
    }

    #[test]
    fn test_mode_exit_during_wait_suppresses_page() {
        let clock = VirtualClock::new();
        let (mode, transport, mut pager) = pager(&clock, SystemState::AutoPaging, true);
        let writer = mode.clone();
        clock.schedule(10_000, move || {
            writer.force(SystemState::Connected);
        });

        assert!(matches!(block_on(pager.run_cycle()), PagerCycle::Suppressed { .. }));
        assert!(transport.sent_keys().is_empty());
    }

    #[test]
    fn test_leave_and_reenter_during_wait_suppresses_page() {
        let clock = VirtualClock::new();
        let (mode, transport, mut pager) = pager(&clock, SystemState::AutoPaging, true);
        let writer = mode.clone();
        clock.schedule(10_000, move || {
            writer.force(SystemState::Connected);
            writer.force(SystemState::AutoPaging);
        });

        assert!(matches!(block_on(pager.run_cycle()), PagerCycle::Suppressed { .. }));
        assert!(transport.sent_keys().is_empty());

        // The next cycle starts a fresh full-length wait from re-entry
        let cycle = block_on(pager.run_cycle());
        assert!(matches!(cycle, PagerCycle::Sent { .. }));
        let gap = transport.send_times_ms()[0] - 10_000;
        assert!(gap >= u64::from(PAGER_MIN_DELAY_MS));
    }

    #[test]
    fn test_link_drop_during_wait_suppresses_page() {
        let clock = VirtualClock::new();
        let (_mode, transport, mut pager) = pager(&clock, SystemState::AutoPaging, true);
        let link = transport.clone();
        clock.schedule(5_000, move || link.set_connected(false));

        assert!(matches!(block_on(pager.run_cycle()), PagerCycle::Suppressed { .. }));
        assert!(transport.sent_keys().is_empty());
    }

    #[test]
    fn test_consecutive_pages_respect_interval_bounds() {
        let clock = VirtualClock::new();
        let (_mode, transport, mut pager) = pager(&clock, SystemState::AutoPaging, true);

        for _ in 0..20 {
            block_on(pager.run_cycle());
        }

        let times = transport.send_times_ms();
        assert_eq!(times.len(), 20);
        let mut previous = 0;
        for at in times {
            let gap = at - previous;
            assert!((u64::from(PAGER_MIN_DELAY_MS)..u64::from(PAGER_MAX_DELAY_MS)).contains(&gap));
            previous = at;
        }
    }
}
