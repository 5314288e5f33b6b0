// System State Module
// The single authoritative operating mode shared by every task, plus the
// interrupt-to-task button edge flag

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embedded_hal_async::delay::DelayNs;

use crate::config::BUTTON_POLL_MS;

/// Operating mode of the pager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    WaitingConnect, // No host connected, advertising
    Connected,      // Host connected, paging paused
    AutoPaging,     // Host connected, pager active
}

impl SystemState {
    const fn to_bits(self) -> u32 {
        match self {
            SystemState::WaitingConnect => 0,
            SystemState::Connected => 1,
            SystemState::AutoPaging => 2,
        }
    }

    // Only values written by `to_bits` ever reach the cell; anything else
    // decodes to the ground state.
    const fn from_bits(bits: u32) -> Self {
        match bits & STATE_MASK {
            1 => SystemState::Connected,
            2 => SystemState::AutoPaging,
            _ => SystemState::WaitingConnect,
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemState::WaitingConnect => write!(f, "waiting-connect"),
            SystemState::Connected => write!(f, "connected"),
            SystemState::AutoPaging => write!(f, "auto-paging"),
        }
    }
}

const STATE_MASK: u32 = 0xFF;
const EPOCH_SHIFT: u32 = 8;

/// A consistent view of the cell: the mode and the number of effective
/// transitions that led to it (wrapping, 24 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub state: SystemState,
    pub epoch: u32,
}

impl ModeSnapshot {
    const fn decode(word: u32) -> Self {
        Self {
            state: SystemState::from_bits(word),
            epoch: word >> EPOCH_SHIFT,
        }
    }
}

/// Shared mode cell.
///
/// State and transition epoch are packed into one 32-bit word, so every read
/// is a single load and no reader can observe a torn value. Writers go
/// through compare-and-swap; a write that does not change the state leaves
/// the epoch untouched.
pub struct ModeCell {
    word: AtomicU32,
}

impl ModeCell {
    /// New cell in `WaitingConnect`, epoch 0.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(SystemState::WaitingConnect.to_bits()),
        }
    }

    pub fn get(&self) -> SystemState {
        self.snapshot().state
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        ModeSnapshot::decode(self.word.load(Ordering::Acquire))
    }

    /// Unconditionally store `next`. Returns the previous state.
    pub fn force(&self, next: SystemState) -> SystemState {
        self.update(|_| Some(next))
    }

    /// Store `next` only if the current state is `expected`.
    /// Returns true when the transition was applied.
    pub fn transition(&self, expected: SystemState, next: SystemState) -> bool {
        let mut applied = false;
        self.update(|current| {
            applied = current == expected;
            applied.then_some(next)
        });
        applied
    }

    /// Atomically apply `f` to the current state. `None` leaves the cell
    /// unchanged. Returns the state observed before the update.
    fn update<F>(&self, mut f: F) -> SystemState
    where
        F: FnMut(SystemState) -> Option<SystemState>,
    {
        let mut word = self.word.load(Ordering::Acquire);
        loop {
            let current = ModeSnapshot::decode(word);
            let next = match f(current.state) {
                Some(next) if next != current.state => next,
                _ => return current.state,
            };
            let epoch = current.epoch.wrapping_add(1) << EPOCH_SHIFT;
            match self.word.compare_exchange_weak(
                word,
                epoch | next.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current.state,
                Err(actual) => word = actual,
            }
        }
    }
}

impl Default for ModeCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("ModeCell")
            .field("state", &snapshot.state)
            .field("epoch", &snapshot.epoch)
            .finish()
    }
}

/// One-slot button edge flag.
///
/// Raised from the GPIO interrupt with a single lock-free store and consumed
/// by the button task. Edges raised before the task consumes the flag
/// collapse into one.
pub struct ButtonEdge {
    pending: AtomicBool,
}

impl ButtonEdge {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
        }
    }

    /// Raise the flag. Safe to call from interrupt context.
    pub fn raise(&self) {
        self.pending.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether an edge was pending.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Wait for an edge, polling every `BUTTON_POLL_MS`, and clear the flag.
    pub async fn consume<D: DelayNs>(&self, delay: &mut D) {
        while !self.take() {
            delay.delay_ms(BUTTON_POLL_MS).await;
        }
    }
}

impl Default for ButtonEdge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::VirtualClock;
    use std::sync::Arc;

    const ALL: [SystemState; 3] = [
        SystemState::WaitingConnect,
        SystemState::Connected,
        SystemState::AutoPaging,
    ];

    #[test]
    fn test_starts_waiting_for_connection() {
        let cell = ModeCell::new();
        assert_eq!(cell.get(), SystemState::WaitingConnect);
        assert_eq!(cell.snapshot().epoch, 0);
    }

    #[test]
    fn test_state_bits_roundtrip() {
        for state in ALL {
            assert_eq!(SystemState::from_bits(state.to_bits()), state);
        }
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = ModeCell::new();
        assert!(!cell.transition(SystemState::Connected, SystemState::AutoPaging));
        assert_eq!(cell.get(), SystemState::WaitingConnect);

        assert!(cell.transition(SystemState::WaitingConnect, SystemState::Connected));
        assert_eq!(cell.get(), SystemState::Connected);
    }

    #[test]
    fn test_force_returns_previous_state() {
        let cell = ModeCell::new();
        cell.force(SystemState::AutoPaging);
        assert_eq!(cell.force(SystemState::WaitingConnect), SystemState::AutoPaging);
        assert_eq!(cell.get(), SystemState::WaitingConnect);
    }

    #[test]
    fn test_epoch_counts_effective_changes_only() {
        let cell = ModeCell::new();
        cell.force(SystemState::WaitingConnect);
        assert_eq!(cell.snapshot().epoch, 0);

        cell.force(SystemState::Connected);
        cell.force(SystemState::AutoPaging);
        cell.force(SystemState::AutoPaging);
        assert_eq!(cell.snapshot().epoch, 2);

        // Leave and re-enter: same state, different epoch
        let before = cell.snapshot();
        cell.force(SystemState::Connected);
        cell.force(SystemState::AutoPaging);
        let after = cell.snapshot();
        assert_eq!(before.state, after.state);
        assert_ne!(before.epoch, after.epoch);
    }

    #[test]
    fn test_concurrent_writers_never_tear() {
        use std::thread;

        let cell = Arc::new(ModeCell::new());
        let writers: Vec<_> = ALL
            .iter()
            .map(|&state| {
                let cell = cell.clone();
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        cell.force(state);
                    }
                })
            })
            .collect();

        for _ in 0..10_000 {
            assert!(ALL.contains(&cell.get()));
        }
        for writer in writers {
            writer.join().unwrap();
        }
    }

    #[test]
    fn test_button_edges_coalesce() {
        let edge = ButtonEdge::new();
        assert!(!edge.is_pending());

        edge.raise();
        edge.raise();
        edge.raise();
        assert!(edge.take());
        assert!(!edge.take());
    }

    #[test]
    fn test_consume_waits_for_raise() {
        let clock = VirtualClock::new();
        let edge = Arc::new(ButtonEdge::new());
        let isr = edge.clone();
        clock.schedule(35, move || isr.raise());

        let mut delay = clock.delay();
        embassy_futures::block_on(edge.consume(&mut delay));

        assert!(!edge.is_pending());
        assert_eq!(clock.now_ms(), 40);
        assert_eq!(delay.waits_ms(), vec![10, 10, 10, 10]);
    }
}
