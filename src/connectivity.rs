use std::sync::Arc;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::CONNECTIVITY_POLL_MS;
use crate::hid::HidTransport;
use crate::system_state::{ModeCell, SystemState};

/// A change in transport connectivity between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEdge {
    Connected,
    Disconnected,
}

/// Samples transport connectivity every cycle and synchronizes the mode on edges.
///
/// This is the only path back to `WaitingConnect`.
pub struct ConnectivityMonitor<T, D> {
    mode: Arc<ModeCell>,
    transport: T,
    delay: D,
    last_connected: bool,
}

impl<T, D> ConnectivityMonitor<T, D>
where
    T: HidTransport,
    D: DelayNs,
{
    /// The first sample is compared against "disconnected".
    pub fn new(mode: Arc<ModeCell>, transport: T, delay: D) -> Self {
        Self {
            mode,
            transport,
            delay,
            last_connected: false,
        }
    }

    pub async fn run(&mut self) -> ! {
        info!("📡 Connectivity monitor started");

        loop {
            self.poll();
            self.delay.delay_ms(CONNECTIVITY_POLL_MS).await;
        }
    }

    /// Take one sample and apply the edge, if any.
    pub fn poll(&mut self) -> Option<ConnectivityEdge> {
        let connected = self.transport.is_connected();
        if connected == self.last_connected {
            return None;
        }
        self.last_connected = connected;

        if connected {
            info!("✅ BLE Connected!");
            if self
                .mode
                .transition(SystemState::WaitingConnect, SystemState::Connected)
            {
                info!("🔄 Mode: {} -> {}", SystemState::WaitingConnect, SystemState::Connected);
            } else {
                warn!("⚠️ Connect edge while already in {}, ignored", self.mode.get());
            }
            Some(ConnectivityEdge::Connected)
        } else {
            info!("❌ BLE Disconnected!");
            let previous = self.mode.force(SystemState::WaitingConnect);
            if previous != SystemState::WaitingConnect {
                info!("🔄 Mode: {} -> {}", previous, SystemState::WaitingConnect);
            } else {
                debug!("Already waiting for connection");
            }
            Some(ConnectivityEdge::Disconnected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDelay, FakeTransport, VirtualClock};

    fn new_monitor(
        state: SystemState,
    ) -> (Arc<ModeCell>, Arc<FakeTransport>, ConnectivityMonitor<Arc<FakeTransport>, FakeDelay>) {
        let mode = Arc::new(ModeCell::new());
        mode.force(state);
        let transport = FakeTransport::new();
        let monitor =
            ConnectivityMonitor::new(mode.clone(), transport.clone(), VirtualClock::new().delay());
        (mode, transport, monitor)
    }

    #[test]
    fn test_no_edge_without_change() {
        let (mode, _transport, mut monitor) = new_monitor(SystemState::WaitingConnect);
        assert_eq!(monitor.poll(), None);
        assert_eq!(monitor.poll(), None);
        assert_eq!(mode.get(), SystemState::WaitingConnect);
    }

    #[test]
    fn test_connect_moves_ground_state_to_connected() {
        let (mode, transport, mut monitor) = new_monitor(SystemState::WaitingConnect);
        transport.set_connected(true);

        assert_eq!(monitor.poll(), Some(ConnectivityEdge::Connected));
        assert_eq!(mode.get(), SystemState::Connected);
        // Level, not edge: no further transitions
        assert_eq!(monitor.poll(), None);
        assert!(transport.sent_keys().is_empty());
    }

    #[test]
    fn test_connect_only_from_ground_state() {
        for state in [SystemState::Connected, SystemState::AutoPaging] {
            let (mode, transport, mut monitor) = new_monitor(state);
            transport.set_connected(true);

            assert_eq!(monitor.poll(), Some(ConnectivityEdge::Connected));
            assert_eq!(mode.get(), state);
        }
    }

    #[test]
    fn test_disconnect_always_resets_to_waiting() {
        for state in [
            SystemState::WaitingConnect,
            SystemState::Connected,
            SystemState::AutoPaging,
        ] {
            let (mode, transport, mut monitor) = new_monitor(SystemState::WaitingConnect);
            transport.set_connected(true);
            monitor.poll();
            mode.force(state);

            transport.set_connected(false);
            assert_eq!(monitor.poll(), Some(ConnectivityEdge::Disconnected));
            assert_eq!(mode.get(), SystemState::WaitingConnect);
        }
    }

    #[test]
    fn test_reconnect_after_drop() {
        let (mode, transport, mut monitor) = new_monitor(SystemState::WaitingConnect);
        transport.set_connected(true);
        monitor.poll();
        mode.force(SystemState::AutoPaging);
        transport.set_connected(false);
        monitor.poll();
        transport.set_connected(true);

        assert_eq!(monitor.poll(), Some(ConnectivityEdge::Connected));
        assert_eq!(mode.get(), SystemState::Connected);
    }
}
