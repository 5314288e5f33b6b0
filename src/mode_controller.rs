// Mode Controller Module
// Button-driven mode transitions with debounce and hold-to-release suppression
// The GPIO interrupt only raises the edge flag; all processing happens here in task context

use std::sync::Arc;

use embedded_hal_async::delay::DelayNs;
use log::{debug, info, warn};

use crate::config::{BUTTON_DEBOUNCE_MS, BUTTON_POLL_MS};
use crate::hid::{HidTransport, KeyCode};
use crate::system_state::{ButtonEdge, ModeCell, SystemState};

/// Physical toggle button.
pub trait ButtonInput {
    /// Synchronous level read: true while the button is held down.
    fn is_pressed(&mut self) -> bool;

    /// Re-enable edge detection once the current press has been handled.
    fn rearm(&mut self) -> anyhow::Result<()>;
}

/// Result of applying the transition table to one confirmed press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// Press while waiting for a host; nothing changes.
    Ignored,
    /// Connected -> AutoPaging, with or without the immediate keystroke.
    EnteredPaging { immediate_page: bool },
    /// AutoPaging -> Connected.
    ExitedPaging,
}

/// Owns the button transition table.
pub struct ModeController<T> {
    mode: Arc<ModeCell>,
    transport: T,
}

impl<T: HidTransport> ModeController<T> {
    pub fn new(mode: Arc<ModeCell>, transport: T) -> Self {
        Self { mode, transport }
    }

    /// Apply the transition table to the current mode.
    ///
    /// The table is applied atomically against the cell: if a concurrent
    /// writer (the connectivity monitor) changes the mode between the read
    /// and the write, the press is re-evaluated against the new mode.
    pub fn on_confirmed_press(&self) -> PressOutcome {
        loop {
            match self.mode.get() {
                SystemState::WaitingConnect => {
                    info!("⏳ Waiting for connection, button ignored");
                    return PressOutcome::Ignored;
                }
                SystemState::Connected => {
                    if !self
                        .mode
                        .transition(SystemState::Connected, SystemState::AutoPaging)
                    {
                        continue;
                    }
                    info!("▶️ Entering auto paging mode");

                    let immediate_page = self.transport.is_connected();
                    if immediate_page {
                        info!("📄 Immediate page turn");
                        self.transport.send_key(KeyCode::PAGE_FORWARD);
                    }
                    return PressOutcome::EnteredPaging { immediate_page };
                }
                SystemState::AutoPaging => {
                    if !self
                        .mode
                        .transition(SystemState::AutoPaging, SystemState::Connected)
                    {
                        continue;
                    }
                    info!("⏸️ Exiting auto paging mode");
                    return PressOutcome::ExitedPaging;
                }
            }
        }
    }
}

/// Button task body: consumes edges, debounces, drives the [`ModeController`].
pub struct ButtonHandler<B, D, T> {
    edge: Arc<ButtonEdge>,
    button: B,
    delay: D,
    controller: ModeController<T>,
}

impl<B, D, T> ButtonHandler<B, D, T>
where
    B: ButtonInput,
    D: DelayNs,
    T: HidTransport,
{
    pub fn new(edge: Arc<ButtonEdge>, button: B, delay: D, controller: ModeController<T>) -> Self {
        Self {
            edge,
            button,
            delay,
            controller,
        }
    }

    /// Handle edges forever.
    pub async fn run(&mut self) -> ! {
        info!("🔘 Button handler started");

        loop {
            self.edge.consume(&mut self.delay).await;
            self.handle_edge().await;
        }
    }

    /// Process one consumed edge.
    ///
    /// Returns `None` when the edge was contact bounce. Either way, returns
    /// only after the button is released, with edge detection re-armed.
    pub async fn handle_edge(&mut self) -> Option<PressOutcome> {
        // Debounce: wait, then verify the button is still held
        self.delay.delay_ms(BUTTON_DEBOUNCE_MS).await;

        let outcome = if self.button.is_pressed() {
            info!("🔘 Button pressed");
            Some(self.controller.on_confirmed_press())
        } else {
            debug!("🔘 Button press was too short (bounce)");
            None
        };

        // One press, one transition: hold until released
        while self.button.is_pressed() {
            self.delay.delay_ms(BUTTON_POLL_MS).await;
        }

        // Edges raised by the press itself or its release bounce are stale
        self.edge.take();
        if let Err(e) = self.button.rearm() {
            warn!("⚠️ Failed to re-arm button interrupt: {}", e);
        }

        outcome
    }
}
