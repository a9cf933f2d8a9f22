//! Connection lifecycle.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──connected──▶ AwaitingSessionReply ──reply──▶ Ready
//!  ▲                    │                           │                          │
//!  │                    └────── error ──────────────┤                   error/reset
//!  │                                                ▼                          ▼
//!  └──────────────────── close ◀──────────────── (Idle) ◀── grace ── ResetPending
//! ```
//!
//! [`Connection`] only tracks the state and the session handle and emits
//! [`Action`]s; the engine decides when to move it.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::info;

use crate::error::ProtocolError;
use crate::header::register_session_request;
use crate::ledger::PacketKind;
use crate::response::parse_registration;

/// Delay between a reset and the transport teardown when no read is active.
pub const RESET_GRACE: Duration = Duration::from_millis(1500);

/// Delay before reconnecting after a failed registration or a teardown.
pub const RECONNECT_BACKOFF: Duration = Duration::from_millis(2000);

/// Poll interval for a read deferred behind another cycle.
pub const READ_RETRY_POLL: Duration = Duration::from_millis(100);

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No transport.
    Idle,
    /// Transport connect issued.
    Connecting,
    /// RegisterSession sent, waiting for the handle.
    AwaitingSessionReply,
    /// Session established; reads and writes are sent.
    Ready,
    /// Torn down once the active read completes or the grace delay passes.
    ResetPending,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingSessionReply => "awaiting session reply",
            ConnectionState::Ready => "ready",
            ConnectionState::ResetPending => "reset pending",
        };
        f.write_str(name)
    }
}

/// Timers armed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// RegisterSession reply deadline.
    Registration,
    /// Reply deadline of a sent packet.
    Packet {
        /// Cycle kind.
        kind: PacketKind,
        /// Packet index.
        index: usize,
        /// Sequence number it was sent with.
        sequence: u16,
    },
    /// Packet given up on because the session is down.
    Lost {
        /// Cycle kind.
        kind: PacketKind,
        /// Packet index.
        index: usize,
        /// Sequence number it was assigned.
        sequence: u16,
    },
    /// End of the reset grace delay.
    ResetGrace,
    /// Automatic reconnect.
    Reconnect,
    /// Retry of a deferred read.
    ReadRetry,
}

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport to the configured endpoint.
    Open,
    /// Write a frame.
    Send(Bytes),
    /// Close the transport.
    Close,
    /// Fire `on_timer(key)` after the delay, replacing an earlier timer with
    /// the same key.
    ArmTimer(TimerKey, Duration),
    /// Forget a timer.
    CancelTimer(TimerKey),
}

/// Session state and handle.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    session: u32,
    auto_reconnect: bool,
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Creates an idle connection and a receiver for its state.
    pub fn new() -> (Self, watch::Receiver<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        (
            Self {
                state: ConnectionState::Idle,
                session: 0,
                auto_reconnect: false,
                state_tx,
            },
            state_rx,
        )
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Session handle issued at registration.
    pub fn session(&self) -> u32 {
        self.session
    }

    /// Returns whether frames may be sent.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Whether the connection re-establishes itself after failures.
    pub fn auto_reconnect(&self) -> bool {
        self.auto_reconnect
    }

    /// Enables or disables automatic reconnection.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "connection state changed");
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    /// Idle → Connecting. Returns false in any other state.
    pub fn begin_connect(&mut self, out: &mut Vec<Action>) -> bool {
        if self.state != ConnectionState::Idle {
            return false;
        }
        self.transition(ConnectionState::Connecting);
        out.push(Action::CancelTimer(TimerKey::Reconnect));
        out.push(Action::Open);
        true
    }

    /// Connecting → AwaitingSessionReply, sending RegisterSession.
    pub fn on_connected(&mut self, timeout: Duration, out: &mut Vec<Action>) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.transition(ConnectionState::AwaitingSessionReply);
        out.push(Action::Send(Bytes::copy_from_slice(
            &register_session_request(),
        )));
        out.push(Action::ArmTimer(TimerKey::Registration, timeout));
        true
    }

    /// AwaitingSessionReply → Ready when the reply is valid.
    ///
    /// # Errors
    ///
    /// Returns the registration failure; the state is left unchanged.
    pub fn on_registration(
        &mut self,
        data: &[u8],
        out: &mut Vec<Action>,
    ) -> std::result::Result<u32, ProtocolError> {
        let session = parse_registration(data)?;
        self.session = session;
        out.push(Action::CancelTimer(TimerKey::Registration));
        self.transition(ConnectionState::Ready);
        Ok(session)
    }

    /// Ready → ResetPending. Returns false if not Ready.
    pub fn begin_reset(&mut self) -> bool {
        if self.state != ConnectionState::Ready {
            return false;
        }
        self.transition(ConnectionState::ResetPending);
        true
    }

    /// Any state → Idle, closing the transport.
    pub fn close(&mut self, out: &mut Vec<Action>) {
        out.push(Action::CancelTimer(TimerKey::Registration));
        out.push(Action::CancelTimer(TimerKey::ResetGrace));
        out.push(Action::Close);
        self.session = 0;
        self.transition(ConnectionState::Idle);
    }
}
