//! Audible new-work alarm.
//!
//! The alarm never touches audio hardware. It issues start/stop intents to an
//! injected [`AudioPlayback`] boundary, one instance per display session.

use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::AlarmState;

// ---------------------------------------------------------------------------
// Playback boundary
// ---------------------------------------------------------------------------

/// Platform audio playback used by the alarm.
pub trait AudioPlayback: Send + Sync {
    /// Ask the platform for permission to play sound. Returns `true` once
    /// playback is allowed.
    fn authorize(&self) -> bool;

    /// Start looping the alert sound.
    fn start(&self);

    /// Stop the alert sound and rewind.
    fn stop(&self);
}

// ---------------------------------------------------------------------------
// Alarm state machine
// ---------------------------------------------------------------------------

pub struct AlarmMachine {
    state: AlarmState,
    authorized: bool,
    playback: Arc<dyn AudioPlayback>,
}

impl AlarmMachine {
    pub fn new(playback: Arc<dyn AudioPlayback>) -> Self {
        Self {
            state: AlarmState::Silent,
            authorized: false,
            playback,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// One-time platform authorization. Sticky once granted; a refusal can be
    /// retried. Never rings retroactively.
    pub fn authorize(&mut self) -> bool {
        if self.authorized {
            return true;
        }
        if self.playback.authorize() {
            self.authorized = true;
            info!("Audio playback authorized");
        } else {
            warn!("Audio playback was refused by the platform; allow sound playback to enable alerts");
        }
        self.authorized
    }

    /// A new entity was inserted. Returns `true` if the state changed.
    pub fn on_insert(&mut self) -> bool {
        if !self.authorized {
            debug!("New item arrived but audio is not authorized; staying silent");
            return false;
        }
        if self.state == AlarmState::Ringing {
            return false;
        }
        self.playback.start();
        self.state = AlarmState::Ringing;
        true
    }

    /// Operator "stop alarm". Allowed at any time regardless of queue contents.
    pub fn acknowledge(&mut self) -> bool {
        if self.state == AlarmState::Silent {
            return false;
        }
        self.playback.stop();
        self.state = AlarmState::Silent;
        true
    }

    /// Re-evaluate after a successful completion. Only an empty queue
    /// silences the alarm automatically.
    pub fn on_completion(&mut self, queue_empty: bool) -> bool {
        if !queue_empty || self.state == AlarmState::Silent {
            return false;
        }
        self.playback.stop();
        self.state = AlarmState::Silent;
        true
    }

    /// Stop any audio intent on teardown.
    pub fn shutdown(&mut self) {
        if self.state == AlarmState::Ringing {
            self.playback.stop();
            self.state = AlarmState::Silent;
        }
    }
}

// ---------------------------------------------------------------------------
// Terminal bell playback
// ---------------------------------------------------------------------------

/// Interval between BEL characters while ringing.
const BELL_INTERVAL: Duration = Duration::from_millis(1500);

/// Rings the terminal bell (BEL, 0x07) on stdout in a loop while started.
/// Authorization is granted only when stdout is an interactive terminal.
#[derive(Default)]
pub struct TerminalBell {
    ringing: Mutex<Option<CancellationToken>>,
}

impl TerminalBell {
    pub fn new() -> Self {
        Self::default()
    }

    fn ring_once() {
        let mut out = std::io::stdout();
        let _ = out.write_all(b"\x07");
        let _ = out.flush();
    }
}

impl AudioPlayback for TerminalBell {
    fn authorize(&self) -> bool {
        std::io::stdout().is_terminal()
    }

    fn start(&self) {
        let mut guard = self.ringing.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_some() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            Self::ring_once();
            return;
        };
        let token = CancellationToken::new();
        let child = token.clone();
        handle.spawn(async move {
            loop {
                Self::ring_once();
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(BELL_INTERVAL) => {}
                }
            }
        });
        *guard = Some(token);
    }

    fn stop(&self) {
        let mut guard = self.ringing.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = guard.take() {
            token.cancel();
        }
    }
}
