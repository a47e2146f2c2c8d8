//! The instrument: every component behind one cooperative poll tick.
//!
//! Within a tick the order is fixed: the pending radio event is consumed,
//! then the join state machine advances, then capture progress is checked,
//! then the link LED is driven. Transfer reads happen between ticks and so
//! always observe the state the last tick left behind.

use crate::capture::{CaptureEngine, CaptureState, XSAMP_MAX};
use crate::config::InstrumentSettings;
use crate::error::StreamError;
use crate::hal::{CaptureHardware, RadioTransport};
use crate::join::{JoinContext, JoinState};
use crate::link::{EventSlot, RadioEvent};
use crate::params::{Command, ParamTable};
use crate::security::AuthMode;
use crate::stream::{Encoding, FileStat, SlotId, TransferPool};

/// LED toggle interval while joined.
pub const LINK_UP_BLINK_MS: u64 = 500;
/// LED toggle interval while not joined.
pub const LINK_DOWN_BLINK_MS: u64 = 100;

/// Coarse link state for the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Down,
    Trying,
    Up,
}

/// What [`Instrument::apply_command`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A capture of this many samples was armed.
    Started { samples: usize },
    /// The capture was aborted.
    Stopped,
    /// A start was refused because a capture or a transfer is in progress.
    Refused,
    /// Not a known command code.
    Ignored,
}

pub struct Instrument<R, H> {
    radio: R,
    hw: H,
    join: JoinContext,
    capture: CaptureEngine,
    pool: TransferPool,
    params: ParamTable,
    inbox: EventSlot,
    led_on: bool,
    led_ms: u64,
}

impl<R: RadioTransport, H: CaptureHardware> Instrument<R, H> {
    pub fn new(radio: R, hw: H, settings: &InstrumentSettings) -> Self {
        let auth_mode = settings.network.auth_mode().unwrap_or_else(|e| {
            tracing::warn!("{}, using {}", e, AuthMode::default());
            AuthMode::default()
        });
        let params = ParamTable::from_settings(settings);
        match params.static_address() {
            Some(addr) => tracing::info!(
                "Using static IP {}, gateway {}",
                std::net::Ipv4Addr::from(addr),
                std::net::Ipv4Addr::from(params.gateway)
            ),
            None => tracing::info!("Using dynamic IP (DHCP)"),
        }
        Self {
            radio,
            hw,
            join: JoinContext::new(&settings.network.ssid, &settings.network.passwd, auth_mode),
            capture: CaptureEngine::new(),
            pool: TransferPool::new(),
            params,
            inbox: EventSlot::new(),
            led_on: false,
            led_ms: 0,
        }
    }

    /// One-time radio bring-up.
    pub fn start(&mut self) -> bool {
        self.join.start(&mut self.radio)
    }

    /// Deposit an event from the notification path. Only the latest
    /// undelivered event is kept.
    pub fn post_event(&mut self, event: RadioEvent) {
        self.inbox.post(event);
    }

    /// Run one tick.
    pub fn poll(&mut self, now_ms: u64) {
        if let Some(event) = self.radio.poll_event() {
            self.inbox.post(event);
        }
        if let Some(event) = self.inbox.take() {
            if !self.join.handle_event(&event) {
                tracing::trace!("Event {:?} not consumed", event.kind);
            }
        }

        self.join.poll(now_ms, &mut self.radio);

        if self.capture.state() > CaptureState::Ready && !self.capture.poll_progress(&mut self.hw)
        {
            self.capture.stop(&mut self.hw);
            self.capture.set_state(CaptureState::Ready);
        }
        self.sync_status();

        let interval = if self.join.link().is_joined() {
            LINK_UP_BLINK_MS
        } else {
            LINK_DOWN_BLINK_MS
        };
        if now_ms.saturating_sub(self.led_ms) >= interval {
            self.led_ms = now_ms;
            self.led_on = !self.led_on;
            self.radio.set_led(self.led_on);
        }
    }

    /// Act on a command code received from a client.
    pub fn apply_command(&mut self, code: i64) -> CommandOutcome {
        tracing::info!("Command {}", code);
        self.params.cmd = code;
        let outcome = match Command::from_code(code) {
            Some(Command::Single | Command::Multi) => {
                if self.capture.state() == CaptureState::Capturing || self.pool.open_count() > 0 {
                    tracing::warn!(
                        "Capture start refused: state {}, {} transfers open",
                        self.capture.state(),
                        self.pool.open_count()
                    );
                    CommandOutcome::Refused
                } else {
                    let samples = self.params.sample_request().min(XSAMP_MAX);
                    self.capture.set_sequence(self.pool.capture_cursor());
                    self.capture
                        .start(samples, self.params.sample_rate(), &mut self.hw);
                    CommandOutcome::Started { samples }
                }
            }
            Some(Command::Stop) => {
                self.capture.set_state(CaptureState::Error);
                self.capture.stop(&mut self.hw);
                CommandOutcome::Stopped
            }
            None => CommandOutcome::Ignored,
        };
        if code == Command::Single.code() {
            self.params.cmd = Command::Stop.code();
        }
        self.sync_status();
        outcome
    }

    /// Reclaim idle transfer slots.
    pub fn sweep_idle(&mut self, now_ms: u64) -> usize {
        self.pool.reclaim_idle(now_ms)
    }

    pub fn link_state(&self) -> LinkState {
        match self.join.state() {
            JoinState::Idle | JoinState::Failed => LinkState::Down,
            JoinState::Joining => LinkState::Trying,
            JoinState::Joined => LinkState::Up,
        }
    }

    /// Indicator flag only; captures are not blocked while the network is down.
    pub fn network_down(&self) -> bool {
        self.link_state() != LinkState::Up
    }

    /// Switch to a different network; the next tick starts a fresh join.
    pub fn set_credentials(&mut self, ssid: &str, passphrase: &str, auth_mode: AuthMode) {
        tracing::info!("Network set to {} ({})", ssid, auth_mode);
        self.params.ssid = ssid.to_string();
        self.params.passwd = passphrase.to_string();
        self.params.security = auth_mode.name().to_string();
        self.join
            .set_credentials(&mut self.radio, ssid, passphrase, auth_mode);
    }

    fn sync_status(&mut self) {
        self.params.state = self.capture.state();
        self.params.nsamp = self.capture.sample_count() as i64;
    }

    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ParamTable {
        &mut self.params
    }

    pub fn join(&self) -> &JoinContext {
        &self.join
    }

    pub fn capture(&self) -> &CaptureEngine {
        &self.capture
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn stat(&mut self, encoding: Encoding, path: &str) -> FileStat {
        self.pool
            .stat(encoding, path, self.capture.sample_count())
    }

    pub fn open(
        &mut self,
        encoding: Encoding,
        path: &str,
        now_ms: u64,
    ) -> Result<SlotId, StreamError> {
        self.pool
            .open(encoding, path, self.capture.sample_count(), now_ms)
    }

    pub fn read(&mut self, id: SlotId, buf: &mut [u8], now_ms: u64) -> Result<usize, StreamError> {
        self.pool.read(id, self.capture.store(), buf, now_ms)
    }

    pub fn seek(&mut self, id: SlotId, offset: usize, now_ms: u64) -> Result<usize, StreamError> {
        self.pool.seek(id, self.capture.store(), offset, now_ms)
    }

    pub fn close(&mut self, id: SlotId, now_ms: u64) -> Result<(), StreamError> {
        self.pool.close(id, now_ms)
    }

    pub fn output_length(&self, id: SlotId) -> Result<usize, StreamError> {
        self.pool.output_length(id)
    }

    pub fn open_transfers(&self) -> usize {
        self.pool.open_count()
    }
}
