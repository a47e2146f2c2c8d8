//! Wireless join state machine.
//!
//! `Idle -> Joining -> Joined -> Failed -> (after cooldown) Idle`, retried
//! forever on a fixed interval. State only changes inside [`JoinContext::poll`];
//! radio events only touch the [`LinkStatus`] bits.

use std::fmt;

use crate::hal::{
    send_all, BusFunction, CountryRecord, IoctlCode, RadioCommand, RadioTransport, SsidRecord,
    WaitPolicy, BACKPLANE_SLEEP_CSR_REG, BUS_INTERRUPT_REG,
};
use crate::link::{EventKind, LinkStatus, RadioEvent};
use crate::security::{AuthMode, SecurityNegotiator};

/// Time allowed for one join attempt.
pub const JOIN_TRY_MS: u64 = 10_000;
/// Cooldown between a failure and the next attempt.
pub const JOIN_RETRY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinState {
    #[default]
    Idle,
    Joining,
    Joined,
    Failed,
}

impl fmt::Display for JoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JoinState::Idle => "idle",
            JoinState::Joining => "joining",
            JoinState::Joined => "joined",
            JoinState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State of the association with one configured network.
#[derive(Debug)]
pub struct JoinContext {
    state: JoinState,
    ssid: String,
    passphrase: String,
    auth_mode: AuthMode,
    link: LinkStatus,
    timer_ms: u64,
    last_good_ms: Option<u64>,
    negotiator: SecurityNegotiator,
}

impl JoinContext {
    pub fn new(ssid: impl Into<String>, passphrase: impl Into<String>, auth_mode: AuthMode) -> Self {
        Self {
            state: JoinState::Idle,
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            auth_mode,
            link: LinkStatus::EMPTY,
            timer_ms: 0,
            last_good_ms: None,
            negotiator: SecurityNegotiator::new(),
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    /// Timestamp of the last poll that found the link joined.
    pub fn last_good_ms(&self) -> Option<u64> {
        self.last_good_ms
    }

    /// One-time radio bring-up before the first join attempt.
    pub fn start<R: RadioTransport + ?Sized>(&mut self, radio: &mut R) -> bool {
        Self::stop(radio);

        let val = radio.read_register(BusFunction::Bus, BUS_INTERRUPT_REG, 2);
        if val & 1 != 0 {
            radio.write_register(BusFunction::Bus, BUS_INTERRUPT_REG, val, 2);
        }
        radio.write_register(BusFunction::Backplane, BACKPLANE_SLEEP_CSR_REG, 1, 1);
        radio.write_register(BusFunction::Backplane, BACKPLANE_SLEEP_CSR_REG, 1, 1);
        let kso = radio.read_register(BusFunction::Backplane, BACKPLANE_SLEEP_CSR_REG, 1);
        tracing::trace!("Sleep CSR {:#04x}", kso);

        let std = WaitPolicy::Standard;
        let mut ok = send_all(radio, &[(set_var("bus:txglom", 0), std)]);
        if radio.send_ioctl(&set_var("apsta", 1), std).is_err() {
            tracing::debug!("IOCTL: APSTA not supported");
        }
        ok = ok
            && send_all(
                radio,
                &[
                    (set_var("ampdu_ba_wsize", 8), std),
                    (set_var("ampdu_mpdu", 4), std),
                ],
            );
        // Not every firmware knows this one
        let _ = radio.send_ioctl(&set_var("ampdu_rx_factor", 0), std);
        ok = ok
            && send_all(
                radio,
                &[
                    (RadioCommand::SetCountry(CountryRecord::WORLDWIDE), std),
                    (
                        RadioCommand::Write {
                            code: IoctlCode::SetGmode,
                            value: 1,
                        },
                        std,
                    ),
                ],
            );
        radio.enable_events(&EventKind::JOIN_EVENTS);
        if !ok {
            tracing::error!("Can't start network join");
        }
        ok
    }

    /// Leave the network and take the interface down; responses are ignored.
    pub fn stop<R: RadioTransport + ?Sized>(radio: &mut R) {
        let _ = radio.send_ioctl(&RadioCommand::disassociate(), WaitPolicy::Millis(50));
        let _ = radio.send_ioctl(&RadioCommand::down(), WaitPolicy::Millis(50));
    }

    /// Bring the interface up and ask it to associate.
    fn restart<R: RadioTransport + ?Sized>(&mut self, radio: &mut R) -> bool {
        let _ = radio.send_ioctl(&RadioCommand::up(), WaitPolicy::Millis(500));

        let mut buf = [0u8; 100];
        if let Ok(n) = radio.get_ioctl("ver", &mut buf) {
            let ver = &buf[..n.min(buf.len())];
            let end = ver.iter().position(|&b| b == 0).unwrap_or(ver.len());
            tracing::info!("WiFi {}", String::from_utf8_lossy(&ver[..end]).trim_end());
        }

        let std = WaitPolicy::Standard;
        let power = send_all(
            radio,
            &[
                (set_var("pm2_sleep_ret", 0xc8), std),
                (set_var("bcn_li_bcn", 1), std),
                (set_var("bcn_li_dtim", 1), std),
                (set_var("assoc_listen", 0x0a), std),
            ],
        );
        if !power {
            tracing::debug!("Power save settings not applied");
        }

        let ok = self
            .negotiator
            .negotiate(radio, self.auth_mode, &self.passphrase)
            && send_all(radio, &[(RadioCommand::SetSsid(SsidRecord::new(&self.ssid)), std)]);
        if !ok {
            tracing::warn!("Join request for '{}' not sent", self.ssid);
        }
        ok
    }

    /// Advance the state machine. `now_ms` is a monotonic millisecond clock.
    pub fn poll<R: RadioTransport + ?Sized>(&mut self, now_ms: u64, radio: &mut R) -> JoinState {
        match self.state {
            JoinState::Idle => {
                tracing::info!("Joining network {}", self.ssid);
                self.link = LinkStatus::EMPTY;
                if self.auth_mode.implicitly_authenticated() {
                    self.link.insert(LinkStatus::AUTHENTICATED);
                }
                self.state = JoinState::Joining;
                self.timer_ms = now_ms;
                self.restart(radio);
            }
            JoinState::Joining => {
                if self.link.is_joined() {
                    tracing::info!("Joined network");
                    self.last_good_ms = Some(now_ms);
                    self.state = JoinState::Joined;
                } else if self.link.is_failed() || self.elapsed(now_ms) >= JOIN_TRY_MS {
                    tracing::warn!("Failed to join network");
                    self.timer_ms = now_ms;
                    Self::stop(radio);
                    self.state = JoinState::Failed;
                }
            }
            JoinState::Joined => {
                self.timer_ms = now_ms;
                if self.link.is_joined() {
                    self.last_good_ms = Some(now_ms);
                } else {
                    tracing::info!("Leaving network");
                    Self::stop(radio);
                    self.state = JoinState::Failed;
                }
            }
            JoinState::Failed => {
                if self.elapsed(now_ms) >= JOIN_RETRY_MS {
                    self.timer_ms = now_ms;
                    self.state = JoinState::Idle;
                }
            }
        }
        self.state
    }

    /// Fold a radio event into the link bits. Returns false for event kinds
    /// this machine does not consume.
    pub fn handle_event(&mut self, event: &RadioEvent) -> bool {
        let mut link = self.link;
        if self.auth_mode.implicitly_authenticated() {
            link.insert(LinkStatus::AUTHENTICATED);
        }
        let consumed = match event.kind {
            EventKind::Link => {
                if event.status == 0 {
                    link.set(LinkStatus::UP, event.flags & 1 != 0);
                }
                true
            }
            EventKind::PskSup => {
                link.set(
                    LinkStatus::AUTHENTICATED,
                    event.status == RadioEvent::PSK_SUP_KEYED,
                );
                true
            }
            EventKind::DisassocInd => {
                link = LinkStatus::FAILED;
                true
            }
            EventKind::SetSsid => {
                match event.status {
                    RadioEvent::SET_SSID_FAILED => {
                        tracing::warn!("Can't join network, check security settings")
                    }
                    RadioEvent::SET_SSID_NO_NETWORKS => tracing::warn!("Can't find network"),
                    _ => {}
                }
                true
            }
            _ => false,
        };
        if link != self.link {
            tracing::debug!("Link {} -> {}", self.link, link);
        }
        self.link = link;
        consumed
    }

    /// Replace the target network. Any association in progress is torn down
    /// and the next poll starts a fresh attempt.
    pub fn set_credentials<R: RadioTransport + ?Sized>(
        &mut self,
        radio: &mut R,
        ssid: impl Into<String>,
        passphrase: impl Into<String>,
        auth_mode: AuthMode,
    ) {
        self.ssid = ssid.into();
        self.passphrase = passphrase.into();
        self.auth_mode = auth_mode;
        if self.state != JoinState::Idle {
            Self::stop(radio);
        }
        self.link = LinkStatus::EMPTY;
        self.state = JoinState::Idle;
    }

    fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timer_ms)
    }
}

fn set_var(name: &'static str, value: u32) -> RadioCommand {
    RadioCommand::SetVar { name, value }
}
