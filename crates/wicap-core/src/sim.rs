//! Simulated radio and capture peripherals for host builds.
//!
//! [`SimRadio`] acknowledges every command and answers a join request with
//! the notifications a real access point would produce. [`SimCapture`]
//! produces a test pattern at the programmed rate against wall-clock time.

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::TransportError;
use crate::hal::{BusFunction, CaptureHardware, IoctlCode, RadioCommand, RadioTransport, WaitPolicy};
use crate::link::{EventKind, RadioEvent};

const SIM_VERSION: &[u8] = b"wl0: simulated radio 1.0\0";

#[derive(Debug, Default)]
pub struct SimRadio {
    pending: VecDeque<RadioEvent>,
    enabled: Vec<EventKind>,
    /// Only this SSID can be joined; any SSID when `None`.
    visible: Option<String>,
    /// Fail the first command with this name.
    fail: Option<&'static str>,
    secured: bool,
    led: bool,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// A radio that only sees the network called `ssid`.
    pub fn with_visible_network(ssid: &str) -> Self {
        Self {
            visible: Some(ssid.to_string()),
            ..Self::default()
        }
    }

    /// Reject the next command named `name`.
    pub fn fail_command(&mut self, name: &'static str) {
        self.fail = Some(name);
    }

    pub fn led(&self) -> bool {
        self.led
    }

    fn join_reply(&mut self, ssid: &[u8]) {
        let reachable = self
            .visible
            .as_ref()
            .map_or(true, |visible| visible.as_bytes() == ssid);
        if !reachable {
            tracing::debug!("Sim: network {} not found", String::from_utf8_lossy(ssid));
            self.pending.push_back(RadioEvent::new(
                EventKind::SetSsid,
                RadioEvent::SET_SSID_NO_NETWORKS,
                0,
            ));
            return;
        }
        self.pending
            .push_back(RadioEvent::new(EventKind::SetSsid, 0, 0));
        self.pending.push_back(RadioEvent::link(true));
        if self.secured {
            self.pending
                .push_back(RadioEvent::psk_sup(RadioEvent::PSK_SUP_KEYED));
        }
    }
}

impl RadioTransport for SimRadio {
    fn read_register(&mut self, _function: BusFunction, _addr: u32, _width: u8) -> u32 {
        0
    }

    fn write_register(&mut self, _function: BusFunction, _addr: u32, _value: u32, _width: u8) {}

    fn send_ioctl(&mut self, command: &RadioCommand, _wait: WaitPolicy) -> Result<(), TransportError> {
        if self.fail == Some(command.name()) {
            self.fail = None;
            return Err(TransportError::Rejected {
                command: command.name(),
                status: -1,
            });
        }
        match command {
            RadioCommand::Write {
                code: IoctlCode::SetWpaAuth,
                value,
            } => self.secured = *value != 0,
            RadioCommand::Write {
                code: IoctlCode::Disassoc | IoctlCode::Down,
                ..
            } => self.pending.clear(),
            RadioCommand::SetSsid(record) => self.join_reply(record.ssid()),
            _ => {}
        }
        Ok(())
    }

    fn get_ioctl(&mut self, name: &str, buf: &mut [u8]) -> Result<usize, TransportError> {
        match name {
            "ver" => {
                let len = SIM_VERSION.len().min(buf.len());
                buf[..len].copy_from_slice(&SIM_VERSION[..len]);
                Ok(len)
            }
            _ => Err(TransportError::Timeout { command: "GET_VAR" }),
        }
    }

    fn enable_events(&mut self, events: &[EventKind]) {
        self.enabled = events.to_vec();
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        while let Some(event) = self.pending.pop_front() {
            if self.enabled.contains(&event.kind) {
                return Some(event);
            }
        }
        None
    }

    fn set_led(&mut self, on: bool) {
        self.led = on;
    }
}

/// Test pattern word for sample `index`: a ramp in the low byte and square
/// waves of halving frequency in the high byte.
pub fn pattern_word(index: usize) -> u16 {
    let low = index as u8;
    let high = (index >> 4) as u8;
    u16::from_le_bytes([low, high])
}

#[derive(Debug)]
struct SimRun {
    started: Instant,
    count: usize,
    delivered: usize,
    /// Words produced when the run was aborted.
    frozen: Option<usize>,
}

/// Capture hardware producing [`pattern_word`]s at the programmed rate.
///
/// Words count as moved once they have been drained, so the remaining count
/// never runs ahead of what the sample store holds.
#[derive(Debug)]
pub struct SimCapture {
    rate: u32,
    run: Option<SimRun>,
}

impl Default for SimCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCapture {
    pub fn new() -> Self {
        Self { rate: 1, run: None }
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    fn produced(&self, run: &SimRun) -> usize {
        match run.frozen {
            Some(produced) => produced,
            None => {
                let elapsed = run.started.elapsed().as_micros();
                let due = elapsed.saturating_mul(u128::from(self.rate)) / 1_000_000;
                usize::try_from(due).unwrap_or(usize::MAX).min(run.count)
            }
        }
    }
}

impl CaptureHardware for SimCapture {
    fn set_rate(&mut self, hz: u32) {
        self.rate = hz.max(1);
    }

    fn arm_transfer(&mut self, count: usize) {
        self.run = Some(SimRun {
            started: Instant::now(),
            count,
            delivered: 0,
            frozen: None,
        });
    }

    fn abort_transfer(&mut self) {
        let Some(produced) = self.run.as_ref().map(|run| self.produced(run)) else {
            return;
        };
        if let Some(run) = self.run.as_mut() {
            run.frozen.get_or_insert(produced);
        }
    }

    fn remaining_count(&mut self) -> usize {
        self.run.as_ref().map_or(0, |run| run.count - run.delivered)
    }

    fn drain_into(&mut self, dest: &mut [u16]) -> usize {
        let Some(produced) = self.run.as_ref().map(|run| self.produced(run)) else {
            return 0;
        };
        let Some(run) = self.run.as_mut() else {
            return 0;
        };
        let n = produced.saturating_sub(run.delivered).min(dest.len());
        for (i, word) in dest[..n].iter_mut().enumerate() {
            *word = pattern_word(run.delivered + i);
        }
        run.delivered += n;
        n
    }
}
