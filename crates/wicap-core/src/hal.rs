//! Hardware abstraction for the radio and the capture peripherals.
//!
//! These traits are the only way the core reaches the outside world:
//! - [`RadioTransport`] for the wireless chip (register access, control
//!   commands, event delivery, status LED)
//! - [`CaptureHardware`] for the timing source and the transfer engine that
//!   moves sampled words into memory
//!
//! All methods are synchronous and must return promptly; the poll loop never
//! blocks on hardware.

use crate::error::{SecurityError, TransportError};
use crate::link::{EventKind, RadioEvent};

/// Bus function addressed by a register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFunction {
    Bus,
    Backplane,
    Radio,
}

/// Bus interrupt register; bit 0 flags a "data unavailable" error.
pub const BUS_INTERRUPT_REG: u32 = 0x0004;
/// Backplane sleep control register.
pub const BACKPLANE_SLEEP_CSR_REG: u32 = 0x1001f;

/// How long the transport may wait for a command response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// The transport's standard response timeout.
    Standard,
    /// A specific timeout in milliseconds.
    Millis(u32),
}

/// Numeric firmware control codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCode {
    Up,
    Down,
    SetInfra,
    SetAuth,
    SetSsid,
    Disassoc,
    SetGmode,
    SetWsec,
    SetWpaAuth,
    GetVar,
    SetVar,
    SetWsecPmk,
}

impl IoctlCode {
    pub const fn code(self) -> u32 {
        match self {
            IoctlCode::Up => 2,
            IoctlCode::Down => 3,
            IoctlCode::SetInfra => 20,
            IoctlCode::SetAuth => 22,
            IoctlCode::SetSsid => 26,
            IoctlCode::Disassoc => 52,
            IoctlCode::SetGmode => 110,
            IoctlCode::SetWsec => 134,
            IoctlCode::SetWpaAuth => 165,
            IoctlCode::GetVar => 262,
            IoctlCode::SetVar => 263,
            IoctlCode::SetWsecPmk => 268,
        }
    }
}

pub const PSK_MIN_LEN: usize = 8;
pub const PSK_MAX_LEN: usize = 64;
pub const SAE_MAX_LEN: usize = 128;
pub const SSID_MAX_LEN: usize = 32;

/// Pre-shared key record: u16 length, u16 flags, key bytes plus terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskRecord {
    key: Vec<u8>,
}

impl PskRecord {
    const FLAGS: u16 = 1;

    pub fn new(key: &[u8]) -> Result<Self, SecurityError> {
        if !(PSK_MIN_LEN..=PSK_MAX_LEN).contains(&key.len()) {
            return Err(SecurityError::PskLength {
                len: key.len(),
                min: PSK_MIN_LEN,
                max: PSK_MAX_LEN,
            });
        }
        Ok(Self { key: key.to_vec() })
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.key.len() as u16).to_le_bytes());
        out.extend_from_slice(&Self::FLAGS.to_le_bytes());
        let start = out.len();
        out.extend_from_slice(&self.key);
        out.resize(start + PSK_MAX_LEN + 1, 0);
    }
}

/// SAE password record: u16 length followed by a fixed 128-byte field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaePassword {
    password: Vec<u8>,
}

impl SaePassword {
    pub fn new(password: &[u8]) -> Result<Self, SecurityError> {
        if password.is_empty() || password.len() > SAE_MAX_LEN {
            return Err(SecurityError::SaeLength {
                len: password.len(),
                max: SAE_MAX_LEN,
            });
        }
        Ok(Self {
            password: password.to_vec(),
        })
    }

    pub fn password(&self) -> &[u8] {
        &self.password
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.password.len() as u16).to_le_bytes());
        let start = out.len();
        out.extend_from_slice(&self.password);
        out.resize(start + SAE_MAX_LEN, 0);
    }
}

/// SSID record: u32 length and a fixed 32-byte field.
///
/// Longer names are cut to the field size; an empty name is passed through
/// and simply never associates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsidRecord {
    ssid: Vec<u8>,
}

impl SsidRecord {
    pub fn new(ssid: &str) -> Self {
        let bytes = ssid.as_bytes();
        let len = bytes.len().min(SSID_MAX_LEN);
        if len < bytes.len() {
            tracing::warn!("SSID '{}' longer than {} bytes, truncated", ssid, SSID_MAX_LEN);
        }
        Self {
            ssid: bytes[..len].to_vec(),
        }
    }

    pub fn ssid(&self) -> &[u8] {
        &self.ssid
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.ssid.len() as u32).to_le_bytes());
        let start = out.len();
        out.extend_from_slice(&self.ssid);
        out.resize(start + SSID_MAX_LEN, 0);
    }
}

/// Regulatory country record: abbreviation, revision (-1 = default), code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountryRecord {
    code: [u8; 2],
}

impl CountryRecord {
    /// Worldwide-safe default.
    pub const WORLDWIDE: CountryRecord = CountryRecord { code: *b"XX" };

    pub const fn new(code: [u8; 2]) -> Self {
        Self { code }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&(-1i32).to_le_bytes());
        out.extend_from_slice(&self.code);
        out.extend_from_slice(&[0, 0]);
    }
}

/// A control command for the radio firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    /// Plain numeric control code with a 32-bit argument.
    Write { code: IoctlCode, value: u32 },
    /// Named variable set to a 32-bit value.
    SetVar { name: &'static str, value: u32 },
    /// Named variable set to a pair of 32-bit values (bsscfg index + value).
    SetVarPair { name: &'static str, values: [u32; 2] },
    SetCountry(CountryRecord),
    SetPsk(PskRecord),
    SetSaePassword(SaePassword),
    SetSsid(SsidRecord),
}

impl RadioCommand {
    pub fn up() -> Self {
        RadioCommand::Write {
            code: IoctlCode::Up,
            value: 0,
        }
    }

    pub fn down() -> Self {
        RadioCommand::Write {
            code: IoctlCode::Down,
            value: 0,
        }
    }

    pub fn disassociate() -> Self {
        RadioCommand::Write {
            code: IoctlCode::Disassoc,
            value: 0,
        }
    }

    /// Name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            RadioCommand::Write { code, .. } => match code {
                IoctlCode::Up => "UP",
                IoctlCode::Down => "DOWN",
                IoctlCode::SetInfra => "SET_INFRA",
                IoctlCode::SetAuth => "SET_AUTH",
                IoctlCode::SetSsid => "SET_SSID",
                IoctlCode::Disassoc => "DISASSOC",
                IoctlCode::SetGmode => "SET_GMODE",
                IoctlCode::SetWsec => "SET_WSEC",
                IoctlCode::SetWpaAuth => "SET_WPA_AUTH",
                IoctlCode::GetVar => "GET_VAR",
                IoctlCode::SetVar => "SET_VAR",
                IoctlCode::SetWsecPmk => "SET_WSEC_PMK",
            },
            RadioCommand::SetVar { name, .. } | RadioCommand::SetVarPair { name, .. } => *name,
            RadioCommand::SetCountry(_) => "country",
            RadioCommand::SetPsk(_) => "SET_WSEC_PMK",
            RadioCommand::SetSaePassword(_) => "sae_password",
            RadioCommand::SetSsid(_) => "SET_SSID",
        }
    }

    /// Firmware control code this command is carried by.
    pub fn code(&self) -> IoctlCode {
        match self {
            RadioCommand::Write { code, .. } => *code,
            RadioCommand::SetPsk(_) => IoctlCode::SetWsecPmk,
            RadioCommand::SetSsid(_) => IoctlCode::SetSsid,
            RadioCommand::SetVar { .. }
            | RadioCommand::SetVarPair { .. }
            | RadioCommand::SetCountry(_)
            | RadioCommand::SetSaePassword(_) => IoctlCode::SetVar,
        }
    }

    /// Little-endian payload; named variables are prefixed with their
    /// NUL-terminated name.
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if self.code() == IoctlCode::SetVar {
            out.extend_from_slice(self.name().as_bytes());
            out.push(0);
        }
        match self {
            RadioCommand::Write { code, value } => {
                if !matches!(code, IoctlCode::Up | IoctlCode::Down | IoctlCode::Disassoc) {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            RadioCommand::SetVar { value, .. } => out.extend_from_slice(&value.to_le_bytes()),
            RadioCommand::SetVarPair { values, .. } => {
                for value in values {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            RadioCommand::SetCountry(record) => record.encode(&mut out),
            RadioCommand::SetPsk(record) => record.encode(&mut out),
            RadioCommand::SetSaePassword(record) => record.encode(&mut out),
            RadioCommand::SetSsid(record) => record.encode(&mut out),
        }
        out
    }
}

/// Command and event transport to the wireless chip.
pub trait RadioTransport {
    /// Read a register of `width` bytes.
    fn read_register(&mut self, function: BusFunction, addr: u32, width: u8) -> u32;

    /// Write a register of `width` bytes.
    fn write_register(&mut self, function: BusFunction, addr: u32, value: u32, width: u8);

    /// Send a control command and wait for its acknowledgement.
    fn send_ioctl(&mut self, command: &RadioCommand, wait: WaitPolicy)
        -> Result<(), TransportError>;

    /// Read a named variable into `buf`, returning the number of bytes filled.
    fn get_ioctl(&mut self, name: &str, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Ask the firmware to report the given event kinds.
    fn enable_events(&mut self, events: &[EventKind]);

    /// Next pending notification, if any. At most one is consumed per tick.
    fn poll_event(&mut self) -> Option<RadioEvent>;

    /// Drive the link indicator LED.
    fn set_led(&mut self, on: bool);
}

/// Hardware-timed sample acquisition.
pub trait CaptureHardware {
    /// Program the timing source to `hz` samples per second.
    fn set_rate(&mut self, hz: u32);

    /// Enable the timing source and restart the transfer counter at `count` words.
    fn arm_transfer(&mut self, count: usize);

    /// Abort any transfer and disable the timing source.
    fn abort_transfer(&mut self);

    /// Words the transfer engine still has to move. An aborted transfer keeps
    /// the count it had when it was stopped.
    fn remaining_count(&mut self) -> usize;

    /// Move words captured since the last call into `dest`, returning how many
    /// were written. Never writes past `dest`.
    fn drain_into(&mut self, dest: &mut [u16]) -> usize;
}

impl<T: RadioTransport + ?Sized> RadioTransport for Box<T> {
    fn read_register(&mut self, function: BusFunction, addr: u32, width: u8) -> u32 {
        (**self).read_register(function, addr, width)
    }

    fn write_register(&mut self, function: BusFunction, addr: u32, value: u32, width: u8) {
        (**self).write_register(function, addr, value, width)
    }

    fn send_ioctl(
        &mut self,
        command: &RadioCommand,
        wait: WaitPolicy,
    ) -> Result<(), TransportError> {
        (**self).send_ioctl(command, wait)
    }

    fn get_ioctl(&mut self, name: &str, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).get_ioctl(name, buf)
    }

    fn enable_events(&mut self, events: &[EventKind]) {
        (**self).enable_events(events)
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        (**self).poll_event()
    }

    fn set_led(&mut self, on: bool) {
        (**self).set_led(on)
    }
}

impl<T: CaptureHardware + ?Sized> CaptureHardware for Box<T> {
    fn set_rate(&mut self, hz: u32) {
        (**self).set_rate(hz)
    }

    fn arm_transfer(&mut self, count: usize) {
        (**self).arm_transfer(count)
    }

    fn abort_transfer(&mut self) {
        (**self).abort_transfer()
    }

    fn remaining_count(&mut self) -> usize {
        (**self).remaining_count()
    }

    fn drain_into(&mut self, dest: &mut [u16]) -> usize {
        (**self).drain_into(dest)
    }
}

/// Send `steps` in order, stopping at the first command that fails.
///
/// Returns true only if every command was acknowledged. Failures are logged
/// and reported through the return value, never retried here.
pub fn send_all<R: RadioTransport + ?Sized>(
    radio: &mut R,
    steps: &[(RadioCommand, WaitPolicy)],
) -> bool {
    for (command, wait) in steps {
        if let Err(e) = radio.send_ioctl(command, *wait) {
            tracing::warn!("IOCTL error: {}", e);
            return false;
        }
    }
    true
}
