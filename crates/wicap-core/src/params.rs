//! The instrument's parameter table.
//!
//! A small fixed set of named parameters, each with a kind that decides how
//! it may be changed: status values are written only by the instrument,
//! value and command parameters may be set from a request query, text and
//! address parameters come from configuration.

use crate::capture::{CaptureState, XRATE_DEFAULT, XSAMP_DEFAULT};
use crate::config::InstrumentSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Status,
    Command,
    Value,
    Text,
    Address,
}

/// Parameter identifiers in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    State,
    Nsamp,
    Cmd,
    Xsamp,
    Xrate,
    Security,
    Ssid,
    Passwd,
    Unit,
    IpBase,
    Gateway,
}

impl ParamId {
    pub const ALL: [ParamId; 11] = [
        ParamId::State,
        ParamId::Nsamp,
        ParamId::Cmd,
        ParamId::Xsamp,
        ParamId::Xrate,
        ParamId::Security,
        ParamId::Ssid,
        ParamId::Passwd,
        ParamId::Unit,
        ParamId::IpBase,
        ParamId::Gateway,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            ParamId::State => "state",
            ParamId::Nsamp => "nsamp",
            ParamId::Cmd => "cmd",
            ParamId::Xsamp => "xsamp",
            ParamId::Xrate => "xrate",
            ParamId::Security => "security",
            ParamId::Ssid => "ssid",
            ParamId::Passwd => "passwd",
            ParamId::Unit => "unit",
            ParamId::IpBase => "ip_base",
            ParamId::Gateway => "gateway",
        }
    }

    pub const fn kind(self) -> ParamKind {
        match self {
            ParamId::State | ParamId::Nsamp => ParamKind::Status,
            ParamId::Cmd => ParamKind::Command,
            ParamId::Xsamp | ParamId::Xrate | ParamId::Unit => ParamKind::Value,
            ParamId::Security | ParamId::Ssid | ParamId::Passwd => ParamKind::Text,
            ParamId::IpBase | ParamId::Gateway => ParamKind::Address,
        }
    }

    /// Parameters included in the status report: everything ahead of the
    /// network settings.
    pub const fn is_reported(self) -> bool {
        matches!(
            self,
            ParamId::State | ParamId::Nsamp | ParamId::Cmd | ParamId::Xsamp | ParamId::Xrate
        )
    }

    pub fn from_name(name: &str) -> Option<ParamId> {
        Self::ALL.into_iter().find(|id| id.name() == name)
    }
}

/// Capture command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Stop,
    Single,
    Multi,
}

impl Command {
    pub const fn code(self) -> i64 {
        match self {
            Command::Stop => 0,
            Command::Single => 1,
            Command::Multi => 2,
        }
    }

    pub const fn from_code(code: i64) -> Option<Command> {
        match code {
            0 => Some(Command::Stop),
            1 => Some(Command::Single),
            2 => Some(Command::Multi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamTable {
    pub state: CaptureState,
    pub nsamp: i64,
    pub cmd: i64,
    pub xsamp: i64,
    pub xrate: i64,
    pub security: String,
    pub ssid: String,
    pub passwd: String,
    pub unit: i64,
    pub ip_base: u32,
    pub gateway: u32,
}

impl Default for ParamTable {
    fn default() -> Self {
        Self::from_settings(&InstrumentSettings::default())
    }
}

impl ParamTable {
    pub fn from_settings(settings: &InstrumentSettings) -> Self {
        Self {
            state: CaptureState::Idle,
            nsamp: 0,
            cmd: 0,
            xsamp: settings.capture.xsamp as i64,
            xrate: i64::from(settings.capture.xrate),
            security: settings.network.security.clone(),
            ssid: settings.network.ssid.clone(),
            passwd: settings.network.passwd.clone(),
            unit: i64::from(settings.network.unit),
            ip_base: settings.network.ip_base,
            gateway: settings.network.gateway,
        }
    }

    /// Numeric value of a parameter; `None` for text parameters.
    pub fn value(&self, id: ParamId) -> Option<i64> {
        match id {
            ParamId::State => Some(self.state.code()),
            ParamId::Nsamp => Some(self.nsamp),
            ParamId::Cmd => Some(self.cmd),
            ParamId::Xsamp => Some(self.xsamp),
            ParamId::Xrate => Some(self.xrate),
            ParamId::Unit => Some(self.unit),
            ParamId::IpBase => Some(i64::from(self.ip_base)),
            ParamId::Gateway => Some(i64::from(self.gateway)),
            ParamId::Security | ParamId::Ssid | ParamId::Passwd => None,
        }
    }

    /// Set a value or command parameter. Returns false for any other kind.
    pub fn set_value(&mut self, id: ParamId, value: i64) -> bool {
        match id {
            ParamId::Cmd => self.cmd = value,
            ParamId::Xsamp => self.xsamp = value,
            ParamId::Xrate => self.xrate = value,
            ParamId::Unit => self.unit = value,
            _ => return false,
        }
        true
    }

    /// Requested sample count, never negative.
    pub fn sample_request(&self) -> usize {
        usize::try_from(self.xsamp).unwrap_or(0)
    }

    /// Sample rate in Hz, at least 1.
    pub fn sample_rate(&self) -> u32 {
        u32::try_from(self.xrate).unwrap_or(XRATE_DEFAULT).max(1)
    }

    /// Static address of this unit, if a base address is configured.
    pub fn static_address(&self) -> Option<u32> {
        (self.ip_base != 0).then(|| self.ip_base.wrapping_add(self.unit as u32))
    }
}
