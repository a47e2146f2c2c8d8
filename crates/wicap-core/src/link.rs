//! Link status and inbound radio events.
//!
//! The radio firmware reports association progress asynchronously. Events
//! land in a single-slot [`EventSlot`] and are consumed at the top of a poll
//! tick; the join state machine folds them into a [`LinkStatus`] bitset.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Link state bitset maintained from radio events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LinkStatus(u8);

impl LinkStatus {
    /// No bits set.
    pub const EMPTY: LinkStatus = LinkStatus(0);
    /// The radio reported the link as up.
    pub const UP: LinkStatus = LinkStatus(0x01);
    /// The supplicant handshake completed (or security is open).
    pub const AUTHENTICATED: LinkStatus = LinkStatus(0x02);
    /// Sticky failure set by a disassociation notification.
    pub const FAILED: LinkStatus = LinkStatus(0x04);

    const JOINED: u8 = Self::UP.0 | Self::AUTHENTICATED.0;

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: LinkStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: LinkStatus) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: LinkStatus) {
        self.0 &= !other.0;
    }

    /// Set or clear `other` depending on `on`.
    pub fn set(&mut self, other: LinkStatus, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Both `UP` and `AUTHENTICATED` are set.
    pub const fn is_joined(self) -> bool {
        self.0 & Self::JOINED == Self::JOINED
    }

    /// Only the `FAILED` bit is set.
    pub const fn is_failed(self) -> bool {
        self.0 == Self::FAILED.0
    }
}

impl BitOr for LinkStatus {
    type Output = LinkStatus;

    fn bitor(self, rhs: LinkStatus) -> LinkStatus {
        LinkStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for LinkStatus {
    fn bitor_assign(&mut self, rhs: LinkStatus) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::UP) {
            names.push("UP");
        }
        if self.contains(Self::AUTHENTICATED) {
            names.push("AUTH");
        }
        if self.contains(Self::FAILED) {
            names.push("FAIL");
        }
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Kind of asynchronous radio notification, with its firmware event number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SetSsid,
    Join,
    Auth,
    Assoc,
    Reassoc,
    DisassocInd,
    Link,
    EapolMsg,
    PskSup,
    CsaCompleteInd,
    AssocReqIe,
    AssocRespIe,
    Other(u32),
}

impl EventKind {
    /// Events enabled while joining a network.
    pub const JOIN_EVENTS: [EventKind; 12] = [
        EventKind::Join,
        EventKind::Assoc,
        EventKind::Reassoc,
        EventKind::AssocReqIe,
        EventKind::AssocRespIe,
        EventKind::SetSsid,
        EventKind::Link,
        EventKind::Auth,
        EventKind::PskSup,
        EventKind::EapolMsg,
        EventKind::DisassocInd,
        EventKind::CsaCompleteInd,
    ];

    pub const fn code(self) -> u32 {
        match self {
            EventKind::SetSsid => 0,
            EventKind::Join => 1,
            EventKind::Auth => 3,
            EventKind::Assoc => 7,
            EventKind::Reassoc => 9,
            EventKind::DisassocInd => 12,
            EventKind::Link => 16,
            EventKind::EapolMsg => 25,
            EventKind::PskSup => 46,
            EventKind::CsaCompleteInd => 80,
            EventKind::AssocReqIe => 87,
            EventKind::AssocRespIe => 88,
            EventKind::Other(code) => code,
        }
    }

    pub const fn from_code(code: u32) -> EventKind {
        match code {
            0 => EventKind::SetSsid,
            1 => EventKind::Join,
            3 => EventKind::Auth,
            7 => EventKind::Assoc,
            9 => EventKind::Reassoc,
            12 => EventKind::DisassocInd,
            16 => EventKind::Link,
            25 => EventKind::EapolMsg,
            46 => EventKind::PskSup,
            80 => EventKind::CsaCompleteInd,
            87 => EventKind::AssocReqIe,
            88 => EventKind::AssocRespIe,
            other => EventKind::Other(other),
        }
    }
}

/// An inbound notification from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioEvent {
    pub kind: EventKind,
    pub status: u32,
    pub flags: u16,
}

impl RadioEvent {
    /// Supplicant status reported when the key handshake completed.
    pub const PSK_SUP_KEYED: u32 = 6;
    /// SET_SSID status: the access point refused the join.
    pub const SET_SSID_FAILED: u32 = 1;
    /// SET_SSID status: no network with that SSID was found.
    pub const SET_SSID_NO_NETWORKS: u32 = 3;

    pub fn new(kind: EventKind, status: u32, flags: u16) -> Self {
        Self {
            kind,
            status,
            flags,
        }
    }

    /// LINK notification; `up` maps to bit 0 of the flags.
    pub fn link(up: bool) -> Self {
        Self::new(EventKind::Link, 0, u16::from(up))
    }

    /// Supplicant notification carrying `status`.
    pub fn psk_sup(status: u32) -> Self {
        Self::new(EventKind::PskSup, status, 0)
    }

    pub fn disassoc() -> Self {
        Self::new(EventKind::DisassocInd, 0, 0)
    }
}

/// Single-slot mailbox for the latest radio event.
///
/// The notification path deposits with [`post`](Self::post); the poll tick
/// drains with [`take`](Self::take). An event that was never taken is replaced
/// by the next one and counted as overwritten.
#[derive(Debug, Default)]
pub struct EventSlot {
    latest: Option<RadioEvent>,
    overwritten: u32,
}

impl EventSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, event: RadioEvent) {
        if let Some(previous) = self.latest.replace(event) {
            self.overwritten = self.overwritten.wrapping_add(1);
            tracing::trace!("event {:?} overwritten by {:?}", previous.kind, event.kind);
        }
    }

    pub fn take(&mut self) -> Option<RadioEvent> {
        self.latest.take()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_none()
    }

    /// Number of events replaced before they were consumed.
    pub fn overwritten(&self) -> u32 {
        self.overwritten
    }
}
