//! # wicap-core
//!
//! Core logic for the WiCap network-attached capture instrument.
//!
//! This crate provides:
//! - Link status tracking and radio event handling
//! - Security negotiation (auth mode to radio command sequence)
//! - The wireless join state machine
//! - The capture engine and its fixed sample store
//! - The streaming transfer layer (raw and base64 virtual files)
//! - The parameter table, configuration types and storage abstraction
//! - `Instrument`, which composes one cooperative poll tick
//! - Simulated radio and capture peripherals for host builds
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Everything is driven by explicit polling with caller-supplied millisecond
//! timestamps, so the same code runs against real peripherals or simulations.

pub mod capture;
pub mod config;
pub mod error;
pub mod hal;
pub mod instrument;
pub mod join;
pub mod link;
pub mod params;
pub mod security;
pub mod sim;
pub mod stream;

pub use capture::{CaptureEngine, CaptureState, SampleStore};
pub use config::{
    CaptureSettings, ConfigError, ConfigStorage, HttpSettings, InstrumentSettings, NetworkSettings,
};
pub use error::{SecurityError, StreamError, TransportError};
pub use hal::{CaptureHardware, RadioCommand, RadioTransport};
pub use instrument::{CommandOutcome, Instrument, LinkState};
pub use join::{JoinContext, JoinState};
pub use link::{EventKind, EventSlot, LinkStatus, RadioEvent};
pub use params::{Command, ParamId, ParamKind, ParamTable};
pub use security::{AuthMode, SecurityNegotiator};
pub use sim::{SimCapture, SimRadio};
pub use stream::{base64_length, Encoding, FileStat, SlotId, TransferPool};
