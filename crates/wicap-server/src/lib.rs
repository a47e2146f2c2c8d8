//! # wicap-server
//!
//! Runtime shell for the WiCap instrument.
//!
//! The core crate only knows explicit poll ticks; this crate supplies the
//! clock and the tasks that drive them:
//! - `tokio-runtime` (default) - [`WiCapServer`], which runs the poll loop,
//!   the idle-slot sweep and the HTTP interface on Tokio
//! - [`FileConfigStorage`] - settings persisted as JSON files on a host

pub mod storage;

#[cfg(feature = "tokio-runtime")]
pub mod server;

pub use storage::FileConfigStorage;
pub use wicap_core::{InstrumentSettings, LinkState};

#[cfg(feature = "tokio-runtime")]
pub use server::{spawn_idle_sweep, spawn_poll_loop, ServerConfig, ServerError, WiCapServer};
#[cfg(feature = "tokio-runtime")]
pub use wicap_web::InstrumentHandle;
