//! # wicap-web
//!
//! HTTP interface for the WiCap instrument.
//!
//! This crate provides:
//! - The Axum router serving the version banner, the status report and the
//!   two virtual sample files
//! - Query-parameter handling applied to every request before routing
//! - Chunked streaming bodies pulled from transfer slots, with byte-range
//!   restarts
//! - [`InstrumentHandle`], the instrument shared between the handlers and the
//!   poll loop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wicap_web::{create_router, InstrumentHandle};
//!
//! let handle = InstrumentHandle::simulated(&settings);
//! let app = create_router(handle.clone());
//!
//! let listener = TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

pub mod routes;

// Re-exports
pub use routes::create_router;

use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use wicap_core::{CaptureHardware, Instrument, InstrumentSettings, RadioTransport, SimCapture, SimRadio};

/// Instrument over boxed peripherals, so simulated and real hardware share
/// one handle type.
pub type DynInstrument =
    Instrument<Box<dyn RadioTransport + Send>, Box<dyn CaptureHardware + Send>>;

/// Shared instrument plus the monotonic clock every caller stamps its
/// operations with.
#[derive(Clone)]
pub struct InstrumentHandle {
    inner: Arc<Mutex<DynInstrument>>,
    epoch: Instant,
}

impl InstrumentHandle {
    pub fn new(instrument: DynInstrument) -> Self {
        Self {
            inner: Arc::new(Mutex::new(instrument)),
            epoch: Instant::now(),
        }
    }

    /// Instrument on a simulated radio and simulated capture hardware.
    pub fn simulated(settings: &InstrumentSettings) -> Self {
        let radio: Box<dyn RadioTransport + Send> = Box::new(SimRadio::new());
        let hw: Box<dyn CaptureHardware + Send> = Box::new(SimCapture::new());
        Self::new(Instrument::new(radio, hw, settings))
    }

    pub async fn lock(&self) -> MutexGuard<'_, DynInstrument> {
        self.inner.lock().await
    }

    /// Milliseconds since the handle was created.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Type alias for shared state in Axum handlers.
pub type AppState = InstrumentHandle;
