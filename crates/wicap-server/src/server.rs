//! Tokio shell around the instrument.
//!
//! Three concurrent activities share one [`InstrumentHandle`]: the poll loop
//! ticking the instrument, the sweep reclaiming idle transfer slots, and the
//! HTTP server. Each takes the instrument lock only for the duration of a
//! single tick, sweep or slot operation.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use wicap_core::HttpSettings;
use wicap_web::{create_router, InstrumentHandle};

/// Interval between poll ticks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2);
/// Interval between idle-slot sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            poll_interval: POLL_INTERVAL,
            sweep_interval: SWEEP_INTERVAL,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(http: &HttpSettings) -> Result<Self, ServerError> {
        let bind_addr = http
            .bind
            .parse()
            .map_err(|_| ServerError::InvalidBindAddress(http.bind.clone()))?;
        Ok(Self {
            bind_addr,
            ..Self::default()
        })
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address '{0}'")]
    InvalidBindAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The instrument with its poll loop and HTTP interface.
pub struct WiCapServer {
    config: ServerConfig,
    handle: InstrumentHandle,
}

impl WiCapServer {
    pub fn new(config: ServerConfig, handle: InstrumentHandle) -> Self {
        Self { config, handle }
    }

    pub fn handle(&self) -> InstrumentHandle {
        self.handle.clone()
    }

    /// Bring up the radio, start the background tasks and serve HTTP until
    /// the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("WiCap server listening on {}", listener.local_addr()?);

        if !self.handle.lock().await.start() {
            warn!("Radio bring-up incomplete, joining anyway");
        }

        let poll = spawn_poll_loop(self.handle.clone(), self.config.poll_interval);
        let sweep = spawn_idle_sweep(self.handle.clone(), self.config.sweep_interval);

        let result = axum::serve(listener, create_router(self.handle)).await;
        poll.abort();
        sweep.abort();
        result.map_err(ServerError::from)
    }
}

/// Tick the instrument every `period`.
pub fn spawn_poll_loop(handle: InstrumentHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = handle.now_ms();
            handle.lock().await.poll(now);
        }
    })
}

/// Reclaim idle transfer slots every `period`.
pub fn spawn_idle_sweep(handle: InstrumentHandle, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = handle.now_ms();
            let reclaimed = handle.lock().await.sweep_idle(now);
            if reclaimed > 0 {
                debug!("Reclaimed {} idle transfer slots", reclaimed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wicap_core::{CaptureState, Encoding, InstrumentSettings, LinkState};

    #[test]
    fn test_config_from_settings() {
        let config = ServerConfig::from_settings(&HttpSettings::default()).unwrap();
        assert_eq!(config.bind_addr, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.poll_interval, POLL_INTERVAL);

        let bad = HttpSettings {
            bind: "localhost".to_string(),
        };
        assert!(matches!(
            ServerConfig::from_settings(&bad),
            Err(ServerError::InvalidBindAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_loop_joins_and_captures() {
        let handle = InstrumentHandle::simulated(&InstrumentSettings::default());
        assert!(handle.lock().await.start());
        let poll = spawn_poll_loop(handle.clone(), POLL_INTERVAL);

        {
            let mut instrument = handle.lock().await;
            instrument.params_mut().xrate = 1_000_000;
            instrument.apply_command(1);
        }
        let mut joined = false;
        let mut ready = false;
        for _ in 0..500 {
            tokio::time::sleep(Duration::from_millis(2)).await;
            let instrument = handle.lock().await;
            joined = instrument.link_state() == LinkState::Up;
            ready = instrument.capture().state() == CaptureState::Ready;
            if joined && ready {
                break;
            }
        }
        poll.abort();
        assert!(joined, "simulated network never joined");
        assert!(ready, "capture never completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_reclaims() {
        let handle = InstrumentHandle::simulated(&InstrumentSettings::default());
        handle
            .lock()
            .await
            .open(Encoding::Raw, "/data.bin", handle.now_ms())
            .unwrap();
        let sweep = spawn_idle_sweep(handle.clone(), SWEEP_INTERVAL);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(handle.lock().await.open_transfers(), 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(handle.lock().await.open_transfers(), 0);
        sweep.abort();
    }
}
