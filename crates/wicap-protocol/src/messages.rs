//! Message types and fixed names of the HTTP interface.

use serde::{Deserialize, Serialize};
use wicap_core::{ParamId, ParamTable};

/// Software version reported at the root path.
pub const SW_VERSION: &str = "0.25";

/// Body served at [`ROOT_PATH`].
pub fn version_banner() -> String {
    format!("WiCap v{}", SW_VERSION)
}

pub const ROOT_PATH: &str = "/";
pub const STATUS_PATH: &str = "/status.txt";
/// Raw little-endian sample words.
pub const DATA_BIN_PATH: &str = "/data.bin";
/// Base64 encoded sample words.
pub const DATA_TXT_PATH: &str = "/data.txt";

/// Capture status as reported to clients, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: i64,
    pub nsamp: i64,
    pub cmd: i64,
    pub xsamp: i64,
    pub xrate: i64,
}

impl StatusReport {
    pub fn from_params(params: &ParamTable) -> Self {
        let value = |id: ParamId| params.value(id).unwrap_or_default();
        Self {
            state: value(ParamId::State),
            nsamp: value(ParamId::Nsamp),
            cmd: value(ParamId::Cmd),
            xsamp: value(ParamId::Xsamp),
            xrate: value(ParamId::Xrate),
        }
    }
}
