use thiserror::Error;

use nexus_engine::ParamsError;

/// Errors the daemon-level control surface raises, layered over
/// `nexus_engine`'s per-request/per-chunk error taxonomy.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no device registered under devnum {0}")]
    NotRegistered(u32),

    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error("backing store {path} could not be opened: {source}")]
    BackingStore {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
