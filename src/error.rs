use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Heart rate payload too short ({len} bytes, need 2)")]
    TooShort { len: usize },

    #[error("Unsupported heart rate format (flags {flags:#04x}), only the 8-bit encoding is handled")]
    UnsupportedFormat { flags: u8 },
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    #[error("No device advertising a name containing {0:?} was found")]
    DeviceNotFound(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Service discovery failed: {0}")]
    Discovery(String),

    #[error("Invalid connection state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::source::ConnectionState,
        to: crate::source::ConnectionState,
    },

    #[error("BLE transport error: {0}")]
    Transport(#[from] btleplug::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Corrupt reading {id}: {reason}")]
    Corrupt { id: i64, reason: String },

    #[error("Store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is already streaming")]
    AlreadyRunning,

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
