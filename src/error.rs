use thiserror::Error;

/// Contract and resource violations surfaced by the host layer.
///
/// Most public operations return `anyhow::Result`; these values are wrapped into the
/// `anyhow::Error` so callers can `downcast_ref::<BleError>()` when they need to react
/// to a specific condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("connection id {conn_id} is outside of the link table (max {max})")]
    InvalidConnId { conn_id: u8, max: usize },

    #[error("no free slot left in {0}")]
    NoCapacity(&'static str),

    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("malformed payload for {what}: need {needed} bytes, got {actual}")]
    MalformedPayload {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: u32 },

    #[error("advertising payload of {0} bytes exceeds 31 bytes")]
    PayloadTooLong(usize),

    #[error("BLE stack is not initialized")]
    NotInitialized,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("not connected")]
    NotConnected,
}
