use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    /// Either channel came back NaN: no response within the driver timeout,
    /// or a checksum/range failure. The driver does not tell them apart.
    #[error("sensor returned invalid data")]
    InvalidData,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("wifi is not associated")]
    Disconnected,
    #[error("wifi association not established after {attempts} status checks")]
    AssociationTimeout { attempts: u32 },
    #[error("wifi radio error: {0}")]
    Radio(String),
}

/// The HTTP exchange did not complete (DNS, connect, timeout, I/O).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
