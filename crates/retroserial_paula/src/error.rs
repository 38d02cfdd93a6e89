use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not supported by this host")]
    Unsupported(&'static str),
    #[error("could not open '{name}': {reason}")]
    OpenFailed { name: String, reason: String },
    #[error("not connected")]
    NotConnected,
    #[error("shared serial memory version mismatch {found:08x} != {expected:08x}")]
    VersionMismatch { found: u32, expected: u32 },
}

impl TransportError {
    pub fn open_failed(name: &str, reason: impl ToString) -> Self {
        TransportError::OpenFailed {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
