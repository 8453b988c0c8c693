use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The operator declined to retry discovery.
    #[error("no Trezor device found and the operator declined to retry")]
    NoDevice,

    /// A connected device failed its liveness probe. Never retried.
    #[error("unexpected behaviour of the Trezor device: connected but failed the liveness probe")]
    LivenessFailed,

    #[error("device protocol error: {0}")]
    Protocol(String),

    #[error("operation denied on the device: {0}")]
    UserAborted(String),

    #[error("device transport error: {0}")]
    Transport(String),

    #[error("operator prompt failed: {0}")]
    Prompt(String),

    #[error("invalid derivation path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("cannot {action} while the device session is {state:?}")]
    InvalidState {
        state: SessionState,
        action: &'static str,
    },
}

pub type Result<T, E = DeviceError> = std::result::Result<T, E>;
