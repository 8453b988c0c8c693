pub mod error;
pub mod request;
pub mod session;

#[cfg(feature = "trezor-device")]
pub mod trezor;

#[cfg(test)]
mod testing;

pub use error::{DeviceError, Result};
pub use request::{DerivationRequest, DerivedKey};
pub use session::{DeviceSession, SessionState};

/// Enumerates and opens hardware key-derivation devices.
///
/// Discovery only returns handles matching the backend's fixed
/// vendor/product/interface triple; opening a handle yields a link that
/// the session then probes for liveness.
pub trait DeviceBackend {
    type Handle;
    type Link: DeviceLink;

    /// List the attached devices this backend knows how to talk to.
    fn discover(&mut self) -> Result<Vec<Self::Handle>>;

    /// Open a transport to a discovered device.
    fn connect(&mut self, handle: Self::Handle) -> Result<Self::Link>;
}

/// An open transport to a single device.
pub trait DeviceLink {
    /// Liveness probe. `false` means the device answered incorrectly or not at all.
    fn ping(&mut self) -> bool;

    /// Run one derivation request/response exchange.
    fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey>;
}

/// Operator decision gate used when no device could be found.
pub trait Confirmer {
    /// Block until the operator chooses. `true` retries discovery, `false` aborts.
    fn confirm(&mut self, prompt: &RetryPrompt) -> Result<bool>;
}

/// Anything able to turn a derivation request into key material.
///
/// The pipeline only depends on this; [`DeviceSession`] is the production
/// implementation.
pub trait KeySource {
    fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey>;
}

/// Text shown to the operator while waiting for a device to be attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPrompt {
    pub title: &'static str,
    pub description: &'static str,
    pub retry_label: &'static str,
    pub abort_label: &'static str,
}

impl RetryPrompt {
    pub const NO_DEVICE: RetryPrompt = RetryPrompt {
        title: "No Trezor devices found.",
        description: "Please check connection to your Trezor device.",
        retry_label: "Retry",
        abort_label: "Abort",
    };
}
