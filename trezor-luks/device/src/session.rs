use crate::error::{DeviceError, Result};
use crate::request::{DerivationRequest, DerivedKey};
use crate::{Confirmer, DeviceBackend, DeviceLink, KeySource, RetryPrompt};

/// Lifecycle of a [`DeviceSession`].
///
/// ```text
/// Disconnected -> Discovering -> Connected -> VerifyingLiveness -> Ready
///                    |  ^                           |
///                    v  | retry                     v
///             AwaitingConfirmation                Fatal
///                    | abort
///                    v
///                 Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Discovering,
    AwaitingConfirmation,
    Connected,
    VerifyingLiveness,
    Ready,
    Aborted,
    Fatal,
}

/// Owns the transport to one hardware device for the lifetime of the process.
///
/// Discovery misses are retried only after the operator confirms; a device
/// that connects but fails its liveness probe is fatal and never retried.
pub struct DeviceSession<B: DeviceBackend, C> {
    backend: B,
    confirmer: C,
    state: SessionState,
    link: Option<B::Link>,
}

impl<B, C> DeviceSession<B, C>
where
    B: DeviceBackend,
    C: Confirmer,
{
    pub fn new(backend: B, confirmer: C) -> Self {
        Self {
            backend,
            confirmer,
            state: SessionState::Disconnected,
            link: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session from `Disconnected` to `Ready`.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(DeviceError::InvalidState {
                state: self.state,
                action: "start discovery",
            });
        }

        let mut link = loop {
            self.state = SessionState::Discovering;
            if let Some(link) = self.attach_first() {
                break link;
            }

            self.state = SessionState::AwaitingConfirmation;
            log::warn!("{}", RetryPrompt::NO_DEVICE.title);
            let retry = match self.confirmer.confirm(&RetryPrompt::NO_DEVICE) {
                Ok(retry) => retry,
                Err(err) => {
                    self.state = SessionState::Aborted;
                    return Err(err);
                }
            };
            if !retry {
                log::error!("cannot continue without a Trezor device");
                self.state = SessionState::Aborted;
                return Err(DeviceError::NoDevice);
            }
        };

        self.state = SessionState::Connected;
        log::info!("device connected, verifying liveness");
        self.state = SessionState::VerifyingLiveness;
        if !link.ping() {
            log::error!("connected device failed the liveness probe");
            self.state = SessionState::Fatal;
            return Err(DeviceError::LivenessFailed);
        }

        log::debug!("device session ready");
        self.state = SessionState::Ready;
        self.link = Some(link);
        Ok(())
    }

    /// Exchange one derivation request with a `Ready` device.
    pub fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey> {
        let state = self.state;
        match self.link.as_mut() {
            Some(link) if state == SessionState::Ready => link.derive_key(request),
            _ => Err(DeviceError::InvalidState {
                state,
                action: "derive a key",
            }),
        }
    }

    /// Enumerate and open the first device that accepts a connection.
    fn attach_first(&mut self) -> Option<B::Link> {
        let handles = match self.backend.discover() {
            Ok(handles) => handles,
            Err(err) => {
                log::warn!("device enumeration failed: {err}");
                return None;
            }
        };

        for handle in handles {
            match self.backend.connect(handle) {
                Ok(link) => return Some(link),
                Err(err) => log::warn!("failed to open device: {err}"),
            }
        }
        None
    }
}

impl<B, C> KeySource for DeviceSession<B, C>
where
    B: DeviceBackend,
    C: Confirmer,
{
    /// Connects on first use, then derives.
    fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey> {
        if self.state == SessionState::Disconnected {
            self.connect()?;
        }
        DeviceSession::derive_key(self, request)
    }
}
