//! Simulated devices for exercising the session without hardware.

use std::collections::VecDeque;

use zeroize::Zeroizing;

use crate::error::{DeviceError, Result};
use crate::request::{DerivationRequest, DerivedKey};
use crate::{Confirmer, DeviceBackend, DeviceLink, RetryPrompt};

#[derive(Debug, Clone, Copy)]
pub struct SimulatedDevice {
    alive: bool,
    accepts_connection: bool,
    denies: bool,
}

impl SimulatedDevice {
    pub fn healthy() -> Self {
        Self {
            alive: true,
            accepts_connection: true,
            denies: false,
        }
    }

    pub fn unresponsive() -> Self {
        Self {
            alive: false,
            ..Self::healthy()
        }
    }

    pub fn refusing() -> Self {
        Self {
            accepts_connection: false,
            ..Self::healthy()
        }
    }

    pub fn denying() -> Self {
        Self {
            denies: true,
            ..Self::healthy()
        }
    }

    /// Deterministic stand-in for the device-side cipher.
    pub fn derive(request: &DerivationRequest) -> Vec<u8> {
        request
            .initial_key_value
            .iter()
            .enumerate()
            .map(|(i, byte)| {
                let iv = request.iv.get(i % request.iv.len().max(1)).copied().unwrap_or(0);
                byte ^ iv ^ request.key_name.len() as u8
            })
            .collect()
    }
}

/// Backend whose discovery results are scripted round by round. Once the
/// script runs out every round finds nothing.
pub struct SimulatedBackend {
    rounds: VecDeque<Vec<SimulatedDevice>>,
    pub discover_calls: usize,
}

impl SimulatedBackend {
    pub fn new(rounds: Vec<Vec<SimulatedDevice>>) -> Self {
        Self {
            rounds: rounds.into(),
            discover_calls: 0,
        }
    }
}

impl DeviceBackend for SimulatedBackend {
    type Handle = SimulatedDevice;
    type Link = SimulatedLink;

    fn discover(&mut self) -> Result<Vec<SimulatedDevice>> {
        self.discover_calls += 1;
        Ok(self.rounds.pop_front().unwrap_or_default())
    }

    fn connect(&mut self, handle: SimulatedDevice) -> Result<SimulatedLink> {
        if !handle.accepts_connection {
            return Err(DeviceError::Transport("simulated open failure".into()));
        }
        Ok(SimulatedLink { device: handle })
    }
}

pub struct SimulatedLink {
    device: SimulatedDevice,
}

impl DeviceLink for SimulatedLink {
    fn ping(&mut self) -> bool {
        self.device.alive
    }

    fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey> {
        if self.device.denies {
            return Err(DeviceError::UserAborted("Action cancelled by user".into()));
        }
        Ok(DerivedKey::new(Zeroizing::new(SimulatedDevice::derive(request))))
    }
}

/// Confirmer answering from a fixed list; runs out as "abort".
pub struct ScriptedConfirmer {
    answers: VecDeque<bool>,
    pub prompts: usize,
}

impl ScriptedConfirmer {
    pub fn new(answers: Vec<bool>) -> Self {
        Self {
            answers: answers.into(),
            prompts: 0,
        }
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&mut self, prompt: &RetryPrompt) -> Result<bool> {
        assert_eq!(prompt, &RetryPrompt::NO_DEVICE);
        self.prompts += 1;
        Ok(self.answers.pop_front().unwrap_or(false))
    }
}
