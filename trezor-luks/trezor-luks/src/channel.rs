use std::fmt;
use std::io::{self, Write};

use device::DerivedKey;
use zeroize::Zeroizing;

/// Carries a derived key to exactly one consumer.
///
/// The bytes leave the channel once, through [`SecretChannel::take`] or
/// [`SecretChannel::deliver`]. Later calls see an empty channel.
pub struct SecretChannel {
    secret: Option<Zeroizing<Vec<u8>>>,
}

impl SecretChannel {
    pub fn new(secret: Zeroizing<Vec<u8>>) -> Self {
        Self {
            secret: Some(secret),
        }
    }

    pub fn take(&mut self) -> Option<Zeroizing<Vec<u8>>> {
        self.secret.take()
    }

    /// Write the secret into `sink` and drop it.
    ///
    /// A reader that went away before consuming everything is not an error
    /// here; the caller learns the outcome from the consumer's exit status.
    pub fn deliver(&mut self, sink: &mut impl Write) -> io::Result<()> {
        let Some(secret) = self.take() else {
            log::warn!("secret already delivered, nothing to write");
            return Ok(());
        };

        match sink.write_all(&secret).and_then(|()| sink.flush()) {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                log::debug!("reader closed its input before the key was fully written");
                Ok(())
            }
            other => other,
        }
    }
}

impl From<DerivedKey> for SecretChannel {
    fn from(key: DerivedKey) -> Self {
        Self::new(key.into_inner())
    }
}

impl fmt::Debug for SecretChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secret {
            Some(secret) => write!(f, "SecretChannel([REDACTED; {}])", secret.len()),
            None => f.write_str("SecretChannel(drained)"),
        }
    }
}
