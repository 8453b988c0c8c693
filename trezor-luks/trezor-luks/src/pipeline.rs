//! Dump header, derive key on the device, hand the key to cryptsetup.

use device::{DerivationRequest, DerivedKey, KeySource};

use crate::config::Config;
use crate::cryptsetup::{EncryptionTool, Stdin, Step};
use crate::error::PipelineError;
use crate::header;
use crate::operation::{VolumeOperation, VolumeOperationKind};

const KEY_FILE_FLAG: &str = "--key-file";
const KEY_FROM_STDIN: &str = "-";

pub struct Pipeline<T, K> {
    config: Config,
    tool: T,
    keys: K,
}

impl<T, K> Pipeline<T, K>
where
    T: EncryptionTool,
    K: KeySource,
{
    pub fn new(config: Config, tool: T, keys: K) -> Self {
        Self { config, tool, keys }
    }

    pub fn run(&mut self, operation: &VolumeOperation) -> Result<(), PipelineError> {
        log::debug!("{} on {}", operation.kind, operation.device_path);
        match operation.kind {
            VolumeOperationKind::Format => self.format(operation),
            VolumeOperationKind::Open
            | VolumeOperationKind::Resume
            | VolumeOperationKind::AddKey
            | VolumeOperationKind::ChangeKey => self.unlock(operation),
        }
    }

    fn derive(&mut self, device_path: &str) -> Result<DerivedKey, PipelineError> {
        log::info!("Getting the master key metadata");
        let dump = self.tool.dump(device_path)?;
        let fields = header::extract(&dump)?;

        log::info!("Generating an initial key and an IV");
        let request = DerivationRequest::new(&fields.digest, fields.salt, &self.config.key_name);
        log::debug!("{request:?}");

        log::info!(
            "Sent a request to the Trezor device (please confirm the operation if required)"
        );
        Ok(self.keys.derive_key(&request)?)
    }

    /// Every operation other than format reads the derived key on stdin.
    fn unlock(&mut self, operation: &VolumeOperation) -> Result<(), PipelineError> {
        let key = self.derive(&operation.device_path)?;
        let args = with_key_file(KEY_FROM_STDIN, &operation.args);
        self.tool.run(Step::Unlock, &args, Stdin::Secret(key.into()))?;
        Ok(())
    }

    /// luksFormat needs a key before the header (and so the derivation
    /// inputs) exist. Format with the bootstrap key file, enroll the
    /// derived key, then remove the bootstrap key again.
    fn format(&mut self, operation: &VolumeOperation) -> Result<(), PipelineError> {
        let bootstrap = self.config.bootstrap_key_file.to_string_lossy().into_owned();
        let device_path = operation.device_path.as_str();

        self.tool.run(
            Step::Bootstrap,
            &with_key_file(&bootstrap, &operation.args),
            Stdin::Inherit,
        )?;

        let enrolled = self.enroll(&bootstrap, device_path);

        // the bootstrap key is public knowledge, it goes whatever happened above
        let removal = vec![
            KEY_FILE_FLAG.to_string(),
            bootstrap.clone(),
            "luksRemoveKey".to_string(),
            device_path.to_string(),
        ];
        let removed = self.tool.run(Step::RemoveBootstrap, &removal, Stdin::Inherit);

        match (enrolled, removed) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(cleanup)) => {
                log_leftover_key(device_path, &bootstrap);
                Err(cleanup.into())
            }
            (Err(enroll), Ok(())) => {
                log::warn!("temporary key removed but no device key was enrolled on {device_path}");
                Err(enroll)
            }
            (Err(enroll), Err(cleanup)) => {
                log_leftover_key(device_path, &bootstrap);
                Err(PipelineError::Enrollment {
                    enroll: Box::new(enroll),
                    cleanup,
                })
            }
        }
    }

    fn enroll(&mut self, bootstrap: &str, device_path: &str) -> Result<(), PipelineError> {
        let key = self.derive(device_path)?;
        let args = vec![
            KEY_FILE_FLAG.to_string(),
            bootstrap.to_string(),
            "luksAddKey".to_string(),
            device_path.to_string(),
            KEY_FROM_STDIN.to_string(),
        ];
        self.tool.run(Step::Enroll, &args, Stdin::Secret(key.into()))?;
        Ok(())
    }
}

fn log_leftover_key(device_path: &str, key_file: &str) {
    log::error!(
        "{device_path} still opens with the contents of {key_file}, remove that key slot by hand"
    );
}

fn with_key_file(key_file: &str, args: &[String]) -> Vec<String> {
    [KEY_FILE_FLAG, key_file]
        .into_iter()
        .map(String::from)
        .chain(args.iter().cloned())
        .collect()
}
