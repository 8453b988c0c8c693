//! Trezor One backend over HID.
//!
//! Keys come from the `CipherKeyValue` operation: the volume's MK salt is
//! "decrypted" under a BIP32 node with the MK digest as IV, so the same
//! device, seed and key name always yield the same volume key.

pub mod proto;
pub mod wire;

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use zeroize::Zeroizing;

use crate::error::{DeviceError, Result};
use crate::request::{DerivationRequest, DerivedKey};
use crate::{DeviceBackend, DeviceLink};
use proto::{CipherKeyValue, Failure, Features, MessageType};
use wire::ReportIo;

pub const TREZOR_VENDOR_ID: u16 = 0x534c;
pub const TREZOR_PRODUCT_ID: u16 = 0x0001;
pub const TREZOR_INTERFACE: i32 = 0;

pub const DEFAULT_DERIVATION_PATH: &str = "m/10016'/0";
const HARDENED: u32 = 0x8000_0000;
const PING_MESSAGE: &str = "trezor-luks";

const PIN_PROMPT: &str = "Trezor PIN (positions as shown on the device)\n\
                          \x20 7 8 9\n\
                          \x20 4 5 6\n\
                          \x20 1 2 3\n\
                          PIN: ";
const PASSPHRASE_PROMPT: &str = "Trezor passphrase: ";

/// Match the fixed vendor/product/interface triple of a Trezor One.
pub fn is_trezor(vendor_id: u16, product_id: u16, interface: i32) -> bool {
    vendor_id == TREZOR_VENDOR_ID && product_id == TREZOR_PRODUCT_ID && interface == TREZOR_INTERFACE
}

/// Parse `m/10016'/0` style paths into BIP32 indices.
pub fn parse_derivation_path(path: &str) -> Result<Vec<u32>> {
    let invalid = |reason| DeviceError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let mut parts = path.trim().split('/');
    if parts.next() != Some("m") {
        return Err(invalid("path must start with \"m\""));
    }

    parts
        .map(|part| {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(digits) => (digits, true),
                None => (part, false),
            };
            let index: u32 = digits.parse().map_err(|_| invalid("index is not a number"))?;
            if index >= HARDENED {
                return Err(invalid("index out of range"));
            }
            Ok(if hardened { index | HARDENED } else { index })
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct TrezorOptions {
    pub derivation_path: Vec<u32>,
    pub ask_on_decrypt: bool,
}

impl Default for TrezorOptions {
    fn default() -> Self {
        Self {
            derivation_path: vec![10016 | HARDENED, 0],
            ask_on_decrypt: true,
        }
    }
}

/// Source of the PIN and passphrase the device may ask for.
pub trait PinEntry {
    fn pin(&mut self) -> Result<Zeroizing<String>>;
    fn passphrase(&mut self) -> Result<Zeroizing<String>>;
}

/// Reads the PIN and passphrase from the controlling terminal without echo.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPinEntry;

impl PinEntry for TerminalPinEntry {
    fn pin(&mut self) -> Result<Zeroizing<String>> {
        rpassword::prompt_password(PIN_PROMPT)
            .map(Zeroizing::new)
            .map_err(|err| DeviceError::Prompt(format!("failed to read PIN: {err}")))
    }

    fn passphrase(&mut self) -> Result<Zeroizing<String>> {
        rpassword::prompt_password(PASSPHRASE_PROMPT)
            .map(Zeroizing::new)
            .map_err(|err| DeviceError::Prompt(format!("failed to read passphrase: {err}")))
    }
}

#[derive(Debug, Clone)]
pub struct TrezorHandle {
    path: CString,
}

/// HID enumeration of Trezor One devices.
pub struct TrezorBackend {
    api: HidApi,
    options: TrezorOptions,
}

impl TrezorBackend {
    pub fn new(options: TrezorOptions) -> Result<Self> {
        let api = HidApi::new()
            .map_err(|err| DeviceError::Transport(format!("failed to initialise HID: {err}")))?;
        Ok(Self { api, options })
    }
}

impl DeviceBackend for TrezorBackend {
    type Handle = TrezorHandle;
    type Link = TrezorLink<HidDevice, TerminalPinEntry>;

    fn discover(&mut self) -> Result<Vec<TrezorHandle>> {
        self.api
            .refresh_devices()
            .map_err(|err| DeviceError::Transport(format!("failed to enumerate HID devices: {err}")))?;

        let handles: Vec<TrezorHandle> = self
            .api
            .device_list()
            .filter(|info| is_trezor(info.vendor_id(), info.product_id(), info.interface_number()))
            .map(|info| TrezorHandle {
                path: info.path().to_owned(),
            })
            .collect();
        log::debug!("found {} Trezor device(s)", handles.len());
        Ok(handles)
    }

    fn connect(&mut self, handle: TrezorHandle) -> Result<Self::Link> {
        let device = self.api.open_path(&handle.path).map_err(|err| {
            DeviceError::Transport(format!("failed to open {:?}: {err}", handle.path))
        })?;
        let mut link = TrezorLink::new(device, TerminalPinEntry, self.options.clone());
        link.initialize()?;
        Ok(link)
    }
}

/// An open session with one Trezor.
pub struct TrezorLink<R, P> {
    io: R,
    pin_entry: P,
    options: TrezorOptions,
}

impl<R, P> TrezorLink<R, P>
where
    R: ReportIo,
    P: PinEntry,
{
    pub fn new(io: R, pin_entry: P, options: TrezorOptions) -> Self {
        Self {
            io,
            pin_entry,
            options,
        }
    }

    /// Reset the device's session state and log what answered.
    pub fn initialize(&mut self) -> Result<()> {
        let (kind, payload) = self.call(MessageType::Initialize, &[])?;
        match kind {
            MessageType::Features => {
                let features = Features::decode(&payload)?;
                log::info!(
                    "connected to {} {}.{}.{}{}",
                    features.vendor.as_deref().unwrap_or("Trezor"),
                    features.major_version.unwrap_or_default(),
                    features.minor_version.unwrap_or_default(),
                    features.patch_version.unwrap_or_default(),
                    features
                        .label
                        .map(|label| format!(" ({label})"))
                        .unwrap_or_default(),
                );
                Ok(())
            }
            MessageType::Failure => Err(Failure::decode(&payload)?.into_error()),
            other => Err(unexpected(other, "Initialize")),
        }
    }

    fn call(&mut self, kind: MessageType, payload: &[u8]) -> Result<(MessageType, Zeroizing<Vec<u8>>)> {
        wire::write_message(&mut self.io, kind as u16, payload)?;
        let (raw_kind, response) = wire::read_message(&mut self.io)?;
        Ok((MessageType::try_from(raw_kind)?, response))
    }
}

fn unexpected(kind: MessageType, request: &str) -> DeviceError {
    DeviceError::Protocol(format!("unexpected {kind:?} in reply to {request}"))
}

impl<R, P> DeviceLink for TrezorLink<R, P>
where
    R: ReportIo,
    P: PinEntry,
{
    fn ping(&mut self) -> bool {
        let payload = proto::encode_ping(PING_MESSAGE);
        match self.call(MessageType::Ping, &payload) {
            Ok((MessageType::Success, reply)) => match proto::decode_success_message(&reply) {
                Ok(Some(echo)) if echo == PING_MESSAGE => true,
                Ok(echo) => {
                    log::warn!("ping answered with {echo:?}");
                    false
                }
                Err(err) => {
                    log::warn!("malformed ping reply: {err}");
                    false
                }
            },
            Ok((other, _)) => {
                log::warn!("{}", unexpected(other, "Ping"));
                false
            }
            Err(err) => {
                log::warn!("ping failed: {err}");
                false
            }
        }
    }

    fn derive_key(&mut self, request: &DerivationRequest) -> Result<DerivedKey> {
        let message = CipherKeyValue {
            address_n: &self.options.derivation_path,
            key: &request.key_name,
            value: &request.initial_key_value,
            encrypt: false,
            ask_on_encrypt: true,
            ask_on_decrypt: self.options.ask_on_decrypt,
            iv: &request.iv,
        };
        let payload = message.encode();
        let mut reply = self.call(MessageType::CipherKeyValue, &payload)?;

        loop {
            reply = match reply {
                (MessageType::CipheredKeyValue, payload) => {
                    let value = proto::decode_ciphered_value(&payload)?;
                    if value.is_empty() {
                        return Err(DeviceError::Protocol("device returned an empty key".into()));
                    }
                    return Ok(DerivedKey::new(value));
                }
                (MessageType::ButtonRequest, _) => {
                    log::info!("please confirm the operation on the Trezor device");
                    self.call(MessageType::ButtonAck, &[])?
                }
                (MessageType::PinMatrixRequest, _) => {
                    let pin = self.pin_entry.pin()?;
                    let ack = proto::encode_pin_matrix_ack(&pin);
                    self.call(MessageType::PinMatrixAck, &ack)?
                }
                (MessageType::PassphraseRequest, _) => {
                    let passphrase = self.pin_entry.passphrase()?;
                    let ack = proto::encode_passphrase_ack(&passphrase);
                    self.call(MessageType::PassphraseAck, &ack)?
                }
                (MessageType::Failure, payload) => {
                    return Err(Failure::decode(&payload)?.into_error());
                }
                (other, _) => return Err(unexpected(other, "CipherKeyValue")),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::proto::{Decoder, Encoder, FieldValue};
    use super::wire::memory::MemoryReports;
    use super::*;

    #[derive(Default)]
    struct ScriptedPins {
        pin_prompts: usize,
        passphrase_prompts: usize,
    }

    impl PinEntry for ScriptedPins {
        fn pin(&mut self) -> Result<Zeroizing<String>> {
            self.pin_prompts += 1;
            Ok(Zeroizing::new("1357".to_string()))
        }

        fn passphrase(&mut self) -> Result<Zeroizing<String>> {
            self.passphrase_prompts += 1;
            Ok(Zeroizing::new("hunter2".to_string()))
        }
    }

    fn link(io: MemoryReports) -> TrezorLink<MemoryReports, ScriptedPins> {
        TrezorLink::new(io, ScriptedPins::default(), TrezorOptions::default())
    }

    fn ciphered(value: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.bytes(1, value);
        enc.finish()
    }

    fn request() -> DerivationRequest {
        DerivationRequest::new(&[0x10; 20], vec![0x20; 32], "luks")
    }

    #[test]
    fn matches_only_the_trezor_one_triple() {
        assert!(is_trezor(0x534c, 0x0001, 0));
        assert!(!is_trezor(0x534c, 0x0001, 1));
        assert!(!is_trezor(0x1209, 0x53c1, 0));
    }

    #[test]
    fn parses_derivation_paths() {
        assert_eq!(
            parse_derivation_path("m/10016'/0").expect("path"),
            vec![10016 | HARDENED, 0]
        );
        assert_eq!(parse_derivation_path("m/44h/1/2'").expect("path"), vec![44 | HARDENED, 1, 2 | HARDENED]);
        assert_eq!(parse_derivation_path("m").expect("path"), Vec::<u32>::new());
        assert!(parse_derivation_path("10016'/0").is_err());
        assert!(parse_derivation_path("m/abc").is_err());
        assert!(parse_derivation_path("m/2147483648").is_err());
    }

    #[test]
    fn derive_key_sends_cipher_key_value() {
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::CipheredKeyValue as u16, &ciphered(&[0x5a; 32]));
        let mut link = link(io);

        let key = link.derive_key(&request()).expect("derive");
        assert_eq!(key.as_bytes(), &[0x5a; 32]);

        let sent = link.io.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MessageType::CipherKeyValue as u16);
        let fields: Vec<_> = Decoder::new(&sent[0].1).collect::<Result<_>>().expect("fields");
        assert!(fields.contains(&(2, FieldValue::Bytes(b"luks"))));
        assert!(fields.contains(&(3, FieldValue::Bytes(&[0x20; 32]))));
        assert!(fields.contains(&(4, FieldValue::Varint(0))));
        assert!(fields.contains(&(7, FieldValue::Bytes(&[0x10; 16]))));
    }

    #[test]
    fn derive_key_walks_button_pin_and_passphrase_requests() {
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::PinMatrixRequest as u16, &[]);
        io.queue_message(MessageType::PassphraseRequest as u16, &[]);
        io.queue_message(MessageType::ButtonRequest as u16, &[]);
        io.queue_message(MessageType::CipheredKeyValue as u16, &ciphered(&[7; 32]));
        let mut link = link(io);

        let key = link.derive_key(&request()).expect("derive");
        assert_eq!(key.len(), 32);
        assert_eq!(link.pin_entry.pin_prompts, 1);
        assert_eq!(link.pin_entry.passphrase_prompts, 1);

        let sent = link.io.sent_messages();
        let kinds: Vec<u16> = sent.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::CipherKeyValue as u16,
                MessageType::PinMatrixAck as u16,
                MessageType::PassphraseAck as u16,
                MessageType::ButtonAck as u16,
            ]
        );
        let pin_ack = &sent[1].1;
        assert_eq!(
            Decoder::new(pin_ack).next().expect("field").expect("decode"),
            (1, FieldValue::Bytes(b"1357"))
        );
    }

    #[test]
    fn declined_on_device_is_user_aborted() {
        let mut failure = Encoder::new();
        failure.uint32(1, 4).string(2, "Action cancelled by user");
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::ButtonRequest as u16, &[]);
        io.queue_message(MessageType::Failure as u16, &failure.finish());
        let mut link = link(io);

        let err = link.derive_key(&request()).unwrap_err();
        assert!(matches!(err, DeviceError::UserAborted(_)));
    }

    #[test]
    fn unexpected_or_missing_reply_is_a_protocol_error() {
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::Features as u16, &[]);
        let err = link(io).derive_key(&request()).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));

        let mut io = MemoryReports::default();
        io.queue_message(MessageType::CipheredKeyValue as u16, &ciphered(&[]));
        let err = link(io).derive_key(&request()).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));

        let mut io = MemoryReports::default();
        io.queue_message(999, &[]);
        let err = link(io).derive_key(&request()).unwrap_err();
        assert!(matches!(err, DeviceError::Protocol(_)));
    }

    #[test]
    fn ping_expects_the_echo() {
        let mut success = Encoder::new();
        success.string(1, PING_MESSAGE);
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::Success as u16, &success.finish());
        assert!(link(io).ping());

        let mut wrong = Encoder::new();
        wrong.string(1, "something else");
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::Success as u16, &wrong.finish());
        assert!(!link(io).ping());

        assert!(!link(MemoryReports::default()).ping());
    }

    #[test]
    fn initialize_reads_features() {
        let mut features = Encoder::new();
        features.string(1, "trezor.io").uint32(2, 1).uint32(3, 12).uint32(4, 1);
        let mut io = MemoryReports::default();
        io.queue_message(MessageType::Features as u16, &features.finish());
        let mut link = link(io);

        link.initialize().expect("initialize");
        assert_eq!(link.io.sent_messages(), vec![(MessageType::Initialize as u16, Vec::new())]);
    }
}
