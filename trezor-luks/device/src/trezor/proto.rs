//! The handful of Trezor protobuf messages the key exchange needs, with a
//! minimal proto2 wire codec (varint and length-delimited fields only).

use zeroize::Zeroizing;

use crate::error::{DeviceError, Result};

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    Initialize = 0,
    Ping = 1,
    Success = 2,
    Failure = 3,
    Features = 17,
    PinMatrixRequest = 18,
    PinMatrixAck = 19,
    CipherKeyValue = 23,
    ButtonRequest = 26,
    ButtonAck = 27,
    PassphraseRequest = 41,
    PassphraseAck = 42,
    CipheredKeyValue = 48,
}

impl TryFrom<u16> for MessageType {
    type Error = DeviceError;

    fn try_from(value: u16) -> Result<Self> {
        let kind = match value {
            0 => MessageType::Initialize,
            1 => MessageType::Ping,
            2 => MessageType::Success,
            3 => MessageType::Failure,
            17 => MessageType::Features,
            18 => MessageType::PinMatrixRequest,
            19 => MessageType::PinMatrixAck,
            23 => MessageType::CipherKeyValue,
            26 => MessageType::ButtonRequest,
            27 => MessageType::ButtonAck,
            41 => MessageType::PassphraseRequest,
            42 => MessageType::PassphraseAck,
            48 => MessageType::CipheredKeyValue,
            other => {
                return Err(DeviceError::Protocol(format!(
                    "unsupported message type {other}"
                )));
            }
        };
        Ok(kind)
    }
}

/// Failure codes that mean the human said no.
const FAILURE_ACTION_CANCELLED: u64 = 4;
const FAILURE_PIN_CANCELLED: u64 = 6;
const FAILURE_PIN_INVALID: u64 = 7;

#[derive(Default)]
pub struct Encoder {
    buf: Zeroizing<Vec<u8>>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uint32(&mut self, field: u32, value: u32) -> &mut Self {
        self.key(field, WIRE_VARINT);
        self.varint(u64::from(value));
        self
    }

    pub fn bool(&mut self, field: u32, value: bool) -> &mut Self {
        self.key(field, WIRE_VARINT);
        self.varint(u64::from(value));
        self
    }

    pub fn bytes(&mut self, field: u32, value: &[u8]) -> &mut Self {
        self.key(field, WIRE_LEN);
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn string(&mut self, field: u32, value: &str) -> &mut Self {
        self.bytes(field, value.as_bytes())
    }

    pub fn finish(self) -> Zeroizing<Vec<u8>> {
        self.buf
    }

    fn key(&mut self, field: u32, wire_type: u64) {
        self.varint((u64::from(field) << 3) | wire_type);
    }

    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    Fixed(u64),
}

/// Iterates `(field number, value)` pairs of an encoded message.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn varint(&mut self) -> Result<u64> {
        let data = self.data;
        let mut value = 0u64;
        for (i, byte) in data.iter().enumerate().take(10) {
            value |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                self.data = &data[i + 1..];
                return Ok(value);
            }
        }
        Err(DeviceError::Protocol("truncated varint".into()))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.data.len() < len {
            return Err(DeviceError::Protocol("truncated field".into()));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn field(&mut self) -> Result<(u32, FieldValue<'a>)> {
        let key = self.varint()?;
        let field = u32::try_from(key >> 3)
            .map_err(|_| DeviceError::Protocol("field number out of range".into()))?;
        let value = match key & 0x7 {
            WIRE_VARINT => FieldValue::Varint(self.varint()?),
            WIRE_LEN => {
                let len = usize::try_from(self.varint()?)
                    .map_err(|_| DeviceError::Protocol("field length out of range".into()))?;
                FieldValue::Bytes(self.take(len)?)
            }
            WIRE_FIXED64 => {
                let raw = self.take(8)?;
                FieldValue::Fixed(u64::from_le_bytes(raw.try_into().unwrap_or([0; 8])))
            }
            WIRE_FIXED32 => {
                let raw = self.take(4)?;
                FieldValue::Fixed(u64::from(u32::from_le_bytes(raw.try_into().unwrap_or([0; 4]))))
            }
            other => {
                return Err(DeviceError::Protocol(format!("unsupported wire type {other}")));
            }
        };
        Ok((field, value))
    }
}

impl<'a> Iterator for Decoder<'a> {
    type Item = Result<(u32, FieldValue<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        let item = self.field();
        if item.is_err() {
            self.data = &[];
        }
        Some(item)
    }
}

fn string_field(value: FieldValue<'_>) -> Option<String> {
    match value {
        FieldValue::Bytes(raw) => Some(String::from_utf8_lossy(raw).into_owned()),
        _ => None,
    }
}

fn uint_field(value: FieldValue<'_>) -> Option<u64> {
    match value {
        FieldValue::Varint(v) => Some(v),
        _ => None,
    }
}

pub fn encode_ping(message: &str) -> Zeroizing<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.string(1, message).bool(2, false);
    enc.finish()
}

pub fn encode_pin_matrix_ack(pin: &str) -> Zeroizing<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.string(1, pin);
    enc.finish()
}

pub fn encode_passphrase_ack(passphrase: &str) -> Zeroizing<Vec<u8>> {
    let mut enc = Encoder::new();
    enc.string(1, passphrase);
    enc.finish()
}

/// `CipherKeyValue` request.
pub struct CipherKeyValue<'a> {
    pub address_n: &'a [u32],
    pub key: &'a str,
    pub value: &'a [u8],
    pub encrypt: bool,
    pub ask_on_encrypt: bool,
    pub ask_on_decrypt: bool,
    pub iv: &'a [u8],
}

impl CipherKeyValue<'_> {
    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut enc = Encoder::new();
        for index in self.address_n {
            enc.uint32(1, *index);
        }
        enc.string(2, self.key)
            .bytes(3, self.value)
            .bool(4, self.encrypt)
            .bool(5, self.ask_on_encrypt)
            .bool(6, self.ask_on_decrypt);
        if !self.iv.is_empty() {
            enc.bytes(7, self.iv);
        }
        enc.finish()
    }
}

/// Extract `CipheredKeyValue.value`.
pub fn decode_ciphered_value(payload: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    for field in Decoder::new(payload) {
        if let (1, FieldValue::Bytes(value)) = field? {
            return Ok(Zeroizing::new(value.to_vec()));
        }
    }
    Err(DeviceError::Protocol("CipheredKeyValue carries no value".into()))
}

pub fn decode_success_message(payload: &[u8]) -> Result<Option<String>> {
    for field in Decoder::new(payload) {
        let (number, value) = field?;
        if number == 1 {
            return Ok(string_field(value));
        }
    }
    Ok(None)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Failure {
    pub code: Option<u64>,
    pub message: Option<String>,
}

impl Failure {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut failure = Failure::default();
        for field in Decoder::new(payload) {
            match field? {
                (1, value) => failure.code = uint_field(value),
                (2, value) => failure.message = string_field(value),
                _ => {}
            }
        }
        Ok(failure)
    }

    pub fn into_error(self) -> DeviceError {
        let message = self
            .message
            .unwrap_or_else(|| "no failure message".to_string());
        match self.code {
            Some(FAILURE_ACTION_CANCELLED | FAILURE_PIN_CANCELLED | FAILURE_PIN_INVALID) => {
                DeviceError::UserAborted(message)
            }
            Some(code) => DeviceError::Protocol(format!("device failure {code}: {message}")),
            None => DeviceError::Protocol(format!("device failure: {message}")),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Features {
    pub vendor: Option<String>,
    pub major_version: Option<u64>,
    pub minor_version: Option<u64>,
    pub patch_version: Option<u64>,
    pub label: Option<String>,
}

impl Features {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut features = Features::default();
        for field in Decoder::new(payload) {
            match field? {
                (1, value) => features.vendor = string_field(value),
                (2, value) => features.major_version = uint_field(value),
                (3, value) => features.minor_version = uint_field(value),
                (4, value) => features.patch_version = uint_field(value),
                (10, value) => features.label = string_field(value),
                _ => {}
            }
        }
        Ok(features)
    }
}
