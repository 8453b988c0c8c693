use std::fmt;

use zeroize::Zeroizing;

/// Longest IV taken from the header digest.
pub const IV_LEN: usize = 16;

/// Inputs sent to the device to obtain a volume key.
///
/// - `initial_key_value`: the volume's MK salt, unmodified
/// - `iv`: the first 16 bytes of the MK digest, or the whole digest when it
///   is shorter. Short digests are passed through without padding; the
///   device decides what to do with a short IV.
/// - `key_name`: label mixed in by the device
pub struct DerivationRequest {
    pub initial_key_value: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
    pub key_name: String,
}

impl DerivationRequest {
    pub fn new(digest: &[u8], salt: Vec<u8>, key_name: &str) -> Self {
        let iv_len = digest.len().min(IV_LEN);
        Self {
            initial_key_value: Zeroizing::new(salt),
            iv: Zeroizing::new(digest[..iv_len].to_vec()),
            key_name: key_name.to_string(),
        }
    }
}

impl fmt::Debug for DerivationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivationRequest")
            .field("initial_key_value", &format_args!("{} bytes", self.initial_key_value.len()))
            .field("iv", &format_args!("{} bytes", self.iv.len()))
            .field("key_name", &self.key_name)
            .finish()
    }
}

/// Key material returned by the device. Zeroized on drop, never printed.
pub struct DerivedKey(Zeroizing<Vec<u8>>);

impl DerivedKey {
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Zeroizing<Vec<u8>> {
        self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED; {}])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_digest_is_truncated_to_iv_len() {
        let digest: Vec<u8> = (0u8..20).collect();
        let request = DerivationRequest::new(&digest, vec![0xaa; 32], "luks");
        assert_eq!(request.iv.as_slice(), (0u8..16).collect::<Vec<_>>().as_slice());
        assert_eq!(request.initial_key_value.as_slice(), &[0xaa; 32]);
        assert_eq!(request.key_name, "luks");
    }

    #[test]
    fn short_digest_is_passed_through_unpadded() {
        let request = DerivationRequest::new(&[0xaa, 0xbb], vec![1, 2, 3, 4], "luks");
        assert_eq!(request.iv.as_slice(), &[0xaa, 0xbb]);
        assert_eq!(request.initial_key_value.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn inputs_live_in_zeroizing_buffers() {
        fn wiped_on_drop(buffer: &Zeroizing<Vec<u8>>) -> usize {
            buffer.len()
        }
        let request = DerivationRequest::new(&[1; 20], vec![2; 32], "luks");
        assert_eq!(wiped_on_drop(&request.iv), IV_LEN);
        assert_eq!(wiped_on_drop(&request.initial_key_value), 32);
    }

    #[test]
    fn exact_length_digest_is_used_whole() {
        let digest = [7u8; IV_LEN];
        let request = DerivationRequest::new(&digest, vec![1; 32], "root");
        assert_eq!(request.iv.as_slice(), &digest[..]);
    }

    #[test]
    fn debug_output_hides_key_material() {
        let key = DerivedKey::new(Zeroizing::new(vec![0x42; 32]));
        let shown = format!("{key:?}");
        assert_eq!(shown, "DerivedKey([REDACTED; 32])");

        let request = DerivationRequest::new(&[0x42; 20], vec![0x42; 32], "luks");
        let shown = format!("{request:?}");
        assert!(shown.contains("32 bytes"));
        assert!(!shown.contains("42"));
    }
}
