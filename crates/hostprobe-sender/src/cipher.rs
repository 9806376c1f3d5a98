use crate::error::{Result, SendError};
use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

pub const KEY_LEN: usize = 32;

/// AES-256-GCM sealing of serialized payloads.
///
/// Every call draws a fresh random 96-bit nonce. The encoded output is
/// base64 of `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub struct PayloadCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    pub fn new(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_LEN {
            return Err(SendError::InvalidKey(key_bytes.len()));
        }
        let unbound = UnboundKey::new(&AES_256_GCM, key_bytes)
            .map_err(|_| SendError::InvalidKey(key_bytes.len()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| SendError::Encryption("failed to generate nonce".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SendError::Encryption("seal failed".to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(general_purpose::STANDARD.encode(sealed))
    }

    pub fn open(&self, encoded: &str) -> Result<Vec<u8>> {
        let data = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| SendError::Encryption(format!("invalid base64: {e}")))?;
        if data.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(SendError::Encryption("sealed data too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
            .map_err(|_| SendError::Encryption("invalid nonce".to_string()))?;

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SendError::Encryption("decryption failed".to_string()))?;
        Ok(plaintext.to_vec())
    }
}
