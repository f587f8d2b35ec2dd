//! Symmetric cryptography for the session protocol: AES in CFB mode with a
//! fresh IV per message, laid out on the wire as `IV || ciphertext`.
//!
//! This intentionally does not authenticate the ciphertext (no MAC, no AEAD
//! tag) — the wire protocol this crate speaks predates AEAD and a peer that
//! tampers with a frame is simply caught downstream by the tag/frame parser
//! producing garbage. Callers must not treat `decrypt` as tamper-evident.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use cfb_mode::{Decryptor, Encryptor};
use rand::RngCore;

/// AES-128 key size in bytes (spec's "default keylength").
pub const KEY_SIZE: usize = 16;
/// AES block size, also the CFB IV size.
pub const IV_SIZE: usize = 16;
/// Size of the random authentication challenge exchanged during handshake.
pub const CHALLENGE_SIZE: usize = 16;

type Aes128CfbEnc = Encryptor<Aes128>;
type Aes128CfbDec = Decryptor<Aes128>;

#[derive(Debug)]
pub struct CryptoError;

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ciphertext shorter than iv size")
    }
}

impl std::error::Error for CryptoError {}

/// Fills `out` with cryptographically secure random bytes.
pub fn random_bytes(out: &mut [u8]) {
    rand::rngs::OsRng.fill_bytes(out);
}

/// Encrypts `plaintext` under `key` with a freshly drawn IV, returning
/// `iv || ciphertext`.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    random_bytes(&mut iv);

    let mut out = Vec::with_capacity(IV_SIZE + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);

    Aes128CfbEnc::new(key.into(), (&iv).into()).encrypt(&mut out[IV_SIZE..]);
    out
}

/// Decrypts a `iv || ciphertext` blob produced by [`encrypt`], returning the
/// recovered plaintext.
pub fn decrypt(key: &[u8; KEY_SIZE], framed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if framed.len() < IV_SIZE {
        return Err(CryptoError);
    }
    let (iv, ciphertext) = framed.split_at(IV_SIZE);
    let mut out = ciphertext.to_vec();
    Aes128CfbDec::new(key.into(), iv.into()).decrypt(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrips() {
        let key = [7u8; KEY_SIZE];
        let plaintext = b"drone sighting payload";
        let framed = encrypt(&key, plaintext);
        assert_eq!(framed.len(), IV_SIZE + plaintext.len());
        let recovered = decrypt(&key, &framed).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn fresh_iv_each_call() {
        let key = [1u8; KEY_SIZE];
        let a = encrypt(&key, b"same message");
        let b = encrypt(&key, b"same message");
        assert_ne!(&a[..IV_SIZE], &b[..IV_SIZE], "iv must differ between calls");
        assert_ne!(a, b, "ciphertext should differ with differing ivs");
    }

    #[test]
    fn decrypt_rejects_short_input() {
        let key = [1u8; KEY_SIZE];
        assert!(decrypt(&key, &[0u8; 4]).is_err());
    }
}
