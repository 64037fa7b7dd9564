//! Stream-shaped AES-256-GCM encryption for drop payloads and metadata.
//!
//! Output format (binary): `[12-byte nonce][ciphertext][16-byte tag]`
//!
//! The caller binds each ciphertext to its semantic context via the AAD
//! (the drop identifier for payloads and metadata). The whole plaintext is
//! buffered in memory and sealed in one shot; every sensitive buffer is
//! zeroized on all exit paths, including errors.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::io::{Read, Write};
use zeroize::{Zeroize, Zeroizing};

use deaddrop_core::{DropError, DropResult};

use crate::keys::SecretKey;
use crate::NONCE_SIZE;

/// Encrypt everything from `reader` and write `nonce ‖ ciphertext ‖ tag`
/// to `writer`. A fresh random nonce is generated per call; a (key, nonce)
/// pair is never reused.
pub fn encrypt_stream(
    key: &SecretKey,
    reader: &mut impl Read,
    writer: &mut impl Write,
    aad: &[u8],
) -> DropResult<()> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut plaintext = Zeroizing::new(Vec::new());
    reader.read_to_end(&mut plaintext)?;

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad,
            },
        )
        .map_err(|_| DropError::CryptoSetup("encryption failed".into()))?;

    writer.write_all(&nonce_bytes)?;
    writer.write_all(&ciphertext)?;

    Ok(())
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` stream produced by [`encrypt_stream`]
/// and write the plaintext to `writer`.
///
/// The AAD must match the one used during encryption. A truncated input,
/// a failed tag check and corrupted ciphertext are all reported as the same
/// authentication failure.
pub fn decrypt_stream(
    key: &SecretKey,
    reader: &mut impl Read,
    writer: &mut impl Write,
    aad: &[u8],
) -> DropResult<()> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| DropError::CryptoSetup(format!("cipher init: {e}")))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    if reader.read_exact(&mut nonce_bytes).is_err() {
        return Err(DropError::AuthFailure);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = Zeroizing::new(Vec::new());
    reader.read_to_end(&mut ciphertext)?;

    let mut plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad,
            },
        )
        .map_err(|_| DropError::AuthFailure)?;

    let result = writer.write_all(&plaintext);
    plaintext.zeroize();
    result?;

    Ok(())
}
