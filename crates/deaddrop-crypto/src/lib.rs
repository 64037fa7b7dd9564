//! deaddrop-crypto: server-side cryptographic envelope for the dead-drop store
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, Argon2id from passphrase + .master.salt)
//!   ├── Storage Encryption Key (256-bit random, wrapped by master key,
//!   │   AAD = "encryption-key")
//!   │   ├── Payload AEAD: AES-256-GCM (nonce=random 96-bit, AAD=drop id)
//!   │   └── Per-drop metadata subkeys (HKDF, derived in the storage layer)
//!   └── Receipt Key (256-bit random, wrapped by master key,
//!       AAD = "receipt-key")
//! ```
//!
//! Without a master passphrase the storage and receipt keys are stored as
//! plaintext 32-byte files; the first start that supplies a passphrase
//! migrates them to the wrapped format in place.

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt_stream, encrypt_stream};
pub use kdf::{derive_master_key, load_or_create_salt, KdfParams, MasterKey};
pub use keys::{
    load_or_generate_key, unwrap_key, wrap_key, SecretKey, PURPOSE_ENCRYPTION, PURPOSE_RECEIPT,
};

/// Size of a key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped key blob: nonce(12) + ciphertext(32) + tag(16)
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// Size of the master salt
pub const SALT_SIZE: usize = 16;
