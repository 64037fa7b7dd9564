//! deaddrop-storage: the server-side storage engine.
//!
//! A drop is a directory named by a 128-bit random identifier (32 lowercase
//! hex chars) containing exactly two files:
//!
//! ```text
//! <root>/<id>/data   AES-256-GCM payload, AAD = id bytes
//! <root>/<id>/meta   encrypted metadata envelope (per-drop HKDF subkey)
//! ```
//!
//! The [`StorageManager`] owns the encryption and receipt key material and
//! composes the lock table, quota accounting, secure deletion and the
//! expiry sweep. Its API is synchronous and blocking; embedders on a
//! cooperative runtime should call into it from a blocking worker pool.

pub mod cleanup;
pub mod locks;
pub mod manager;
pub mod metadata;
pub mod quota;
pub mod receipts;
pub mod secure_delete;
pub mod validate;

pub use cleanup::{CleanupConfig, CleanupWorker, ProtectionPredicate};
pub use manager::{DropContent, DropRecord, StorageManager};
pub use metadata::MetadataPayload;
pub use quota::{QuotaManager, QuotaStats};
pub use receipts::ReceiptAuthority;
pub use validate::validate_drop_id;

/// Payload file name inside a drop directory.
pub const DATA_FILE: &str = "data";

/// Payload file name written by pre-1.0 servers; accepted on read.
pub const LEGACY_DATA_FILE: &str = "file.enc";

/// Metadata envelope file name.
pub const META_FILE: &str = "meta";

/// Storage encryption key file under the root.
pub const ENCRYPTION_KEY_FILE: &str = ".encryption.key";

/// Receipt HMAC key file under the root.
pub const RECEIPT_KEY_FILE: &str = ".receipt.key";
