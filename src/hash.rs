//! Content hashing for ledger cross-checks.
//!
//! The ledger only stores hashes of the human-readable fields (asset tag,
//! location, image URI); these helpers recompute the expected hash from
//! cleartext so reads can verify what the ledger holds.

use sha2::{Digest, Sha256};

/// Hash a string to its on-ledger representation (`0x`-prefixed hex).
pub fn hash_string(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Hash an asset tag for the ledger-side tag index.
pub fn hash_asset_tag(asset_tag: &str) -> String {
    hash_string(asset_tag)
}

/// Hash a location string; locations are stored hashed for privacy.
pub fn hash_ubicacion(ubicacion: &str) -> String {
    hash_string(ubicacion)
}

/// Hash an image URI for content verification.
pub fn hash_image_uri(image_uri: &str) -> String {
    hash_string(image_uri)
}

/// Check a cleartext value against an on-ledger hash (case-insensitive hex).
pub fn verify_hash(value: &str, expected: &str) -> bool {
    hash_string(value).eq_ignore_ascii_case(expected)
}
