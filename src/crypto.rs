use blake3::Hasher;
use pqcrypto_dilithium::dilithium3::{
    self, DetachedSignature, PublicKey, SecretKey,
};
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _};

// Constants for post-quantum crypto primitives ensure type safety and clarity.
pub const DILITHIUM3_PK_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_PUBLICKEYBYTES;
pub const DILITHIUM3_SK_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_SECRETKEYBYTES;
pub const DILITHIUM3_SIG_BYTES: usize = pqcrypto_dilithium::ffi::PQCLEAN_DILITHIUM3_CLEAN_CRYPTO_BYTES;

/// Hash of a public key; what scripts and addresses commit to.
pub fn key_hash(pk: &PublicKey) -> [u8; 32] {
    key_hash_bytes(pk.as_bytes())
}

pub fn key_hash_bytes(pk_bytes: &[u8]) -> [u8; 32] {
    *Hasher::new_derive_key("roundsend-key-hash")
        .update(pk_bytes)
        .finalize()
        .as_bytes()
}

/// Hashes arbitrary data with a domain-specific key for internal consistency.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *Hasher::new_derive_key("roundsend-v1").update(data).finalize().as_bytes()
}

/// Domain-separated hash; every signed message in the crate goes through here.
pub fn tagged_hash(tag: &str, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Hasher::new_derive_key(tag);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

pub fn dilithium3_keypair() -> (PublicKey, SecretKey) {
    dilithium3::keypair()
}

pub fn sign(message: &[u8], sk: &SecretKey) -> Vec<u8> {
    dilithium3::detached_sign(message, sk).as_bytes().to_vec()
}

/// Verifies a detached signature given as raw bytes. Malformed inputs verify as false.
pub fn verify(message: &[u8], signature: &[u8], pk_bytes: &[u8]) -> bool {
    let (Ok(sig), Ok(pk)) = (
        DetachedSignature::from_bytes(signature),
        PublicKey::from_bytes(pk_bytes),
    ) else {
        return false;
    };
    dilithium3::verify_detached_signature(&sig, message, &pk).is_ok()
}
