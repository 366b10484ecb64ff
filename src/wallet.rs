use crate::{
    address::{self, KeyHash, OffchainAddress, OutputScript},
    config::{self, Config, NetworkParams},
    crypto::{self, DILITHIUM3_PK_BYTES},
};
use pqcrypto_dilithium::dilithium3::{PublicKey, SecretKey};
use anyhow::{Result, Context, anyhow, bail};
use pqcrypto_traits::sign::{PublicKey as _, SecretKey as _};
use argon2::{Argon2, Params};
use chacha20poly1305::{aead::{Aead, NewAead}, XChaCha20Poly1305, Key, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_FILE_VERSION: u8 = 1;

/// Argon2id cost used to derive the key-file encryption key.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    pub mem_kib: u32,
    pub time_cost: u32,
}

impl From<&config::Wallet> for KdfParams {
    fn from(cfg: &config::Wallet) -> Self {
        KdfParams { mem_kib: cfg.kdf_mem_kib, time_cost: cfg.kdf_time_cost }
    }
}

/// Obtain the key-file pass-phrase.
/// Source order:
///   1) WALLET_PASSPHRASE env var
///   2) Interactive prompt when stdin is a terminal
/// Non-interactive without env returns an error.
pub fn obtain_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(p) = std::env::var("WALLET_PASSPHRASE") {
        return Ok(Zeroizing::new(p));
    }
    if atty::is(atty::Stream::Stdin) {
        let pw = rpassword::prompt_password(prompt)
            .context("Failed to read pass-phrase")?;
        return Ok(Zeroizing::new(pw));
    }
    bail!("WALLET_PASSPHRASE is required in non-interactive mode")
}

fn derive_key(passphrase: &str, salt: &[u8], kdf: KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    let params = Params::new(kdf.mem_kib, kdf.time_cost, 1, None)
        .map_err(|e| anyhow!("Invalid Argon2id params: {}", e))?;
    Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| anyhow!("Argon2id key derivation failed: {}", e))?;
    Ok(key)
}

/// The sending wallet: a Dilithium3 key pair bound to one coordinator.
///
/// Every address the wallet uses is derived from the key hash: the onchain
/// change script, the delayed scripts of unilateral exits and the offchain
/// address issued under the connected coordinator.
pub struct Wallet {
    pk: PublicKey,
    sk: SecretKey,
    key_hash: KeyHash,
    coordinator: KeyHash,
}

impl Wallet {
    /// Fresh in-memory key pair.
    pub fn generate(coordinator: KeyHash) -> Self {
        let (pk, sk) = crypto::dilithium3_keypair();
        Self::from_keys(pk, sk, coordinator)
    }

    fn from_keys(pk: PublicKey, sk: SecretKey, coordinator: KeyHash) -> Self {
        let key_hash = crypto::key_hash(&pk);
        Wallet { pk, sk, key_hash, coordinator }
    }

    /// Writes this wallet's key pair to `path`, the secret key encrypted
    /// under `passphrase`.
    ///
    /// Layout: `pk || version || salt || nonce || ciphertext(sk)`.
    pub fn save<P: AsRef<Path>>(&self, path: P, passphrase: &str, kdf: KdfParams) -> Result<()> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let key = derive_key(passphrase, &salt, kdf)?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), self.sk.as_bytes())
            .map_err(|e| anyhow!("Failed to encrypt secret key: {}", e))?;

        let mut encoded = Vec::with_capacity(DILITHIUM3_PK_BYTES + 1 + SALT_LEN + NONCE_LEN + ciphertext.len());
        encoded.extend_from_slice(self.pk.as_bytes());
        encoded.push(KEY_FILE_VERSION);
        encoded.extend_from_slice(&salt);
        encoded.extend_from_slice(&nonce);
        encoded.extend_from_slice(&ciphertext);

        fs::write(path.as_ref(), &encoded)
            .with_context(|| format!("couldn't write key file {}", path.as_ref().display()))?;
        log::info!("✅ Key file written to {}", path.as_ref().display());
        Ok(())
    }

    /// Reads and decrypts a key file written by [`Wallet::save`].
    pub fn unlock<P: AsRef<Path>>(path: P, passphrase: &str, kdf: KdfParams, coordinator: KeyHash) -> Result<Self> {
        let encoded = fs::read(path.as_ref())
            .with_context(|| format!("couldn't read key file {}", path.as_ref().display()))?;

        let salt_start = DILITHIUM3_PK_BYTES + 1;
        let nonce_start = salt_start + SALT_LEN;
        let ct_start = nonce_start + NONCE_LEN;
        if encoded.len() <= ct_start {
            bail!("Key file is truncated");
        }

        let pk_bytes = &encoded[0..DILITHIUM3_PK_BYTES];
        let version = encoded[DILITHIUM3_PK_BYTES];
        if version != KEY_FILE_VERSION {
            bail!("Unsupported key file version: {}", version);
        }

        let salt = &encoded[salt_start..nonce_start];
        let nonce = &encoded[nonce_start..ct_start];
        let ciphertext = &encoded[ct_start..];

        let key = derive_key(passphrase, salt, kdf)?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let sk_bytes = Zeroizing::new(
            cipher
                .decrypt(XNonce::from_slice(nonce), ciphertext)
                .map_err(|_| anyhow!("Invalid pass-phrase"))?,
        );

        let pk = PublicKey::from_bytes(pk_bytes)
            .with_context(|| "Failed to decode public key")?;
        let sk = SecretKey::from_bytes(&sk_bytes)
            .with_context(|| "Failed to decode secret key bytes")?;
        Ok(Self::from_keys(pk, sk, coordinator))
    }

    /// Unlocks the key file named in `cfg`, asking for the pass-phrase.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let passphrase = obtain_passphrase("Enter wallet pass-phrase: ")?;
        Self::unlock(&cfg.wallet.key_file, &passphrase, KdfParams::from(&cfg.wallet), cfg.coordinator_key()?)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.pk
    }

    pub fn key_hash(&self) -> KeyHash {
        self.key_hash
    }

    pub fn coordinator(&self) -> KeyHash {
        self.coordinator
    }

    /// Signs `message`, returning the detached signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        crypto::sign(message, &self.sk)
    }

    /// Script receiving onchain change.
    pub fn onchain_script(&self) -> OutputScript {
        OutputScript::key_hash(&self.key_hash)
    }

    /// Script of this wallet's outputs that unlock after `delay`.
    pub fn delayed_script(&self, delay: u32) -> OutputScript {
        OutputScript::delayed(&self.key_hash, delay)
    }

    pub fn onchain_address(&self, params: &NetworkParams) -> String {
        address::encode_onchain(&self.onchain_script(), &params.onchain_hrp)
    }

    pub fn offchain(&self) -> OffchainAddress {
        OffchainAddress { coordinator: self.coordinator, owner: self.key_hash }
    }

    pub fn offchain_address(&self, params: &NetworkParams) -> String {
        address::encode_offchain(&self.offchain(), &params.offchain_hrp)
    }

    /// Whether `script` locks coins this key can spend under `unlock`.
    pub fn controls(&self, script: &OutputScript, unlock: &crate::coin::SpendCondition) -> bool {
        match unlock {
            crate::coin::SpendCondition::Immediate => *script == self.onchain_script(),
            crate::coin::SpendCondition::Delayed { delay } => *script == self.delayed_script(*delay),
        }
    }
}
