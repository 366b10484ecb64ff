use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::crypto;

pub type KeyHash = [u8; 32];

const CHECKSUM_LEN: usize = 4;
const SEPARATOR: char = '1';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing '1' separator")]
    MissingSeparator,
    #[error("unexpected prefix '{found}', expected '{expected}'")]
    WrongPrefix { expected: String, found: String },
    #[error("payload is not valid hex")]
    BadHex,
    #[error("bad checksum")]
    BadChecksum,
    #[error("invalid payload length {0}")]
    BadLength(usize),
    #[error("unknown script version {0:#04x}")]
    UnknownScript(u8),
}

/// Locking script of an output. Two templates exist: spend by key hash, and
/// spend by key hash after a relative delay. Deserialization goes through
/// [`OutputScript::from_bytes`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct OutputScript(Vec<u8>);

impl OutputScript {
    pub const KEY_HASH_VERSION: u8 = 0x00;
    pub const DELAYED_VERSION: u8 = 0x01;
    const PROGRAM_LEN: u8 = 32;

    pub fn key_hash(hash: &KeyHash) -> Self {
        Self::with_program(Self::KEY_HASH_VERSION, hash)
    }

    /// Script of an output spendable by `hash` once `delay` has elapsed since
    /// confirmation. The delay is committed to in the program.
    pub fn delayed(hash: &KeyHash, delay: u32) -> Self {
        let program = crypto::tagged_hash("roundsend-delayed-script", &[hash, &delay.to_le_bytes()]);
        Self::with_program(Self::DELAYED_VERSION, &program)
    }

    fn with_program(version: u8, program: &[u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.push(version);
        bytes.push(Self::PROGRAM_LEN);
        bytes.extend_from_slice(program);
        OutputScript(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, AddressError> {
        if bytes.len() != 34 || bytes[1] != Self::PROGRAM_LEN {
            return Err(AddressError::BadLength(bytes.len()));
        }
        match bytes[0] {
            Self::KEY_HASH_VERSION | Self::DELAYED_VERSION => Ok(OutputScript(bytes)),
            v => Err(AddressError::UnknownScript(v)),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn version(&self) -> u8 {
        self.0[0]
    }
}

impl TryFrom<Vec<u8>> for OutputScript {
    type Error = AddressError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl From<OutputScript> for Vec<u8> {
    fn from(script: OutputScript) -> Self {
        script.0
    }
}

impl fmt::Display for OutputScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// A coordinator-issued address: funds sent here are owned by `owner` inside
/// rounds run by the coordinator whose key hashes to `coordinator`. Encoded
/// with payload `coordinator || owner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffchainAddress {
    pub coordinator: KeyHash,
    pub owner: KeyHash,
}

fn checksum(hrp: &str, payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let h = crypto::tagged_hash("roundsend-address-checksum", &[hrp.as_bytes(), payload]);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&h[..CHECKSUM_LEN]);
    out
}

/// `<hrp>1<hex(payload || checksum)>`, the checksum being the first four
/// bytes of a tagged BLAKE3 hash over prefix and payload.
fn encode(hrp: &str, payload: &[u8]) -> String {
    let mut data = payload.to_vec();
    data.extend_from_slice(&checksum(hrp, payload));
    format!("{hrp}{SEPARATOR}{}", hex::encode(data))
}

fn decode(hrp: &str, s: &str) -> Result<Vec<u8>, AddressError> {
    let (found, data) = s.split_once(SEPARATOR).ok_or(AddressError::MissingSeparator)?;
    if found != hrp {
        return Err(AddressError::WrongPrefix { expected: hrp.to_string(), found: found.to_string() });
    }
    let mut data = hex::decode(data).map_err(|_| AddressError::BadHex)?;
    if data.len() <= CHECKSUM_LEN {
        return Err(AddressError::BadLength(data.len()));
    }
    let sum = data.split_off(data.len() - CHECKSUM_LEN);
    if sum != checksum(hrp, &data) {
        return Err(AddressError::BadChecksum);
    }
    Ok(data)
}

pub fn encode_onchain(script: &OutputScript, hrp: &str) -> String {
    encode(hrp, script.as_bytes())
}

/// Decodes an onchain address into the output script it pays to.
pub fn decode_onchain(s: &str, hrp: &str) -> Result<OutputScript, AddressError> {
    OutputScript::from_bytes(decode(hrp, s)?)
}

pub fn encode_offchain(addr: &OffchainAddress, hrp: &str) -> String {
    let mut payload = Vec::with_capacity(64);
    payload.extend_from_slice(&addr.coordinator);
    payload.extend_from_slice(&addr.owner);
    encode(hrp, &payload)
}

pub fn decode_offchain(s: &str, hrp: &str) -> Result<OffchainAddress, AddressError> {
    let payload = decode(hrp, s)?;
    if payload.len() != 64 {
        return Err(AddressError::BadLength(payload.len()));
    }
    let mut coordinator = [0u8; 32];
    let mut owner = [0u8; 32];
    coordinator.copy_from_slice(&payload[..32]);
    owner.copy_from_slice(&payload[32..]);
    Ok(OffchainAddress { coordinator, owner })
}
