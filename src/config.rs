use serde::Deserialize;
use std::{fs, path::Path};
use anyhow::{anyhow, Context, Result};

use crate::address::KeyHash;
use crate::transaction::AssetId;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub network: Network,
    #[serde(default)]
    pub fees: Fees,
    pub coordinator: Coordinator,
    #[serde(default)]
    pub round: Round,
    pub wallet: Wallet,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Network {
    pub name: String,
    /// Hex-encoded 32-byte id of the asset every output carries.
    pub asset_id: String,
    #[serde(default = "default_onchain_hrp")]
    pub onchain_hrp: String,
    #[serde(default = "default_offchain_hrp")]
    pub offchain_hrp: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Fees {
    #[serde(default = "default_fee_rate")]
    pub rate_per_vbyte: f64,
    #[serde(default = "default_dust")]
    pub dust: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Coordinator {
    /// Hex fingerprint of the coordinator key this wallet is connected to.
    pub key: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Round {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wallet {
    pub key_file: String,
    #[serde(default = "default_kdf_mem")]
    pub kdf_mem_kib: u32,
    #[serde(default = "default_kdf_time")]
    pub kdf_time_cost: u32,
}

impl Default for Fees {
    fn default() -> Self {
        Fees { rate_per_vbyte: default_fee_rate(), dust: default_dust() }
    }
}

fn default_onchain_hrp() -> String { "rs".into() }
fn default_offchain_hrp() -> String { "rsv".into() }
fn default_fee_rate() -> f64 { 0.5 }
fn default_dust() -> u64 { 450 }
fn default_kdf_mem() -> u32 { 256 * 1024 }     // 256 MiB
fn default_kdf_time() -> u32 { 3 }

/// Network parameters resolved from [`Network`], passed to the address codec,
/// the classifier and the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub asset_id: AssetId,
    pub onchain_hrp: String,
    pub offchain_hrp: String,
}

impl Config {
    pub fn network_params(&self) -> Result<NetworkParams> {
        Ok(NetworkParams {
            asset_id: decode_hex32(&self.network.asset_id)
                .with_context(|| format!("invalid asset_id for network '{}'", self.network.name))?,
            onchain_hrp: self.network.onchain_hrp.clone(),
            offchain_hrp: self.network.offchain_hrp.clone(),
        })
    }

    pub fn coordinator_key(&self) -> Result<KeyHash> {
        decode_hex32(&self.coordinator.key).context("invalid coordinator key")
    }

    pub fn round_timeout(&self) -> Option<std::time::Duration> {
        self.round.timeout_secs.map(std::time::Duration::from_secs)
    }

    fn validate(self) -> Result<Self> {
        if !(self.fees.rate_per_vbyte.is_finite() && self.fees.rate_per_vbyte > 0.0) {
            return Err(anyhow!("fees.rate_per_vbyte must be a positive number"));
        }
        if self.network.onchain_hrp == self.network.offchain_hrp {
            return Err(anyhow!("onchain_hrp and offchain_hrp must differ"));
        }
        for hrp in [&self.network.onchain_hrp, &self.network.offchain_hrp] {
            if hrp.is_empty() || hrp.contains('1') {
                return Err(anyhow!("address prefix '{}' must be non-empty and must not contain '1'", hrp));
            }
        }
        self.network_params()?;
        self.coordinator_key()?;
        Ok(self)
    }
}

fn decode_hex32(s: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(s.trim())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("expected 32 bytes, got {}", b.len()))
}

/// Read the TOML file at `p` and deserialize into `Config`.
/// *Adds context* so user errors print a friendlier message.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read, parsed or validated.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("🗂️  couldn’t read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(text)
        .with_context(|| "📝  invalid TOML in config file".to_string())?;
    cfg.validate()
}
