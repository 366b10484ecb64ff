use serde::{Serialize, Deserialize};
use std::fmt;

use crate::address::OutputScript;

/// Reference to a transaction output: the id of the transaction that created
/// it and its index there.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        Outpoint { txid, vout }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// How an onchain coin is unlocked. Decides both the selection pool and the
/// signing path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SpendCondition {
    /// Spendable right away with the wallet key.
    Immediate,
    /// Spendable with the wallet key once `delay` seconds have passed since
    /// confirmation. The input must carry `sequence == delay`.
    Delayed { delay: u32 },
}

/// An unspent onchain output owned by the wallet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: Outpoint,
    pub value: u64,
    pub script: OutputScript,
    pub unlock: SpendCondition,
    /// Unix time of the confirming block, `None` while unconfirmed.
    #[serde(default)]
    pub confirmed_at: Option<u64>,
}

impl Utxo {
    /// Whether this coin can be spent at `now`. Immediate coins always can;
    /// delayed coins need a confirmation at least `delay` seconds old.
    pub fn is_mature(&self, now: u64) -> bool {
        match self.unlock {
            SpendCondition::Immediate => true,
            SpendCondition::Delayed { delay } => self
                .confirmed_at
                .map(|t| t.saturating_add(delay as u64) <= now)
                .unwrap_or(false),
        }
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self.unlock, SpendCondition::Delayed { .. })
    }
}

/// An offchain value cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vtxo {
    pub outpoint: Outpoint,
    pub value: u64,
    /// Unix time after which the cell must be claimed onchain or is forfeited.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Onchain coins of the wallet as read once from the coin source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnchainPools {
    pub immediate: Vec<Utxo>,
    pub delayed: Vec<Utxo>,
}

impl OnchainPools {
    pub fn total(&self) -> u64 {
        self.immediate.iter().chain(self.delayed.iter()).map(|u| u.value).sum()
    }
}

/// Anything a selector can pick.
pub trait Valued {
    fn value(&self) -> u64;
    fn outpoint(&self) -> Outpoint;
}

impl Valued for Utxo {
    fn value(&self) -> u64 { self.value }
    fn outpoint(&self) -> Outpoint { self.outpoint }
}

impl Valued for Vtxo {
    fn value(&self) -> u64 { self.value }
    fn outpoint(&self) -> Outpoint { self.outpoint }
}

/// Coins picked to cover a target, and the overshoot.
/// `sum(selected) == target + change` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<T> {
    pub selected: Vec<T>,
    pub change: u64,
}

impl<T: Valued> Selection<T> {
    pub fn total(&self) -> u64 {
        self.selected.iter().map(Valued::value).sum()
    }

    pub fn outpoints(&self) -> impl Iterator<Item = Outpoint> + '_ {
        self.selected.iter().map(Valued::outpoint)
    }
}
