use anyhow::Result;
use async_trait::async_trait;

use crate::address::OutputScript;
use crate::coin::{OnchainPools, Outpoint, Vtxo};
use crate::transaction::{FinalizedTx, TxOut};

/// Chain access used to sign and broadcast. Transports live outside this crate.
#[async_trait]
pub trait Explorer: Send + Sync {
    /// Submits `tx`, returning the txid the network accepted it under.
    async fn broadcast(&self, tx: &FinalizedTx) -> Result<String>;

    /// The output `outpoint` refers to, as recorded on chain.
    async fn prevout(&self, outpoint: &Outpoint) -> Result<TxOut>;
}

/// The wallet's spendable coin sets.
#[async_trait]
pub trait CoinSource: Send + Sync {
    /// Onchain coins locked to `script` (immediate pool) and to the wallet's
    /// delayed scripts (delayed pool).
    async fn onchain_pools(&self, script: &OutputScript) -> Result<OnchainPools>;

    /// Offchain cells owned by the offchain address `address`.
    async fn vtxos(&self, address: &str) -> Result<Vec<Vtxo>>;
}

#[async_trait]
impl<T: Explorer + ?Sized> Explorer for std::sync::Arc<T> {
    async fn broadcast(&self, tx: &FinalizedTx) -> Result<String> {
        (**self).broadcast(tx).await
    }

    async fn prevout(&self, outpoint: &Outpoint) -> Result<TxOut> {
        (**self).prevout(outpoint).await
    }
}

#[async_trait]
impl<T: CoinSource + ?Sized> CoinSource for std::sync::Arc<T> {
    async fn onchain_pools(&self, script: &OutputScript) -> Result<OnchainPools> {
        (**self).onchain_pools(script).await
    }

    async fn vtxos(&self, address: &str) -> Result<Vec<Vtxo>> {
        (**self).vtxos(address).await
    }
}
