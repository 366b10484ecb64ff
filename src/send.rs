use std::time::{SystemTime, UNIX_EPOCH};

use crate::address;
use crate::builder::{build_onchain, BuildContext};
use crate::coinselect::select_offchain;
use crate::config::{Config, NetworkParams};
use crate::error::{Result, SendError};
use crate::explorer::{CoinSource, Explorer};
use crate::receiver::{classify, Receiver, SendRequest};
use crate::round::{RegistrationId, RoundClient, RoundOutput, WaitLimit, WaitOptions};
use crate::signer;
use crate::transaction::FinalizedTx;
use crate::wallet::Wallet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Broadcast onchain transaction.
    Onchain { txid: String },
    /// Offchain payment settled in a round.
    Offchain { registration_id: RegistrationId, settlement_txid: String },
}

/// Entry point of the send workflow.
///
/// Onchain receivers take precedence: when a request has any, they are paid
/// in one transaction and offchain receivers of the same request are left
/// untouched.
pub struct Sender<E, C> {
    config: Config,
    params: NetworkParams,
    wallet: Wallet,
    explorer: E,
    coordinator: C,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl<E, C> Sender<E, C>
where
    E: Explorer + CoinSource,
    C: crate::round::Coordinator,
{
    pub fn new(config: Config, wallet: Wallet, explorer: E, coordinator: C) -> anyhow::Result<Self> {
        let params = config.network_params()?;
        Ok(Sender { config, params, wallet, explorer, coordinator })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    /// Pays `request`, waiting for round settlement when the payment goes
    /// offchain. [`WaitLimit::Configured`] resolves to `[round].timeout_secs`;
    /// `After` and `Unbounded` override it.
    pub async fn send(&self, request: &SendRequest, mut options: WaitOptions) -> Result<SendOutcome> {
        if request.receivers.is_empty() {
            return Err(SendError::NoReceivers);
        }
        let (onchain, offchain) = classify(&request.receivers, &self.params);
        log::info!("📤 send: {} onchain, {} offchain receiver(s)", onchain.len(), offchain.len());

        if !onchain.is_empty() {
            if !offchain.is_empty() {
                log::warn!("⚠️  {} offchain receiver(s) skipped, onchain payment takes precedence", offchain.len());
            }
            let tx = self.build_and_sign(&onchain).await?;
            let txid = self.explorer.broadcast(&tx).await.map_err(SendError::Explorer)?;
            log::info!("🚀 broadcast {}", txid);
            return Ok(SendOutcome::Onchain { txid });
        }

        if options.limit == WaitLimit::Configured {
            options.limit = match self.config.round_timeout() {
                Some(timeout) => WaitLimit::After(timeout),
                None => WaitLimit::Unbounded,
            };
        }
        self.send_offchain(&offchain, request.prefer_expiring, options).await
    }

    /// Builds, signs and finalizes the onchain payment without broadcasting it.
    pub async fn build_and_sign(&self, receivers: &[Receiver]) -> Result<FinalizedTx> {
        let pools = self
            .explorer
            .onchain_pools(&self.wallet.onchain_script())
            .await
            .map_err(SendError::Explorer)?;
        let ctx = BuildContext {
            params: &self.params,
            fees: &self.config.fees,
            wallet: &self.wallet,
            pools: &pools,
            now: unix_now(),
        };
        let mut ptx = build_onchain(receivers, &ctx)?;
        signer::sign(&mut ptx, &self.wallet, &self.explorer).await?;
        signer::finalize(ptx, &self.params)
    }

    /// Checks offchain receivers and turns them into round outputs, before
    /// any coin is touched.
    fn offchain_outputs(&self, receivers: &[Receiver]) -> Result<(Vec<RoundOutput>, u64)> {
        let own = self.wallet.offchain();
        let mut outputs = Vec::with_capacity(receivers.len() + 1);
        let mut total = 0u64;
        for receiver in receivers {
            let decoded = address::decode_offchain(&receiver.destination, &self.params.offchain_hrp)
                .map_err(|e| SendError::InvalidAddress {
                    address: receiver.destination.clone(),
                    reason: e.to_string(),
                })?;
            if decoded.coordinator != own.coordinator {
                return Err(SendError::AddressMismatch { address: receiver.destination.clone() });
            }
            if receiver.amount < self.config.fees.dust {
                return Err(SendError::BelowDust { amount: receiver.amount, dust: self.config.fees.dust });
            }
            outputs.push(RoundOutput { address: receiver.destination.clone(), amount: receiver.amount });
            total = total.checked_add(receiver.amount).ok_or(SendError::AmountOverflow)?;
        }
        Ok((outputs, total))
    }

    async fn send_offchain(
        &self,
        receivers: &[Receiver],
        prefer_expiring: bool,
        options: WaitOptions,
    ) -> Result<SendOutcome> {
        let (mut outputs, total) = self.offchain_outputs(receivers)?;
        let own_address = self.wallet.offchain_address(&self.params);

        let vtxos = self.explorer.vtxos(&own_address).await.map_err(SendError::Explorer)?;
        let selection = select_offchain(&vtxos, total, prefer_expiring)?;
        if selection.change > 0 {
            outputs.push(RoundOutput { address: own_address, amount: selection.change });
        }
        let inputs: Vec<_> = selection.outpoints().collect();

        let mut round = RoundClient::new(&self.coordinator, &self.wallet);
        let registration_id = round.register(&inputs).await?;
        round.claim(&outputs).await?;
        let settlement = round.wait(options).await?;

        Ok(SendOutcome::Offchain { registration_id, settlement_txid: settlement.txid })
    }
}
