//! Onchain transaction assembly with fee balancing.
//!
//! The fee is estimated once from the provisional transaction (inputs,
//! receiver outputs and change) before the fee output is appended and before
//! anything is signed. The estimate adds what both will contribute: the
//! amount-only fee output, and per input a Dilithium3 witness
//! `[signature, public key]` plus the delay for delayed inputs. All of these
//! have a fixed encoded size, so for an unchanged shape the estimate is the
//! final virtual size. The fee is then reconciled against the change:
//!
//! * change above the fee shrinks the change output,
//! * change equal to the fee removes it,
//! * change below the fee removes it and selects more coins for the
//!   shortfall, once. The fee is not recomputed after that second
//!   selection, so the inputs and change it adds are not paid for.

use std::collections::HashSet;

use crate::address;
use crate::coin::{OnchainPools, Outpoint, Selection, Utxo};
use crate::coinselect::select_onchain;
use crate::config::{Fees, NetworkParams};
use crate::error::{Result, SendError};
use crate::receiver::Receiver;
use crate::transaction::{AssetId, PartialTx};
use crate::wallet::Wallet;

/// `ceil(vsize * rate)`.
pub fn fee_for_vsize(vsize: usize, rate_per_vbyte: f64) -> u64 {
    (vsize as f64 * rate_per_vbyte).ceil() as u64
}

/// Everything the builder reads besides the receivers.
pub struct BuildContext<'a> {
    pub params: &'a NetworkParams,
    pub fees: &'a Fees,
    pub wallet: &'a Wallet,
    pub pools: &'a OnchainPools,
    /// Unix time used to decide which delayed coins are mature.
    pub now: u64,
}

fn build_err(e: impl std::fmt::Display) -> SendError {
    SendError::Build(e.to_string())
}

fn add_inputs(ptx: &mut PartialTx, selection: &Selection<Utxo>, asset: AssetId) {
    for utxo in &selection.selected {
        log::debug!("➕ input {} ({} sats, {:?})", utxo.outpoint, utxo.value, utxo.unlock);
        ptx.add_input(utxo, asset);
    }
}

/// Builds the unsigned, fee-balanced transaction paying `receivers`.
pub fn build_onchain(receivers: &[Receiver], ctx: &BuildContext<'_>) -> Result<PartialTx> {
    let asset = ctx.params.asset_id;
    let mut ptx = PartialTx::new();

    let mut target = 0u64;
    for receiver in receivers {
        if receiver.amount < ctx.fees.dust {
            return Err(SendError::BelowDust { amount: receiver.amount, dust: ctx.fees.dust });
        }
        target = target.checked_add(receiver.amount).ok_or(SendError::AmountOverflow)?;

        let script = address::decode_onchain(&receiver.destination, &ctx.params.onchain_hrp)
            .map_err(|e| SendError::Build(format!("invalid destination '{}': {}", receiver.destination, e)))?;
        ptx.add_output(asset, receiver.amount, script);
    }
    if ptx.tx.outputs.is_empty() {
        return Err(SendError::NoReceivers);
    }

    let selection = select_onchain(ctx.pools, target, &HashSet::new(), ctx.now)?;
    add_inputs(&mut ptx, &selection, asset);
    let change = selection.change;

    let change_script = ctx.wallet.onchain_script();
    if change > 0 {
        ptx.add_output(asset, change, change_script.clone());
    }

    let vsize = ptx.estimated_virtual_size().map_err(build_err)?;
    let fee = fee_for_vsize(vsize, ctx.fees.rate_per_vbyte);
    log::info!("🧮 provisional vsize {} vB, fee {} sats, change {} sats", vsize, fee, change);

    if change > fee {
        let last = ptx.tx.outputs.len() - 1;
        ptx.tx.outputs[last].value = change - fee;
    } else if change == fee {
        if change > 0 {
            ptx.pop_output();
        }
    } else {
        if change > 0 {
            ptx.pop_output();
        }
        let exclude: HashSet<Outpoint> = selection.outpoints().collect();
        let extra = select_onchain(ctx.pools, fee - change, &exclude, ctx.now)?;
        log::info!("🔁 change short of fee by {}, added {} input(s)", fee - change, extra.selected.len());
        add_inputs(&mut ptx, &extra, asset);
        if extra.change > 0 {
            ptx.add_output(asset, extra.change, change_script);
        }
    }

    ptx.add_fee_output(asset, fee);

    let inputs = ptx.input_total();
    let outputs = ptx.tx.output_total();
    if inputs != outputs {
        return Err(SendError::Build(format!("unbalanced transaction: inputs {} != outputs {}", inputs, outputs)));
    }
    Ok(ptx)
}
