use pqcrypto_traits::sign::PublicKey as _;

use crate::address::OutputScript;
use crate::coin::SpendCondition;
use crate::config::NetworkParams;
use crate::crypto;
use crate::error::{Result, SendError};
use crate::explorer::Explorer;
use crate::transaction::{FinalizedTx, PartialSig, PartialTx, Witness};
use crate::wallet::Wallet;

fn signing_err(index: usize, reason: impl Into<String>) -> SendError {
    SendError::Signing { index, reason: reason.into() }
}

fn finalize_err(index: usize, reason: impl Into<String>) -> SendError {
    SendError::Finalize { index, reason: reason.into() }
}

/// Attaches a signature from `wallet` to every input of `ptx`.
///
/// Each spent output is looked up through `explorer` and must match what the
/// builder recorded; the wallet key must control its script under the
/// input's spend condition.
pub async fn sign<E: Explorer + ?Sized>(ptx: &mut PartialTx, wallet: &Wallet, explorer: &E) -> Result<()> {
    if !ptx.has_fee_output() {
        return Err(SendError::Build("cannot sign before the fee output is appended".into()));
    }
    let public_key = wallet.public_key().as_bytes().to_vec();

    for index in 0..ptx.inputs.len() {
        let outpoint = ptx.tx.inputs[index].prevout;
        let prev = explorer.prevout(&outpoint).await.map_err(SendError::Explorer)?;
        let meta = &ptx.inputs[index];
        if prev != meta.spent {
            return Err(signing_err(index, format!("explorer reports a different output for {}", outpoint)));
        }
        let Some(script) = prev.script.as_ref() else {
            return Err(signing_err(index, "spent output has no script"));
        };
        if !wallet.controls(script, &meta.unlock) {
            return Err(signing_err(index, format!("key does not control {} ({:?})", outpoint, meta.unlock)));
        }

        let sighash = ptx
            .tx
            .sighash(index, &prev, &meta.unlock)
            .map_err(|e| signing_err(index, e.to_string()))?;
        let signature = wallet.sign(&sighash);
        ptx.inputs[index].partial_sig = Some(PartialSig { public_key: public_key.clone(), signature });
    }
    log::debug!("✍️  signed {} input(s)", ptx.inputs.len());
    Ok(())
}

/// Turns a signed transaction into its immutable broadcast form.
///
/// Every input needs a signature that verifies against its sighash from a key
/// hashing to the spent script; delayed inputs also need their delay as
/// sequence. Witness: `[signature, public_key]`, plus the delay for delayed
/// inputs.
pub fn finalize(ptx: PartialTx, params: &NetworkParams) -> Result<FinalizedTx> {
    if !ptx.has_fee_output() {
        return Err(SendError::Build("last output is not the fee output".into()));
    }
    if let Some(i) = ptx.tx.outputs.iter().position(|o| o.asset != params.asset_id) {
        return Err(SendError::Build(format!("output {} carries a foreign asset", i)));
    }

    let mut witnesses: Vec<Witness> = Vec::with_capacity(ptx.inputs.len());
    for (index, meta) in ptx.inputs.iter().enumerate() {
        let sig = meta
            .partial_sig
            .as_ref()
            .ok_or_else(|| finalize_err(index, "missing signature"))?;
        if meta.spent.asset != params.asset_id {
            return Err(finalize_err(index, "spends a foreign asset"));
        }

        let hash = crypto::key_hash_bytes(&sig.public_key);
        let expected = match meta.unlock {
            SpendCondition::Immediate => OutputScript::key_hash(&hash),
            SpendCondition::Delayed { delay } => {
                if ptx.tx.inputs[index].sequence != delay {
                    return Err(finalize_err(index, format!("sequence must equal delay {}", delay)));
                }
                OutputScript::delayed(&hash, delay)
            }
        };
        if meta.spent.script.as_ref() != Some(&expected) {
            return Err(finalize_err(index, "public key does not match the spent script"));
        }

        let sighash = ptx
            .tx
            .sighash(index, &meta.spent, &meta.unlock)
            .map_err(|e| finalize_err(index, e.to_string()))?;
        if !crypto::verify(&sighash, &sig.signature, &sig.public_key) {
            return Err(finalize_err(index, "invalid signature"));
        }

        let mut witness = vec![sig.signature.clone(), sig.public_key.clone()];
        if let SpendCondition::Delayed { delay } = meta.unlock {
            witness.push(delay.to_le_bytes().to_vec());
        }
        witnesses.push(witness);
    }

    let mut tx = ptx.tx;
    tx.witnesses = witnesses;
    let finalized = FinalizedTx::new(tx).map_err(|e| SendError::Build(e.to_string()))?;
    log::info!("📦 finalized {} ({} bytes)", finalized.txid_hex(), finalized.encoded().len() / 2);
    Ok(finalized)
}
