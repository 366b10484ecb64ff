use std::collections::HashSet;

use crate::coin::{Outpoint, OnchainPools, Selection, Utxo, Valued, Vtxo};
use crate::error::{Result, SendError};

/// Accumulates `coins` in order until `target` is covered.
fn greedy<'a, T, I>(coins: I, target: u64) -> std::result::Result<Selection<T>, u64>
where
    T: Valued + Clone + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut selected = Vec::new();
    let mut total = 0u64;
    for coin in coins {
        if total >= target {
            break;
        }
        total = total.saturating_add(coin.value());
        selected.push(coin.clone());
    }
    if total < target {
        return Err(total);
    }
    Ok(Selection { selected, change: total - target })
}

/// Picks VTXOs covering `target`.
///
/// Coins are ranked by descending value. With `prefer_expiring` the ranking is
/// then (stably) by ascending expiry, coins without an expiry last, so cells
/// close to forced expiry are spent first.
pub fn select_offchain(vtxos: &[Vtxo], target: u64, prefer_expiring: bool) -> Result<Selection<Vtxo>> {
    let mut ranked: Vec<&Vtxo> = vtxos.iter().collect();
    ranked.sort_by(|a, b| b.value.cmp(&a.value));
    if prefer_expiring {
        ranked.sort_by_key(|v| v.expires_at.unwrap_or(u64::MAX));
    }

    let selection = greedy(ranked, target).map_err(|available| SendError::InsufficientFunds {
        requested: target,
        available,
    })?;
    log::debug!(
        "🪙 offchain selection: {} vtxo(s) for {}, change {}",
        selection.selected.len(), target, selection.change
    );
    Ok(selection)
}

/// Picks onchain coins covering `target`, never touching `exclude`.
///
/// Immediate coins are used first, in snapshot order. Delayed coins are drawn
/// only when the immediate pool falls short, and only those mature at `now`.
pub fn select_onchain(
    pools: &OnchainPools,
    target: u64,
    exclude: &HashSet<Outpoint>,
    now: u64,
) -> Result<Selection<Utxo>> {
    let usable = |u: &&Utxo| !exclude.contains(&u.outpoint);

    let immediate: Vec<&Utxo> = pools.immediate.iter().filter(usable).collect();
    let immediate_total: u64 = immediate.iter().map(|u| u.value).sum();
    let candidates: Vec<&Utxo> = if immediate_total >= target {
        immediate
    } else {
        let delayed = pools.delayed.iter().filter(usable).filter(|u| u.is_mature(now));
        immediate.into_iter().chain(delayed).collect()
    };

    let selection = greedy(candidates, target).map_err(|available| {
        SendError::InsufficientFunds { requested: target, available }
    })?;
    log::debug!(
        "🪙 onchain selection drew {} delayed coin(s)",
        selection.selected.iter().filter(|u| u.is_delayed()).count()
    );
    Ok(selection)
}
