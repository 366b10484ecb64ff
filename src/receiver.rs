use serde::{Deserialize, Serialize};

use crate::address;
use crate::config::NetworkParams;
use crate::error::{Result, SendError};

/// One payment destination. The amount is checked against dust where it is
/// spent, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receiver {
    #[serde(rename = "to")]
    pub destination: String,
    pub amount: u64,
}

impl Receiver {
    pub fn new(destination: impl Into<String>, amount: u64) -> Self {
        Receiver { destination: destination.into(), amount }
    }
}

/// A normalized send: an ordered list of receivers plus the VTXO selection
/// policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub receivers: Vec<Receiver>,
    pub prefer_expiring: bool,
}

impl SendRequest {
    pub fn new(receivers: Vec<Receiver>) -> Result<Self> {
        if receivers.is_empty() {
            return Err(SendError::NoReceivers);
        }
        Ok(SendRequest { receivers, prefer_expiring: false })
    }

    /// Single `to` / `amount` convenience form.
    pub fn single(to: impl Into<String>, amount: u64) -> Self {
        SendRequest { receivers: vec![Receiver::new(to, amount)], prefer_expiring: false }
    }

    /// Parses `[{"to": "<addr>", "amount": <sats>}, ...]`.
    pub fn from_json(receivers: &str) -> Result<Self> {
        let list: Vec<Receiver> = serde_json::from_str(receivers)
            .map_err(|e| SendError::MalformedReceivers(e.to_string()))?;
        Self::new(list)
    }

    pub fn prefer_expiring(mut self, enabled: bool) -> Self {
        self.prefer_expiring = enabled;
        self
    }
}

/// True when `destination` decodes to an onchain output script. Everything
/// else is treated as an offchain address and validated further downstream.
pub fn is_onchain(destination: &str, params: &NetworkParams) -> bool {
    address::decode_onchain(destination, &params.onchain_hrp).is_ok()
}

/// Splits receivers into (onchain, offchain), preserving order.
pub fn classify(receivers: &[Receiver], params: &NetworkParams) -> (Vec<Receiver>, Vec<Receiver>) {
    receivers
        .iter()
        .cloned()
        .partition(|r| is_onchain(&r.destination, params))
}
