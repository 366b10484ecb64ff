//! Client side of a coordinator round.
//!
//! One [`RoundClient`] drives one payment through
//! `Idle -> Registered -> Claimed -> Settled | Failed`. Registration and claim
//! must both succeed before the completion stream is awaited. Nothing is
//! rolled back on failure; the coordinator expires stale registrations.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use pqcrypto_traits::sign::PublicKey as _;

use crate::coin::Outpoint;
use crate::crypto;
use crate::error::{ProtocolError, Result};
use crate::wallet::Wallet;

pub type RegistrationId = String;

/// A desired output of the round: an offchain address and an amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutput {
    pub address: String,
    pub amount: u64,
}

/// The coordinator asks the owner of `vtxo` to sign `message`, giving up the
/// cell in exchange for its place in the settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForfeitRequest {
    pub vtxo: Outpoint,
    pub message: [u8; 32],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedForfeit {
    pub vtxo: Outpoint,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundEvent {
    Started { round_id: String },
    Finalization { round_id: String, forfeits: Vec<ForfeitRequest> },
    Finalized { round_id: String, txid: String },
    Failed { round_id: String, reason: String },
}

pub type RoundEventStream = BoxStream<'static, RoundEvent>;

#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn register_payment(&self, inputs: &[Outpoint]) -> anyhow::Result<RegistrationId>;

    async fn claim_payment(&self, id: &str, outputs: &[RoundOutput]) -> anyhow::Result<()>;

    /// Events of the round the registration `id` ends up in.
    async fn round_events(&self, id: &str) -> anyhow::Result<RoundEventStream>;

    async fn finalize_payment(&self, id: &str, forfeits: Vec<SignedForfeit>) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: Coordinator + ?Sized> Coordinator for std::sync::Arc<T> {
    async fn register_payment(&self, inputs: &[Outpoint]) -> anyhow::Result<RegistrationId> {
        (**self).register_payment(inputs).await
    }

    async fn claim_payment(&self, id: &str, outputs: &[RoundOutput]) -> anyhow::Result<()> {
        (**self).claim_payment(id, outputs).await
    }

    async fn round_events(&self, id: &str) -> anyhow::Result<RoundEventStream> {
        (**self).round_events(id).await
    }

    async fn finalize_payment(&self, id: &str, forfeits: Vec<SignedForfeit>) -> anyhow::Result<()> {
        (**self).finalize_payment(id, forfeits).await
    }
}

/// Message signed to forfeit `vtxo` in round `round_id`.
pub fn forfeit_sighash(round_id: &str, vtxo: &Outpoint, message: &[u8; 32]) -> [u8; 32] {
    crypto::tagged_hash(
        "roundsend-forfeit",
        &[round_id.as_bytes(), &vtxo.txid, &vtxo.vout.to_le_bytes(), message],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    Idle,
    Registered { id: RegistrationId },
    Claimed { id: RegistrationId },
    Settled { txid: String },
    Failed { reason: String },
}

impl RoundState {
    fn name(&self) -> &'static str {
        match self {
            RoundState::Idle => "idle",
            RoundState::Registered { .. } => "registered",
            RoundState::Claimed { .. } => "claimed",
            RoundState::Settled { .. } => "settled",
            RoundState::Failed { .. } => "failed",
        }
    }
}

/// How long the completion wait may take.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitLimit {
    /// The sender's configured round timeout, unbounded when none is set.
    /// A bare [`RoundClient`] has no configuration and treats this as
    /// unbounded.
    #[default]
    Configured,
    After(Duration),
    /// Wait for a terminal event or the end of the stream, whatever the
    /// configuration says.
    Unbounded,
}

impl WaitLimit {
    fn duration(self) -> Option<Duration> {
        match self {
            WaitLimit::After(limit) => Some(limit),
            WaitLimit::Configured | WaitLimit::Unbounded => None,
        }
    }
}

/// Caller-side limits on the completion wait.
#[derive(Debug, Default)]
pub struct WaitOptions {
    pub limit: WaitLimit,
    /// Any message (or lag) on this channel aborts the wait. A closed
    /// channel does not.
    pub cancel: Option<broadcast::Receiver<()>>,
}

impl WaitOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        WaitOptions { limit: WaitLimit::After(timeout), cancel: None }
    }

    pub fn unbounded() -> Self {
        WaitOptions { limit: WaitLimit::Unbounded, cancel: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub registration_id: RegistrationId,
    pub round_id: String,
    pub txid: String,
}

pub struct RoundClient<'a, C: Coordinator + ?Sized> {
    coordinator: &'a C,
    wallet: &'a Wallet,
    inputs: Vec<Outpoint>,
    state: RoundState,
}

impl<'a, C: Coordinator + ?Sized> RoundClient<'a, C> {
    pub fn new(coordinator: &'a C, wallet: &'a Wallet) -> Self {
        RoundClient { coordinator, wallet, inputs: Vec::new(), state: RoundState::Idle }
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    fn invalid(&self, action: &'static str) -> ProtocolError {
        ProtocolError::InvalidState { action, state: self.state.name() }
    }

    fn fail(&mut self, err: ProtocolError) -> crate::error::SendError {
        log::warn!("⚠️  round payment failed: {}", err);
        self.state = RoundState::Failed { reason: err.to_string() };
        err.into()
    }

    /// Registers `inputs` for the next round.
    pub async fn register(&mut self, inputs: &[Outpoint]) -> Result<RegistrationId> {
        if self.state != RoundState::Idle {
            return Err(self.invalid("register").into());
        }
        let id = match self.coordinator.register_payment(inputs).await {
            Ok(id) => id,
            Err(e) => return Err(self.fail(ProtocolError::RegisterRejected(e))),
        };
        log::info!("📝 registered {} input(s) as {}", inputs.len(), id);
        self.inputs = inputs.to_vec();
        self.state = RoundState::Registered { id: id.clone() };
        Ok(id)
    }

    /// Claims `outputs` against the current registration.
    pub async fn claim(&mut self, outputs: &[RoundOutput]) -> Result<()> {
        let RoundState::Registered { id } = &self.state else {
            return Err(self.invalid("claim").into());
        };
        let id = id.clone();
        if let Err(e) = self.coordinator.claim_payment(&id, outputs).await {
            return Err(self.fail(ProtocolError::ClaimRejected(e)));
        }
        log::info!("📨 claimed {} output(s) for {}", outputs.len(), id);
        self.state = RoundState::Claimed { id };
        Ok(())
    }

    /// Waits for the round to settle, signing forfeits when asked.
    ///
    /// Ends with a settlement, or with an error on round failure, on stream
    /// end without a terminal event, on timeout and on cancellation.
    pub async fn wait(&mut self, options: WaitOptions) -> Result<Settlement> {
        let RoundState::Claimed { id } = &self.state else {
            return Err(self.invalid("wait for settlement").into());
        };
        let id = id.clone();
        let mut events = match self.coordinator.round_events(&id).await {
            Ok(events) => events,
            Err(e) => return Err(self.fail(ProtocolError::Subscribe(e))),
        };

        let WaitOptions { limit, cancel } = options;
        let timeout = limit.duration();
        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match cancel {
                Some(mut rx) => match rx.recv().await {
                    Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
                    _ => (),
                },
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            res = self.drive(&id, &mut events) => res,
            _ = deadline => Err(ProtocolError::TimedOut(timeout.unwrap_or_default())),
            _ = cancelled => Err(ProtocolError::Cancelled),
        };

        match outcome {
            Ok((round_id, txid)) => {
                log::info!("🎉 round {} settled in {}", round_id, txid);
                self.state = RoundState::Settled { txid: txid.clone() };
                Ok(Settlement { registration_id: id, round_id, txid })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn drive(&self, id: &str, events: &mut RoundEventStream) -> Result<(String, String), ProtocolError> {
        while let Some(event) = events.next().await {
            match event {
                RoundEvent::Started { round_id } => {
                    log::info!("🔔 round {} started", round_id);
                }
                RoundEvent::Finalization { round_id, forfeits } => {
                    let signed = self.sign_forfeits(&round_id, &forfeits)?;
                    self.coordinator
                        .finalize_payment(id, signed)
                        .await
                        .map_err(ProtocolError::FinalizeRejected)?;
                    log::debug!("submitted {} forfeit(s) for round {}", forfeits.len(), round_id);
                }
                RoundEvent::Finalized { round_id, txid } => return Ok((round_id, txid)),
                RoundEvent::Failed { round_id, reason } => {
                    return Err(ProtocolError::RoundFailed(format!("{}: {}", round_id, reason)));
                }
            }
        }
        Err(ProtocolError::StreamClosed)
    }

    fn sign_forfeits(&self, round_id: &str, requests: &[ForfeitRequest]) -> Result<Vec<SignedForfeit>, ProtocolError> {
        let public_key = self.wallet.public_key().as_bytes().to_vec();
        requests
            .iter()
            .map(|req| {
                if !self.inputs.contains(&req.vtxo) {
                    return Err(ProtocolError::UnexpectedForfeit(req.vtxo));
                }
                let sighash = forfeit_sighash(round_id, &req.vtxo, &req.message);
                Ok(SignedForfeit {
                    vtxo: req.vtxo,
                    public_key: public_key.clone(),
                    signature: self.wallet.sign(&sighash),
                })
            })
            .collect()
    }
}
