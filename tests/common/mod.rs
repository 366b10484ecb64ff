// Shared fixtures for the integration tests: an in-memory chain and a
// scripted coordinator.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;

use roundsend::address::{self, OffchainAddress, OutputScript};
use roundsend::builder::fee_for_vsize;
use roundsend::config::{self, Config};
use roundsend::crypto;
use roundsend::explorer::{CoinSource, Explorer};
use roundsend::round::{
    forfeit_sighash, Coordinator, ForfeitRequest, RegistrationId, RoundEvent, RoundEventStream, RoundOutput,
    SignedForfeit,
};
use roundsend::transaction::{AssetId, FinalizedTx, PartialTx, TxOut};
use roundsend::{OnchainPools, Outpoint, SpendCondition, Utxo, Vtxo, Wallet};

pub const ASSET_HEX: &str = "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";
pub const COORDINATOR: [u8; 32] = [0x11; 32];
pub const OTHER_COORDINATOR: [u8; 32] = [0x22; 32];

pub fn test_config() -> Config {
    config_with(0.5, 5)
}

/// Test config with a custom fee rate and round timeout.
pub fn config_with(rate_per_vbyte: f64, timeout_secs: u64) -> Config {
    config::load_from_str(&format!(
        r#"
        [network]
        name = "regtest"
        asset_id = "{}"

        [fees]
        rate_per_vbyte = {:?}
        dust = 450

        [coordinator]
        key = "{}"

        [round]
        timeout_secs = {}

        [wallet]
        key_file = "wallet.key"
        "#,
        ASSET_HEX,
        rate_per_vbyte,
        hex::encode(COORDINATOR),
        timeout_secs
    ))
    .expect("test config parses")
}

pub fn asset() -> AssetId {
    let mut id = [0u8; 32];
    hex::decode_to_slice(ASSET_HEX, &mut id).expect("asset hex");
    id
}

pub fn test_wallet() -> Wallet {
    Wallet::generate(COORDINATOR)
}

pub fn coin(wallet: &Wallet, n: u8, value: u64) -> Utxo {
    Utxo {
        outpoint: Outpoint::new([n; 32], 0),
        value,
        script: wallet.onchain_script(),
        unlock: SpendCondition::Immediate,
        confirmed_at: Some(0),
    }
}

pub fn delayed_coin(wallet: &Wallet, n: u8, value: u64, delay: u32) -> Utxo {
    Utxo {
        outpoint: Outpoint::new([n; 32], 1),
        value,
        script: wallet.delayed_script(delay),
        unlock: SpendCondition::Delayed { delay },
        confirmed_at: Some(0),
    }
}

pub fn vtxo(n: u8, value: u64, expires_at: Option<u64>) -> Vtxo {
    Vtxo { outpoint: Outpoint::new([n; 32], 7), value, expires_at }
}

/// Onchain address of somebody else.
pub fn onchain_dest(tag: u8) -> String {
    address::encode_onchain(&OutputScript::key_hash(&[tag; 32]), "rs")
}

/// Offchain address of somebody else under `coordinator`.
pub fn offchain_dest(coordinator: [u8; 32], tag: u8) -> String {
    address::encode_offchain(&OffchainAddress { coordinator, owner: [tag; 32] }, "rsv")
}

/// Virtual size the builder estimates for a transaction with these inputs
/// and outputs (fee output excluded). Values do not change the encoded size.
pub fn vsize_for_shape(immediate: usize, delayed: usize, outputs: usize) -> usize {
    let wallet = test_wallet();
    let mut ptx = PartialTx::new();
    for i in 0..immediate {
        ptx.add_input(&coin(&wallet, i as u8, 0), asset());
    }
    for i in 0..delayed {
        ptx.add_input(&delayed_coin(&wallet, (immediate + i) as u8, 0, 144), asset());
    }
    for _ in 0..outputs {
        ptx.add_output(asset(), 0, OutputScript::key_hash(&[0u8; 32]));
    }
    ptx.estimated_virtual_size().expect("size")
}

/// Fee the builder charges at the default test rate for `inputs` immediate
/// inputs and `outputs` outputs.
pub fn fee_for_shape(inputs: usize, outputs: usize) -> u64 {
    fee_for_vsize(vsize_for_shape(inputs, 0, outputs), 0.5)
}

/// In-memory chain: serves a fixed coin snapshot and accepts transactions
/// whose inputs were not spent before.
pub struct MockChain {
    asset: AssetId,
    pools: Mutex<OnchainPools>,
    vtxos: Mutex<Vec<Vtxo>>,
    spent: Mutex<HashSet<Outpoint>>,
    broadcasts: Mutex<Vec<FinalizedTx>>,
    reject_broadcast: AtomicBool,
}

impl MockChain {
    pub fn new(pools: OnchainPools) -> Self {
        MockChain {
            asset: asset(),
            pools: Mutex::new(pools),
            vtxos: Mutex::new(Vec::new()),
            spent: Mutex::new(HashSet::new()),
            broadcasts: Mutex::new(Vec::new()),
            reject_broadcast: AtomicBool::new(false),
        }
    }

    pub fn with_immediate(coins: Vec<Utxo>) -> Self {
        Self::new(OnchainPools { immediate: coins, delayed: Vec::new() })
    }

    pub fn with_vtxos(vtxos: Vec<Vtxo>) -> Self {
        let chain = Self::new(OnchainPools::default());
        *chain.vtxos.lock().unwrap() = vtxos;
        chain
    }

    pub fn broadcasts(&self) -> Vec<FinalizedTx> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn reject_broadcasts(&self) {
        self.reject_broadcast.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Explorer for MockChain {
    async fn broadcast(&self, tx: &FinalizedTx) -> Result<String> {
        if self.reject_broadcast.load(Ordering::SeqCst) {
            bail!("node rejected transaction");
        }
        let mut spent = self.spent.lock().unwrap();
        let inputs: Vec<Outpoint> = tx.transaction().inputs.iter().map(|i| i.prevout).collect();
        if let Some(dup) = inputs.iter().find(|o| spent.contains(o)) {
            bail!("input {} already spent", dup);
        }
        spent.extend(inputs);
        self.broadcasts.lock().unwrap().push(tx.clone());
        Ok(tx.txid_hex())
    }

    async fn prevout(&self, outpoint: &Outpoint) -> Result<TxOut> {
        let pools = self.pools.lock().unwrap();
        pools
            .immediate
            .iter()
            .chain(pools.delayed.iter())
            .find(|u| u.outpoint == *outpoint)
            .map(|u| TxOut { asset: self.asset, value: u.value, script: Some(u.script.clone()) })
            .ok_or_else(|| anyhow!("unknown outpoint {}", outpoint))
    }
}

#[async_trait]
impl CoinSource for MockChain {
    async fn onchain_pools(&self, _script: &OutputScript) -> Result<OnchainPools> {
        Ok(self.pools.lock().unwrap().clone())
    }

    async fn vtxos(&self, _address: &str) -> Result<Vec<Vtxo>> {
        Ok(self.vtxos.lock().unwrap().clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Register(Vec<Outpoint>),
    Claim(RegistrationId, Vec<RoundOutput>),
    Subscribe(RegistrationId),
    Finalize(RegistrationId, usize),
}

/// What the round does once a client subscribes.
#[derive(Debug, Clone)]
pub enum RoundScript {
    /// Asks for forfeits of the registered inputs, then settles.
    Settle,
    /// Asks for a forfeit of a coin the client never registered.
    ForeignForfeit,
    Fail(String),
    /// Starts, then ends the stream without a terminal event.
    CloseEarly,
    /// Never emits anything.
    Hang,
    /// Events come from the channel handed out by `manual_events`.
    Manual,
}

pub struct MockCoordinator {
    calls: Mutex<Vec<Call>>,
    reserved: Mutex<HashSet<Outpoint>>,
    registrations: Mutex<HashMap<RegistrationId, Vec<Outpoint>>>,
    script: Mutex<RoundScript>,
    manual: Mutex<Option<mpsc::UnboundedReceiver<RoundEvent>>>,
    reject_register: AtomicBool,
    reject_claim: AtomicBool,
    next_id: AtomicU64,
}

impl MockCoordinator {
    pub fn new(script: RoundScript) -> Self {
        MockCoordinator {
            calls: Mutex::new(Vec::new()),
            reserved: Mutex::new(HashSet::new()),
            registrations: Mutex::new(HashMap::new()),
            script: Mutex::new(script),
            manual: Mutex::new(None),
            reject_register: AtomicBool::new(false),
            reject_claim: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn has_claim(&self) -> bool {
        self.calls().iter().any(|c| matches!(c, Call::Claim(..)))
    }

    pub fn has_subscriber(&self) -> bool {
        self.calls().iter().any(|c| matches!(c, Call::Subscribe(..)))
    }

    pub fn reject_register(&self) {
        self.reject_register.store(true, Ordering::SeqCst);
    }

    pub fn reject_claim(&self) {
        self.reject_claim.store(true, Ordering::SeqCst);
    }

    /// Switches to `RoundScript::Manual` and returns the event feed.
    pub fn manual_events(&self) -> mpsc::UnboundedSender<RoundEvent> {
        let (tx, rx) = mpsc::unbounded();
        *self.manual.lock().unwrap() = Some(rx);
        *self.script.lock().unwrap() = RoundScript::Manual;
        tx
    }

    fn round_id(id: &str) -> String {
        format!("round-of-{}", id)
    }
}

#[async_trait]
impl Coordinator for MockCoordinator {
    async fn register_payment(&self, inputs: &[Outpoint]) -> Result<RegistrationId> {
        self.calls.lock().unwrap().push(Call::Register(inputs.to_vec()));
        if self.reject_register.load(Ordering::SeqCst) {
            bail!("registration closed");
        }
        let mut reserved = self.reserved.lock().unwrap();
        if let Some(dup) = inputs.iter().find(|o| reserved.contains(o)) {
            bail!("vtxo {} already registered", dup);
        }
        reserved.extend(inputs.iter().copied());
        let id = format!("reg-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.registrations.lock().unwrap().insert(id.clone(), inputs.to_vec());
        Ok(id)
    }

    async fn claim_payment(&self, id: &str, outputs: &[RoundOutput]) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Claim(id.to_string(), outputs.to_vec()));
        if self.reject_claim.load(Ordering::SeqCst) {
            bail!("claim refused");
        }
        if !self.registrations.lock().unwrap().contains_key(id) {
            bail!("unknown registration {}", id);
        }
        Ok(())
    }

    async fn round_events(&self, id: &str) -> Result<RoundEventStream> {
        self.calls.lock().unwrap().push(Call::Subscribe(id.to_string()));
        let round_id = Self::round_id(id);
        let inputs = self.registrations.lock().unwrap().get(id).cloned().unwrap_or_default();
        let script = self.script.lock().unwrap().clone();
        let events = match script {
            RoundScript::Settle => vec![
                RoundEvent::Started { round_id: round_id.clone() },
                RoundEvent::Finalization {
                    round_id: round_id.clone(),
                    forfeits: inputs.iter().map(|&vtxo| ForfeitRequest { vtxo, message: [9u8; 32] }).collect(),
                },
                RoundEvent::Finalized { round_id, txid: format!("settlement-{}", id) },
            ],
            RoundScript::ForeignForfeit => vec![
                RoundEvent::Started { round_id: round_id.clone() },
                RoundEvent::Finalization {
                    round_id,
                    forfeits: vec![ForfeitRequest { vtxo: Outpoint::new([0xaa; 32], 0), message: [9u8; 32] }],
                },
            ],
            RoundScript::Fail(reason) => vec![
                RoundEvent::Started { round_id: round_id.clone() },
                RoundEvent::Failed { round_id, reason },
            ],
            RoundScript::CloseEarly => vec![RoundEvent::Started { round_id }],
            RoundScript::Hang => return Ok(futures::stream::pending::<RoundEvent>().boxed()),
            RoundScript::Manual => {
                let rx = self.manual.lock().unwrap().take().ok_or_else(|| anyhow!("no manual feed"))?;
                return Ok(rx.boxed());
            }
        };
        Ok(futures::stream::iter(events).boxed())
    }

    async fn finalize_payment(&self, id: &str, forfeits: Vec<SignedForfeit>) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Finalize(id.to_string(), forfeits.len()));
        let round_id = Self::round_id(id);
        for f in &forfeits {
            let sighash = forfeit_sighash(&round_id, &f.vtxo, &[9u8; 32]);
            if !crypto::verify(&sighash, &f.signature, &f.public_key) {
                bail!("bad forfeit signature for {}", f.vtxo);
            }
        }
        Ok(())
    }
}

/// Polls until `cond` holds, yielding to the other half of a `join!`.
pub async fn until(mut cond: impl FnMut() -> bool) {
    while !cond() {
        tokio::task::yield_now().await;
    }
}
