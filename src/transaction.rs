use serde::{Deserialize, Serialize};

use crate::address::OutputScript;
use crate::coin::{Outpoint, SpendCondition, Utxo};
use crate::crypto::{self, DILITHIUM3_PK_BYTES, DILITHIUM3_SIG_BYTES};

pub type AssetId = [u8; 32];
pub type Txid = [u8; 32];

pub const TX_VERSION: u32 = 2;
/// Base bytes weigh this much more than witness bytes.
pub const WITNESS_SCALE: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: Outpoint,
    pub sequence: u32,
}

/// An output. `script == None` marks the fee output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub asset: AssetId,
    pub value: u64,
    pub script: Option<OutputScript>,
}

impl TxOut {
    pub fn is_fee(&self) -> bool {
        self.script.is_none()
    }
}

/// Witness stack of one input.
pub type Witness = Vec<Vec<u8>>;

/// bincode length prefix of a `Vec`.
const LEN_PREFIX: usize = 8;

/// Encoded size of the witness stack a finalized input of kind `unlock`
/// carries: `[signature, public_key]`, plus the delay for delayed inputs.
pub fn witness_allowance(unlock: &SpendCondition) -> usize {
    let mut size = LEN_PREFIX + (LEN_PREFIX + DILITHIUM3_SIG_BYTES) + (LEN_PREFIX + DILITHIUM3_PK_BYTES);
    if let SpendCondition::Delayed { .. } = unlock {
        size += LEN_PREFIX + std::mem::size_of::<u32>();
    }
    size
}

/// Serialized with bincode. The base bytes (txid, sighash, full-weight part)
/// exclude `witnesses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    /// One stack per input once finalized; empty while unsigned.
    pub witnesses: Vec<Witness>,
}

impl Default for Transaction {
    fn default() -> Self {
        Transaction { version: TX_VERSION, inputs: Vec::new(), outputs: Vec::new(), lock_time: 0, witnesses: Vec::new() }
    }
}

impl Transaction {
    /// Serialization without the witness section.
    pub fn base_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(&(self.version, &self.inputs, &self.outputs, self.lock_time))
    }

    pub fn to_bytes(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(bytes)
    }

    pub fn txid(&self) -> bincode::Result<Txid> {
        Ok(crypto::blake3_hash(&self.base_bytes()?))
    }

    pub fn weight(&self) -> bincode::Result<usize> {
        let base = self.base_bytes()?.len();
        let total = bincode::serialized_size(self)? as usize;
        Ok(base * WITNESS_SCALE + (total - base))
    }

    pub fn virtual_size(&self) -> bincode::Result<usize> {
        Ok(self.weight()?.div_ceil(WITNESS_SCALE))
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).sum()
    }

    /// Message signed for input `index`. Commits to every input and output of
    /// the transaction, to the output being spent and to its spend condition.
    pub fn sighash(&self, index: usize, spent: &TxOut, unlock: &SpendCondition) -> bincode::Result<[u8; 32]> {
        let prevouts = bincode::serialize(&self.inputs)?;
        let outputs = bincode::serialize(&self.outputs)?;
        let spent = bincode::serialize(spent)?;
        let unlock = bincode::serialize(unlock)?;
        Ok(crypto::tagged_hash(
            "roundsend-sighash",
            &[
                &self.version.to_le_bytes(),
                &self.lock_time.to_le_bytes(),
                &crypto::blake3_hash(&prevouts),
                &crypto::blake3_hash(&outputs),
                &(index as u32).to_le_bytes(),
                &spent,
                &unlock,
            ],
        ))
    }
}

/// A signature collected for one input before finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSig {
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// What the signer needs to know about the output an input spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputMeta {
    pub spent: TxOut,
    pub unlock: SpendCondition,
    pub partial_sig: Option<PartialSig>,
}

/// A transaction under construction: unsigned structure plus per-input data.
#[derive(Debug, Clone, Default)]
pub struct PartialTx {
    pub tx: Transaction,
    pub inputs: Vec<InputMeta>,
    fee_output: Option<usize>,
}

impl PartialTx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `utxo` as an input. Delayed coins get their delay as sequence.
    pub fn add_input(&mut self, utxo: &Utxo, asset: AssetId) {
        let sequence = match utxo.unlock {
            SpendCondition::Immediate => u32::MAX,
            SpendCondition::Delayed { delay } => delay,
        };
        self.tx.inputs.push(TxIn { prevout: utxo.outpoint, sequence });
        self.inputs.push(InputMeta {
            spent: TxOut { asset, value: utxo.value, script: Some(utxo.script.clone()) },
            unlock: utxo.unlock,
            partial_sig: None,
        });
    }

    pub fn add_output(&mut self, asset: AssetId, value: u64, script: OutputScript) {
        self.tx.outputs.push(TxOut { asset, value, script: Some(script) });
    }

    pub fn pop_output(&mut self) -> Option<TxOut> {
        self.tx.outputs.pop()
    }

    /// Appends the amount-only fee output. It stays the last output.
    pub fn add_fee_output(&mut self, asset: AssetId, fee: u64) {
        self.tx.outputs.push(TxOut { asset, value: fee, script: None });
        self.fee_output = Some(self.tx.outputs.len() - 1);
    }

    pub fn fee(&self) -> Option<u64> {
        self.fee_output.map(|i| self.tx.outputs[i].value)
    }

    pub fn has_fee_output(&self) -> bool {
        self.fee_output.is_some_and(|i| i + 1 == self.tx.outputs.len())
    }

    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|i| i.spent.value).sum()
    }

    /// Virtual size the transaction will have once the fee output is appended
    /// and every input carries its witness. Both have a fixed size, so this
    /// is exact as long as inputs and scripted outputs do not change.
    pub fn estimated_virtual_size(&self) -> bincode::Result<usize> {
        let mut weight = self.tx.weight()?;
        weight += self.inputs.iter().map(|i| witness_allowance(&i.unlock)).sum::<usize>();
        if self.fee_output.is_none() {
            let fee_output = TxOut { asset: [0u8; 32], value: 0, script: None };
            weight += bincode::serialized_size(&fee_output)? as usize * WITNESS_SCALE;
        }
        Ok(weight.div_ceil(WITNESS_SCALE))
    }
}

/// A fully signed transaction, ready for broadcast. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTx {
    tx: Transaction,
    txid: Txid,
    encoded: String,
}

impl FinalizedTx {
    pub(crate) fn new(tx: Transaction) -> bincode::Result<Self> {
        let txid = tx.txid()?;
        let encoded = hex::encode(tx.to_bytes()?);
        Ok(FinalizedTx { tx, txid, encoded })
    }

    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn txid(&self) -> Txid {
        self.txid
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid)
    }

    /// Hex of the full serialization; what gets broadcast.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        Transaction {
            inputs: vec![TxIn { prevout: Outpoint::new([1u8; 32], 0), sequence: u32::MAX }],
            outputs: vec![
                TxOut { asset: [9u8; 32], value: 1_000, script: Some(OutputScript::key_hash(&[2u8; 32])) },
                TxOut { asset: [9u8; 32], value: 150, script: None },
            ],
            ..Transaction::default()
        }
    }

    #[test]
    fn witness_does_not_change_txid() {
        let unsigned = sample();
        let mut signed = sample();
        signed.witnesses = vec![vec![vec![0xaa; 64], vec![0xbb; 32]]];
        assert_eq!(unsigned.txid().unwrap(), signed.txid().unwrap());
        assert_ne!(unsigned.to_bytes().unwrap(), signed.to_bytes().unwrap());
    }

    #[test]
    fn witness_bytes_are_discounted() {
        let unsigned = sample();
        let mut signed = sample();
        signed.witnesses = vec![vec![vec![0xaa; 400]]];
        let base = unsigned.base_bytes().unwrap().len();
        assert!(unsigned.virtual_size().unwrap() >= base);
        let grown = signed.virtual_size().unwrap() - unsigned.virtual_size().unwrap();
        assert!(grown > 0 && grown < 400 / 2);
    }

    #[test]
    fn value_does_not_change_size() {
        let a = sample();
        let mut b = sample();
        b.outputs[0].value = u64::MAX;
        assert_eq!(a.virtual_size().unwrap(), b.virtual_size().unwrap());
    }

    #[test]
    fn sighash_is_per_input_and_commits_to_outputs() {
        let tx = sample();
        let spent = TxOut { asset: [9u8; 32], value: 1_150, script: Some(OutputScript::key_hash(&[3u8; 32])) };
        let a = tx.sighash(0, &spent, &SpendCondition::Immediate).unwrap();
        let b = tx.sighash(1, &spent, &SpendCondition::Immediate).unwrap();
        assert_ne!(a, b);
        let mut changed = tx.clone();
        changed.outputs[1].value = 151;
        assert_ne!(a, changed.sighash(0, &spent, &SpendCondition::Immediate).unwrap());
        assert_ne!(a, tx.sighash(0, &spent, &SpendCondition::Delayed { delay: 1 }).unwrap());
    }

    #[test]
    fn fee_output_tracks_last_position() {
        let mut ptx = PartialTx::new();
        ptx.add_output([0u8; 32], 10, OutputScript::key_hash(&[0u8; 32]));
        assert!(!ptx.has_fee_output());
        ptx.add_fee_output([0u8; 32], 5);
        assert!(ptx.has_fee_output());
        assert_eq!(ptx.fee(), Some(5));
    }

    #[test]
    fn witness_allowance_matches_encoded_stacks() {
        let immediate: Witness = vec![vec![0u8; DILITHIUM3_SIG_BYTES], vec![0u8; DILITHIUM3_PK_BYTES]];
        let mut delayed = immediate.clone();
        delayed.push(144u32.to_le_bytes().to_vec());
        assert_eq!(
            witness_allowance(&SpendCondition::Immediate),
            bincode::serialized_size(&immediate).unwrap() as usize
        );
        assert_eq!(
            witness_allowance(&SpendCondition::Delayed { delay: 144 }),
            bincode::serialized_size(&delayed).unwrap() as usize
        );
    }

    #[test]
    fn estimate_counts_witnesses_and_fee_output() {
        let utxo = Utxo {
            outpoint: Outpoint::new([1u8; 32], 0),
            value: 1_150,
            script: OutputScript::key_hash(&[3u8; 32]),
            unlock: SpendCondition::Immediate,
            confirmed_at: Some(0),
        };
        let mut ptx = PartialTx::new();
        ptx.add_input(&utxo, [9u8; 32]);
        ptx.add_output([9u8; 32], 1_000, OutputScript::key_hash(&[2u8; 32]));
        let before_fee = ptx.estimated_virtual_size().unwrap();
        assert!(before_fee > ptx.tx.virtual_size().unwrap() + DILITHIUM3_SIG_BYTES / WITNESS_SCALE);

        ptx.add_fee_output([9u8; 32], 150);
        assert_eq!(ptx.estimated_virtual_size().unwrap(), before_fee);

        let mut signed = ptx.tx.clone();
        signed.witnesses = vec![vec![vec![0xaa; DILITHIUM3_SIG_BYTES], vec![0xbb; DILITHIUM3_PK_BYTES]]];
        assert_eq!(signed.virtual_size().unwrap(), before_fee);
    }

    #[test]
    fn encoding_round_trips() {
        let mut tx = sample();
        tx.witnesses = vec![vec![vec![1, 2, 3]]];
        let back = Transaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
        assert_eq!(back, tx);
    }
}
