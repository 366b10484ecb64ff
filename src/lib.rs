// Library interface for the roundsend wallet send workflow.
// Pays receivers either onchain or through a coordinator round.

pub mod config;
pub mod error;
pub mod crypto;
pub mod address;
pub mod coin;
pub mod receiver;
pub mod coinselect;
pub mod transaction;
pub mod builder;
pub mod signer;
pub mod explorer;
pub mod round;
pub mod wallet;
pub mod send;

pub use coin::{Outpoint, SpendCondition, Utxo, Vtxo, OnchainPools, Selection};
pub use error::{ErrorKind, ProtocolError, SendError};
pub use receiver::{Receiver, SendRequest};
pub use send::{SendOutcome, Sender};
pub use wallet::Wallet;
