use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A transfer of value between two accounts, as carried inside a block or the
/// pending pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub sender: String,
    pub receiver: String,
    pub amount: u64,
    /// Creation timestamp (seconds since epoch)
    pub timestamp: u64,
    pub signature: Vec<u8>,
}

impl Transaction {
    pub fn new(sender: String, receiver: String, amount: u64, signature: Vec<u8>) -> Self {
        Transaction {
            sender,
            receiver,
            amount,
            timestamp: Utc::now().timestamp() as u64,
            signature,
        }
    }

    /// Compute the transaction hash using SHA3-256.
    ///
    /// The pool and reorganization paths address transactions by this hash,
    /// so it must be stable across serialization round trips.
    pub fn hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(format!(
            "{}{}{}{}",
            self.sender, self.receiver, self.amount, self.timestamp
        ));
        hasher.update(&self.signature);
        hex::encode(hasher.finalize())
    }
}

/// Consensus metadata attached to a block by the round that produced it.
///
/// Branch scoring treats a missing `ConsensusData` as a Byzantine signal, so
/// honest proposers always populate it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConsensusData {
    /// Number of validators that participated in the round
    pub participant_count: u32,
    /// Consensus strength as a percentage (0-100)
    pub consensus_strength: f64,
    /// Aggregate behavioral fitness of the participants as a percentage (0-100)
    pub behavioral_fitness: f64,
}

/// A block as consumed by the consensus core.
///
/// Authentication of blocks (signatures, proof systems) is the concern of an
/// external crypto provider; this core only needs the header fields, the
/// proposer identity, and the behavioral score supplied by the quality feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Block height in the chain
    pub height: u64,

    /// SHA3-256 hash of the header fields
    pub hash: String,

    /// Hash of the previous block (immutable link)
    pub previous_hash: String,

    /// Block creation timestamp (seconds since epoch)
    pub timestamp: u64,

    /// Transactions included in this block
    pub transactions: Vec<Transaction>,

    /// Identity of the proposing validator
    pub proposer: String,

    /// Behavioral-quality score of the proposer at proposal time (0-100)
    pub behavioral_score: f64,

    /// Consensus metadata for the round, absent on malformed or hostile blocks
    pub consensus_data: Option<ConsensusData>,
}

impl Block {
    /// Create a new block linked to `previous_hash` and stamp its hash.
    pub fn new(
        height: u64,
        previous_hash: String,
        proposer: String,
        behavioral_score: f64,
        transactions: Vec<Transaction>,
        consensus_data: Option<ConsensusData>,
    ) -> Self {
        let timestamp = Utc::now().timestamp() as u64;
        let mut block = Block {
            height,
            hash: String::new(),
            previous_hash,
            timestamp,
            transactions,
            proposer,
            behavioral_score,
            consensus_data,
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute the block hash over the header fields using SHA3-256.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(format!(
            "{}{}{}{}",
            self.height, self.timestamp, self.previous_hash, self.proposer
        ));
        for tx in &self.transactions {
            hasher.update(tx.hash());
        }
        hex::encode(hasher.finalize())
    }
}
