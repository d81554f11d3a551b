pub mod block;
pub mod storage;
pub mod transaction_pool;

pub use block::{Block, ConsensusData, Transaction};
pub use storage::{BlockStore, MemoryBlockStore, StorageError};
pub use transaction_pool::TransactionPool;
