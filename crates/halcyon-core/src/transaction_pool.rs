use crate::block::Transaction;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A transaction pool that stores pending transactions efficiently.
///
/// Reorganizations return reverted block transactions here and remove the
/// transactions of newly applied blocks, so the pool supports removal by hash
/// in addition to FIFO draining.
pub struct TransactionPool {
    pool: Mutex<VecDeque<Transaction>>, // FIFO structure for transactions
    max_size: usize,                    // Maximum pool size to prevent overflows
}

impl TransactionPool {
    /// Initializes a new transaction pool with a defined max size
    pub fn new(max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        })
    }

    /// Adds a transaction while ensuring pool size constraints.
    ///
    /// Returns false if the transaction is invalid, a duplicate, or the pool
    /// is at capacity.
    pub async fn add_transaction(&self, transaction: Transaction) -> bool {
        let mut pool = self.pool.lock().await;

        if pool.len() >= self.max_size {
            log::warn!(
                "Transaction pool at capacity ({}), rejecting transaction",
                self.max_size
            );
            return false;
        }

        if transaction.sender.is_empty() || transaction.receiver.is_empty() {
            log::error!("Transaction validation failed: sender or receiver is empty");
            return false;
        }

        if transaction.amount == 0 {
            log::error!("Transaction validation failed: amount cannot be zero");
            return false;
        }

        if transaction.sender == transaction.receiver {
            log::error!("Transaction validation failed: sender cannot equal receiver");
            return false;
        }

        let tx_hash = transaction.hash();
        if pool.iter().any(|tx| tx.hash() == tx_hash) {
            log::warn!("Duplicate transaction rejected: {}", tx_hash);
            return false;
        }

        pool.push_back(transaction);

        log::debug!(
            "Transaction added to pool. Pool size: {}/{}",
            pool.len(),
            self.max_size
        );

        true
    }

    /// Returns a transaction that was reverted out of a block to the pool.
    ///
    /// The transaction already passed validation before block inclusion, so
    /// the capacity and validity gates do not apply; only duplicates are
    /// dropped. Reinstated transactions go to the front of the queue.
    pub async fn reinstate(&self, transaction: Transaction) {
        let mut pool = self.pool.lock().await;
        let tx_hash = transaction.hash();
        if pool.iter().any(|tx| tx.hash() == tx_hash) {
            return;
        }
        pool.push_front(transaction);
        log::debug!(
            "Transaction reinstated after revert. Pool size: {}/{}",
            pool.len(),
            self.max_size
        );
    }

    /// Removes a transaction by hash, returning true if it was present.
    pub async fn remove_transaction(&self, tx_hash: &str) -> bool {
        let mut pool = self.pool.lock().await;
        if let Some(pos) = pool.iter().position(|tx| tx.hash() == tx_hash) {
            pool.remove(pos);
            return true;
        }
        false
    }

    /// Retrieves all pending transactions from the pool
    pub async fn pending(&self) -> Vec<Transaction> {
        let pool = self.pool.lock().await;
        pool.iter().cloned().collect()
    }

    /// Clears all transactions from the pool (e.g., after block finalization)
    pub async fn clear_pool(&self) {
        let mut pool = self.pool.lock().await;
        pool.clear();
    }

    /// Gets the current pool size
    pub async fn pool_size(&self) -> usize {
        let pool = self.pool.lock().await;
        pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Transaction;

    fn tx(sender: &str, amount: u64) -> Transaction {
        Transaction::new(sender.to_string(), "sink".to_string(), amount, vec![0xab])
    }

    #[tokio::test]
    async fn rejects_duplicates_and_zero_amounts() {
        let pool = TransactionPool::new(8);
        let t = tx("alice", 100);
        assert!(pool.add_transaction(t.clone()).await);
        assert!(!pool.add_transaction(t).await);
        assert!(!pool.add_transaction(tx("bob", 0)).await);
        assert_eq!(pool.pool_size().await, 1);
    }

    #[tokio::test]
    async fn enforces_capacity() {
        let pool = TransactionPool::new(2);
        assert!(pool.add_transaction(tx("a", 1)).await);
        assert!(pool.add_transaction(tx("b", 2)).await);
        assert!(!pool.add_transaction(tx("c", 3)).await);
    }

    #[tokio::test]
    async fn reinstate_bypasses_capacity_but_not_dedup() {
        let pool = TransactionPool::new(1);
        assert!(pool.add_transaction(tx("a", 1)).await);
        let t = tx("b", 2);
        pool.reinstate(t.clone()).await;
        pool.reinstate(t.clone()).await;
        assert_eq!(pool.pool_size().await, 2);
        assert_eq!(pool.pending().await[0].hash(), t.hash());
    }

    #[tokio::test]
    async fn remove_by_hash() {
        let pool = TransactionPool::new(8);
        let t = tx("alice", 100);
        let hash = t.hash();
        pool.add_transaction(t).await;
        assert!(pool.remove_transaction(&hash).await);
        assert!(!pool.remove_transaction(&hash).await);
        assert_eq!(pool.pool_size().await, 0);
    }
}
