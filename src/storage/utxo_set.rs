use crate::core::{Blockchain, Transaction, TxIn, TxOut, UTxOut};
use crate::error::{BlockchainError, Result};
use crate::storage::MemoryPool;
use crate::wallet::{verify, Wallet};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Spendable-output view over the confirmed chain and the pending pool.
///
/// Nothing is cached: every query rescans the chain from genesis, so the view
/// can never drift from what storage holds.
#[derive(Clone)]
pub struct UTXOSet {
    blockchain: Blockchain,
    mempool: Arc<MemoryPool>,
}

// Confirmed transactions by id plus every (tx id, index) some confirmed input spends
struct ChainIndex {
    transactions: HashMap<String, Transaction>,
    spent: HashSet<(String, i64)>,
    order: Vec<String>,
}

impl ChainIndex {
    fn build(blockchain: &Blockchain) -> Result<ChainIndex> {
        let mut transactions = HashMap::new();
        let mut spent = HashSet::new();
        let mut order = Vec::new();

        // oldest first, so selection walks outputs in the order they were created
        for block in blockchain.all_blocks()?.into_iter().rev() {
            for tx in block.get_transactions() {
                if !tx.is_coinbase() {
                    for input in tx.get_tx_ins() {
                        spent.insert((input.get_tx_id().to_string(), input.get_index()));
                    }
                }
                order.push(tx.get_id().to_string());
                transactions.insert(tx.get_id().to_string(), tx.clone());
            }
        }
        Ok(ChainIndex {
            transactions,
            spent,
            order,
        })
    }

    fn is_spent(&self, tx_id: &str, index: i64) -> bool {
        self.spent.contains(&(tx_id.to_string(), index))
    }
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain, mempool: Arc<MemoryPool>) -> UTXOSet {
        UTXOSet {
            blockchain,
            mempool,
        }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    pub fn get_mempool(&self) -> &MemoryPool {
        &self.mempool
    }

    /// Outputs paying `address` that no confirmed or pending input consumes
    pub fn compute_spendable_outputs(&self, address: &str) -> Result<Vec<UTxOut>> {
        let index = ChainIndex::build(&self.blockchain)?;
        let mut unspent = Vec::new();

        for tx_id in &index.order {
            let tx = &index.transactions[tx_id];
            for (position, out) in tx.get_tx_outs().iter().enumerate() {
                let position = position as i64;
                if out.get_address() != address
                    || index.is_spent(tx_id, position)
                    || self.mempool.contains_spend(tx_id, position)
                {
                    continue;
                }
                unspent.push(UTxOut {
                    tx_id: tx_id.clone(),
                    index: position,
                    amount: out.get_amount(),
                });
            }
        }
        Ok(unspent)
    }

    pub fn balance(&self, address: &str) -> Result<u64> {
        Ok(self
            .compute_spendable_outputs(address)?
            .iter()
            .map(|out| out.amount)
            .sum())
    }

    /// Builds and signs a transfer of `amount` from the wallet's address to `to`
    pub fn build_transaction(
        &self,
        wallet: &dyn Wallet,
        to: &str,
        amount: u64,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let from = wallet.address();
        let spendable = self.compute_spendable_outputs(&from)?;
        let available: u64 = spendable.iter().map(|out| out.amount).sum();
        if available < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        let mut tx_ins = Vec::new();
        let mut accumulated = 0u64;
        for out in spendable {
            if accumulated >= amount {
                break;
            }
            tx_ins.push(TxIn::new(&from, &out.tx_id, out.index));
            accumulated += out.amount;
        }

        let mut tx_outs = Vec::new();
        let change = accumulated - amount;
        if change > 0 {
            tx_outs.push(TxOut::new(&from, change));
        }
        tx_outs.push(TxOut::new(to, amount));

        let mut tx = Transaction::new(tx_ins, tx_outs)?;
        tx.sign(wallet)?;
        debug!(
            "Built transaction {} moving {amount} with {} inputs",
            tx.get_id(),
            tx.get_tx_ins().len()
        );
        Ok(tx)
    }

    /// Checks every input of `tx` against the confirmed chain
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<()> {
        let index = ChainIndex::build(&self.blockchain)?;
        Self::verify_against(&index, tx)
    }

    fn verify_against(index: &ChainIndex, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Err(BlockchainError::Transaction(format!(
                "Coinbase {} cannot be submitted as a pending transaction",
                tx.get_id()
            )));
        }
        if tx.get_tx_ins().is_empty() {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} has no inputs",
                tx.get_id()
            )));
        }
        if tx.calculate_id()? != tx.get_id() {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} does not match its content",
                tx.get_id()
            )));
        }

        let mut input_total = 0u64;
        for input in tx.get_tx_ins() {
            let referenced = index
                .transactions
                .get(input.get_tx_id())
                .ok_or_else(|| {
                    BlockchainError::ReferencedTxNotFound(input.get_tx_id().to_string())
                })?;
            let out = usize::try_from(input.get_index())
                .ok()
                .and_then(|position| referenced.get_tx_outs().get(position))
                .ok_or_else(|| {
                    BlockchainError::Transaction(format!(
                        "Output {}:{} does not exist",
                        input.get_tx_id(),
                        input.get_index()
                    ))
                })?;

            if !verify(out.get_address(), tx.get_id(), input.get_signature()) {
                return Err(BlockchainError::SignatureInvalid(format!(
                    "Input {}:{} of {} is not signed by {}",
                    input.get_tx_id(),
                    input.get_index(),
                    tx.get_id(),
                    out.get_address()
                )));
            }
            if index.is_spent(input.get_tx_id(), input.get_index()) {
                return Err(BlockchainError::Transaction(format!(
                    "Output {}:{} is already spent",
                    input.get_tx_id(),
                    input.get_index()
                )));
            }
            input_total = input_total
                .checked_add(out.get_amount())
                .ok_or_else(|| BlockchainError::Transaction("Input value overflow".to_string()))?;
        }

        let output_total = tx.output_total()?;
        if output_total > input_total {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {} overspends: outputs {output_total} exceed inputs {input_total}",
                tx.get_id()
            )));
        }
        Ok(())
    }

    /// Empties the pool and returns what the next block should confirm: every
    /// pending transaction that verifies, followed by a fresh coinbase. Anything
    /// that fails verification is dropped.
    pub fn select_confirmable(
        &self,
        miner_address: &str,
        reward: u64,
        height: u64,
    ) -> Result<Vec<Transaction>> {
        let index = ChainIndex::build(&self.blockchain)?;
        let pending = self.mempool.take_all();
        let pending_count = pending.len();

        let mut claimed: HashSet<(String, i64)> = HashSet::new();
        let mut confirmable = Vec::new();
        for tx in pending {
            if let Err(e) = Self::verify_against(&index, &tx) {
                warn!("Dropping transaction {}: {e}", tx.get_id());
                continue;
            }
            let outpoints: Vec<(String, i64)> = tx
                .get_tx_ins()
                .iter()
                .map(|input| (input.get_tx_id().to_string(), input.get_index()))
                .collect();
            if outpoints.iter().any(|outpoint| claimed.contains(outpoint)) {
                warn!(
                    "Dropping transaction {}: spends an output already claimed in this block",
                    tx.get_id()
                );
                continue;
            }
            claimed.extend(outpoints);
            confirmable.push(tx);
        }

        info!(
            "Selected {} of {pending_count} pending transactions for height {height}",
            confirmable.len()
        );
        confirmable.push(Transaction::new_coinbase(miner_address, reward, height)?);
        Ok(confirmable)
    }
}
