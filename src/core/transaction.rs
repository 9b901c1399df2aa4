// Value moves through unspent outputs: a transaction consumes outputs of earlier
// transactions and creates new ones. Ownership is proven by signing the
// transaction id with the key whose address the consumed output names.

use crate::error::{BlockchainError, Result};
use crate::utils::{current_timestamp, deserialize, serialize, sha256_hex};
use crate::wallet::Wallet;
use serde::{Deserialize, Serialize};

/// Address marker carried by the single input of a coinbase transaction
pub const COINBASE_MARKER: &str = "Coinbase";
/// Output index carried by the single input of a coinbase transaction
pub const COINBASE_INDEX: i64 = -1;

// A reference to output #index of transaction tx_id, plus the proof that the
// spender owns it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct TxIn {
    address: String,   // Claimed owner; informational only
    tx_id: String,     // Transaction holding the output being spent
    index: i64,        // Position of that output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    signature: String, // hex(r ‖ s) over the owning transaction's id
}

impl TxIn {
    pub fn new(address: &str, tx_id: &str, index: i64) -> TxIn {
        TxIn {
            address: address.to_string(),
            tx_id: tx_id.to_string(),
            index,
            signature: String::new(),
        }
    }

    pub fn get_address(&self) -> &str {
        &self.address
    }

    pub fn get_tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn get_index(&self) -> i64 {
        self.index
    }

    pub fn get_signature(&self) -> &str {
        &self.signature
    }

    pub fn set_signature(&mut self, signature: String) {
        self.signature = signature;
    }

    pub fn references(&self, tx_id: &str, index: i64) -> bool {
        self.index == index && self.tx_id == tx_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct TxOut {
    address: String,
    amount: u64,
}

impl TxOut {
    pub fn new(address: &str, amount: u64) -> TxOut {
        TxOut {
            address: address.to_string(),
            amount,
        }
    }

    pub fn get_address(&self) -> &str {
        &self.address
    }

    pub fn get_amount(&self) -> u64 {
        self.amount
    }
}

/// A spendable output as seen by one address; derived, never stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UTxOut {
    pub tx_id: String,
    pub index: i64,
    pub amount: u64,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    id: String,
    timestamp: i64,
    tx_ins: Vec<TxIn>,
    tx_outs: Vec<TxOut>,
}

impl Transaction {
    /// Unsigned transaction with its id already computed
    pub fn new(tx_ins: Vec<TxIn>, tx_outs: Vec<TxOut>) -> Result<Transaction> {
        let mut tx = Transaction {
            id: String::new(),
            timestamp: current_timestamp()?,
            tx_ins,
            tx_outs,
        };
        tx.id = tx.calculate_id()?;
        Ok(tx)
    }

    /// Mints `reward` to `to`. The height goes into the input's tx id slot so
    /// that coinbases mined within the same second still get distinct ids.
    pub fn new_coinbase(to: &str, reward: u64, height: u64) -> Result<Transaction> {
        let tx_in = TxIn::new(COINBASE_MARKER, &height.to_string(), COINBASE_INDEX);
        Self::new(vec![tx_in], vec![TxOut::new(to, reward)])
    }

    // The id covers everything except the id itself and the signatures, so
    // signing an input never changes what it signs.
    fn trimmed_copy(&self) -> Transaction {
        let tx_ins = self
            .tx_ins
            .iter()
            .map(|input| TxIn::new(&input.address, &input.tx_id, input.index))
            .collect();
        Transaction {
            id: String::new(),
            timestamp: self.timestamp,
            tx_ins,
            tx_outs: self.tx_outs.clone(),
        }
    }

    pub fn calculate_id(&self) -> Result<String> {
        Ok(sha256_hex(&serialize(&self.trimmed_copy())?))
    }

    /// Every input gets the wallet's signature over the transaction id
    pub fn sign(&mut self, wallet: &dyn Wallet) -> Result<()> {
        for input in self.tx_ins.iter_mut() {
            input.signature = wallet.sign(&self.id)?;
        }
        Ok(())
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_ins.len() == 1
            && self.tx_ins[0].index == COINBASE_INDEX
            && self.tx_ins[0].address == COINBASE_MARKER
    }

    pub fn output_total(&self) -> Result<u64> {
        self.tx_outs.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.amount)
                .ok_or_else(|| BlockchainError::Transaction("Output value overflow".to_string()))
        })
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get_tx_ins(&self) -> &[TxIn] {
        self.tx_ins.as_slice()
    }

    pub fn get_tx_outs(&self) -> &[TxOut] {
        self.tx_outs.as_slice()
    }

    pub fn get_tx_ins_mut(&mut self) -> &mut [TxIn] {
        self.tx_ins.as_mut_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
