use crate::{Amount, Hash};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }

    /// Serialized form used when inserting outpoints into bloom filters.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(self.hash.as_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxInput {
    pub previous_out: OutPoint,
    pub sign_script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxOutput {
    pub amount: Amount,
    pub pk_script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Identifier of the transaction: double SHA256 over its fields.
    pub fn tx_hash(&self) -> Hash {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            buf.extend_from_slice(&input.previous_out.to_bytes());
            buf.extend_from_slice(&(input.sign_script.len() as u32).to_le_bytes());
            buf.extend_from_slice(&input.sign_script);
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }
        buf.extend_from_slice(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            buf.extend_from_slice(&output.amount.0.to_le_bytes());
            buf.extend_from_slice(&(output.pk_script.len() as u32).to_le_bytes());
            buf.extend_from_slice(&output.pk_script);
        }
        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        Hash::digest(&buf)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_out.hash.is_zero()
    }
}

/// Mempool descriptor of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDesc {
    pub tx: Transaction,
    /// Unix time (seconds) the transaction entered the pool.
    pub added: u64,
    /// Best main height when the transaction entered the pool.
    pub height: u64,
    pub fee: Amount,
    /// Fee rate in atoms per kilobyte.
    pub fee_per_kb: u64,
}

impl TxDesc {
    pub fn new(tx: Transaction, fee_per_kb: u64) -> Self {
        Self {
            tx,
            added: 0,
            height: 0,
            fee: Amount::default(),
            fee_per_kb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_changes_with_outputs() {
        let mut tx = Transaction::default();
        let before = tx.tx_hash();
        tx.outputs.push(TxOutput {
            amount: Amount(5),
            pk_script: vec![0x76, 0xa9],
        });
        assert_ne!(before, tx.tx_hash());
    }

    #[test]
    fn test_coinbase_detection() {
        let tx = Transaction {
            inputs: vec![TxInput::default()],
            ..Default::default()
        };
        assert!(tx.is_coinbase());
    }
}
