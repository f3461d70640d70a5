use crate::Hash;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum number of inventory vectors allowed in a single message.
pub const MAX_INV_PER_MSG: usize = 50_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvType {
    Error,
    Tx,
    Block,
    FilteredBlock,
}

impl fmt::Display for InvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvType::Error => "error",
            InvType::Tx => "tx",
            InvType::Block => "block",
            InvType::FilteredBlock => "filtered_block",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvVect {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl InvVect {
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Self { inv_type, hash }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("too many inventory vectors in message [max {max}]")]
    TooManyVectors { max: usize },
}

/// Inventory announcement or request.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Inventory {
    invs: Vec<InvVect>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a vector, refusing to grow past [`MAX_INV_PER_MSG`].
    pub fn add_inv_vect(&mut self, iv: InvVect) -> Result<(), InventoryError> {
        if self.invs.len() >= MAX_INV_PER_MSG {
            return Err(InventoryError::TooManyVectors {
                max: MAX_INV_PER_MSG,
            });
        }
        self.invs.push(iv);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.invs.len() >= MAX_INV_PER_MSG
    }

    pub fn invs(&self) -> &[InvVect] {
        &self.invs
    }

    pub fn len(&self) -> usize {
        self.invs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invs.is_empty()
    }
}

impl FromIterator<InvVect> for Inventory {
    /// Collects at most [`MAX_INV_PER_MSG`] vectors; the rest are dropped.
    fn from_iter<I: IntoIterator<Item = InvVect>>(iter: I) -> Self {
        Self {
            invs: iter.into_iter().take(MAX_INV_PER_MSG).collect(),
        }
    }
}
