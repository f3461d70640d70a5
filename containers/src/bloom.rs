/// Bloom filters loaded by light peers.
///
/// A peer sends `filterload` to install a filter, `filteradd` to insert extra
/// data elements and `filterclear` to drop it. While a filter is loaded only
/// matching transactions are announced to that peer.
use crate::{Block, MerkleBlock, OutPoint, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum size of a loaded filter in bytes.
pub const MAX_FILTER_LOAD_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions a filter may use.
pub const MAX_FILTER_LOAD_HASH_FUNCS: u32 = 50;

/// Maximum size of a single element added through `filteradd`.
pub const MAX_FILTER_ADD_DATA_SIZE: usize = 520;

const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

/// Multiplier mixing the hash function index into the murmur seed.
const SEED_MULTIPLIER: u32 = 0xfba4_c795;

/// What to insert into the filter when an output matches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloomUpdateType {
    /// Never update the filter.
    #[default]
    None,
    /// Insert the outpoint of every matching output.
    All,
    /// Insert the outpoint only for pay-to-pubkey outputs.
    P2PubkeyOnly,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter size {size} exceeds maximum {max}")]
    FilterTooLarge { size: usize, max: usize },
    #[error("too many hash functions: {count} > {max}")]
    TooManyHashFuncs { count: u32, max: u32 },
    #[error("filteradd data size {size} exceeds maximum {max}")]
    DataTooLarge { size: usize, max: usize },
}

/// Contents of a `filterload` message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterLoad {
    pub filter: Vec<u8>,
    pub hash_funcs: u32,
    pub tweak: u32,
    pub flags: BloomUpdateType,
}

impl FilterLoad {
    /// Builds an empty filter sized for `elements` entries at the requested
    /// false-positive rate.
    pub fn with_params(elements: u32, fp_rate: f64, tweak: u32, flags: BloomUpdateType) -> Self {
        let fp_rate = fp_rate.clamp(1e-9, 1.0);
        let elements = elements.max(1) as f64;
        let max_bits = (MAX_FILTER_LOAD_FILTER_SIZE * 8) as f64;

        let bits = (-elements * fp_rate.ln() / LN2_SQUARED).min(max_bits);
        let bytes = ((bits / 8.0) as usize).max(1);
        let hash_funcs = ((bytes * 8) as f64 / elements * std::f64::consts::LN_2) as u32;
        let hash_funcs = hash_funcs.clamp(1, MAX_FILTER_LOAD_HASH_FUNCS);

        Self {
            filter: vec![0u8; bytes],
            hash_funcs,
            tweak,
            flags,
        }
    }

    fn validate(&self) -> Result<(), FilterError> {
        if self.filter.len() > MAX_FILTER_LOAD_FILTER_SIZE {
            return Err(FilterError::FilterTooLarge {
                size: self.filter.len(),
                max: MAX_FILTER_LOAD_FILTER_SIZE,
            });
        }
        if self.hash_funcs > MAX_FILTER_LOAD_HASH_FUNCS {
            return Err(FilterError::TooManyHashFuncs {
                count: self.hash_funcs,
                max: MAX_FILTER_LOAD_HASH_FUNCS,
            });
        }
        Ok(())
    }
}

/// A peer's bloom filter. Starts unloaded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BloomFilter {
    loaded: Option<FilterLoad>,
}

impl BloomFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Replaces the current filter (loaded or not) with `msg`.
    pub fn reload(&mut self, msg: FilterLoad) -> Result<(), FilterError> {
        msg.validate()?;
        self.loaded = Some(msg);
        Ok(())
    }

    pub fn unload(&mut self) {
        self.loaded = None;
    }

    /// Inserts a data element. Ignored when no filter is loaded.
    pub fn add(&mut self, data: &[u8]) -> Result<(), FilterError> {
        if data.len() > MAX_FILTER_ADD_DATA_SIZE {
            return Err(FilterError::DataTooLarge {
                size: data.len(),
                max: MAX_FILTER_ADD_DATA_SIZE,
            });
        }
        if let Some(filter) = self.loaded.as_mut() {
            insert(filter, data);
        }
        Ok(())
    }

    /// True when `data` may be in the set. Always false when unloaded.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|filter| contains(filter, data))
    }

    /// Matches a transaction against the filter, inserting the outpoints of
    /// matched outputs according to the update flags.
    pub fn match_tx_and_update(&mut self, tx: &Transaction) -> bool {
        let Some(filter) = self.loaded.as_mut() else {
            return false;
        };

        let tx_hash = tx.tx_hash();
        let mut matched = contains(filter, tx_hash.as_bytes());

        for (index, output) in tx.outputs.iter().enumerate() {
            if output.pk_script.is_empty() || !contains(filter, &output.pk_script) {
                continue;
            }
            matched = true;
            let update = match filter.flags {
                BloomUpdateType::None => false,
                BloomUpdateType::All => true,
                BloomUpdateType::P2PubkeyOnly => is_pay_to_pubkey(&output.pk_script),
            };
            if update {
                insert(filter, &OutPoint::new(tx_hash, index as u32).to_bytes());
            }
        }

        if matched {
            return true;
        }

        tx.inputs.iter().any(|input| {
            contains(filter, &input.previous_out.to_bytes())
                || (!input.sign_script.is_empty() && contains(filter, &input.sign_script))
        })
    }

    /// Builds a merkle block for `block`, returning it with the indices of
    /// matched transactions.
    pub fn filter_block(&mut self, block: &Block) -> (MerkleBlock, Vec<usize>) {
        let mut matched = Vec::new();
        let mut indices = Vec::new();
        for (index, tx) in block.transactions.iter().enumerate() {
            if self.match_tx_and_update(tx) {
                matched.push(tx.tx_hash());
                indices.push(index);
            }
        }
        let merkle = MerkleBlock {
            header: block.header.clone(),
            total_transactions: block.transactions.len() as u32,
            matched,
        };
        (merkle, indices)
    }
}

fn bit_index(filter: &FilterLoad, hash_num: u32, data: &[u8]) -> usize {
    let seed = hash_num.wrapping_mul(SEED_MULTIPLIER).wrapping_add(filter.tweak);
    (murmur_hash3(seed, data) as usize) % (filter.filter.len() * 8)
}

fn insert(filter: &mut FilterLoad, data: &[u8]) {
    if filter.filter.is_empty() {
        return;
    }
    for hash_num in 0..filter.hash_funcs {
        let idx = bit_index(filter, hash_num, data);
        filter.filter[idx >> 3] |= 1 << (idx & 7);
    }
}

fn contains(filter: &FilterLoad, data: &[u8]) -> bool {
    if filter.filter.is_empty() {
        return false;
    }
    (0..filter.hash_funcs).all(|hash_num| {
        let idx = bit_index(filter, hash_num, data);
        filter.filter[idx >> 3] & (1 << (idx & 7)) != 0
    })
}

/// `<33 or 65 byte pubkey> OP_CHECKSIG`
fn is_pay_to_pubkey(script: &[u8]) -> bool {
    const OP_CHECKSIG: u8 = 0xac;
    matches!(
        (script.len(), script.first(), script.last()),
        (35, Some(0x21), Some(&OP_CHECKSIG)) | (67, Some(0x41), Some(&OP_CHECKSIG))
    )
}

/// 32-bit MurmurHash3 (x86 variant).
pub fn murmur_hash3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            .wrapping_mul(C1)
            .rotate_left(15)
            .wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, byte) in tail.iter().enumerate() {
            k1 ^= u32::from(*byte) << (8 * i);
        }
        h1 ^= k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Amount, TxInput, TxOutput};
    use rstest::rstest;

    #[rstest]
    #[case(0x0000_0000, 0x0000_0000, &[])]
    #[case(0x6a39_6f08, 0xfba4_c795, &[])]
    #[case(0x81f1_6f39, 0xffff_ffff, &[])]
    #[case(0x514e_28b7, 0x0000_0000, &[0x00])]
    #[case(0xea3f_0b17, 0xfba4_c795, &[0x00])]
    #[case(0xfd6c_f10d, 0x0000_0000, &[0xff])]
    fn test_murmur_vectors(#[case] expected: u32, #[case] seed: u32, #[case] data: &[u8]) {
        assert_eq!(murmur_hash3(seed, data), expected);
    }

    fn loaded(flags: BloomUpdateType) -> BloomFilter {
        let mut filter = BloomFilter::new();
        filter
            .reload(FilterLoad::with_params(10, 0.0001, 0, flags))
            .unwrap();
        filter
    }

    #[test]
    fn test_unloaded_filter_matches_nothing() {
        let mut filter = BloomFilter::new();
        filter.add(b"data").unwrap();
        assert!(!filter.is_loaded());
        assert!(!filter.matches(b"data"));
    }

    #[test]
    fn test_add_then_match() {
        let mut filter = loaded(BloomUpdateType::None);
        filter.add(b"hello").unwrap();
        assert!(filter.matches(b"hello"));
        assert!(!filter.matches(b"goodbye"));
    }

    #[test]
    fn test_add_rejects_oversized_data() {
        let mut filter = loaded(BloomUpdateType::None);
        let data = vec![0u8; MAX_FILTER_ADD_DATA_SIZE + 1];
        assert!(matches!(
            filter.add(&data),
            Err(FilterError::DataTooLarge { .. })
        ));
    }

    #[test]
    fn test_reload_validates_parameters() {
        let mut filter = BloomFilter::new();
        let msg = FilterLoad {
            filter: vec![0; 8],
            hash_funcs: MAX_FILTER_LOAD_HASH_FUNCS + 1,
            tweak: 0,
            flags: BloomUpdateType::None,
        };
        assert!(filter.reload(msg).is_err());
        assert!(!filter.is_loaded());
    }

    #[test]
    fn test_match_tx_by_output_updates_outpoints() {
        let script = vec![0x76, 0xa9, 0x14, 0x01, 0x02];
        let mut filter = loaded(BloomUpdateType::All);
        filter.add(&script).unwrap();

        let funding = Transaction {
            outputs: vec![TxOutput {
                amount: Amount(10),
                pk_script: script,
            }],
            ..Default::default()
        };
        assert!(filter.match_tx_and_update(&funding));

        let spend = Transaction {
            inputs: vec![TxInput {
                previous_out: OutPoint::new(funding.tx_hash(), 0),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(filter.match_tx_and_update(&spend));
    }

    #[test]
    fn test_unload_clears() {
        let mut filter = loaded(BloomUpdateType::None);
        filter.unload();
        assert!(!filter.is_loaded());
    }
}
