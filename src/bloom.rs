use crate::error::{GraphError, Result};

/// Space-efficient set membership over entity ids. Used to skip shards that
/// cannot contain a subject and to prune chunk reads. Adds only: membership
/// is monotonic, the count tracks logical occupancy.
#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    capacity: u32,
    target_fpr: f32,
    m: u32,
    k: u8,
    count: u32,
    bits: Vec<u8>,
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8], seed_tail: bool) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if seed_tail {
        hash ^= 0x00;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

impl BloomFilter {
    /// Derive (m, k) from capacity and target false-positive rate using the
    /// standard formulas.
    pub fn new(capacity: u32, target_fpr: f64) -> Self {
        let n = capacity.max(1) as f64;
        let p = target_fpr.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = ((-n * p.ln()) / (ln2 * ln2)).ceil().max(8.0) as u32;
        let k = ((m as f64 / n) * ln2).round().max(1.0) as u8;
        BloomFilter {
            capacity,
            target_fpr: target_fpr as f32,
            m,
            k,
            count: 0,
            bits: vec![0u8; m.div_ceil(8) as usize],
        }
    }

    pub fn add(&mut self, item: &[u8]) {
        let h1 = fnv1a(item, false);
        let h2 = fnv1a(item, true);
        for i in 0..self.k as u64 {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % self.m as u64) as usize;
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
        self.count = self.count.saturating_add(1);
    }

    pub fn add_many<'a>(&mut self, items: impl IntoIterator<Item = &'a [u8]>) {
        for item in items {
            self.add(item);
        }
    }

    /// false => definitely absent; true => possibly present.
    pub fn might_exist(&self, item: &[u8]) -> bool {
        let h1 = fnv1a(item, false);
        let h2 = fnv1a(item, true);
        (0..self.k as u64).all(|i| {
            let bit = (h1.wrapping_add(i.wrapping_mul(h2)) % self.m as u64) as usize;
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Logical occupancy. Deletes decrement this without clearing bits.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn decrement_count(&mut self) {
        self.count = self.count.saturating_sub(1);
    }

    /// Compact little-endian form:
    /// `capacity u32 | target_fpr f32 | m u32 | k u8 | count u32 | bits`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + self.bits.len());
        out.extend_from_slice(&self.capacity.to_le_bytes());
        out.extend_from_slice(&self.target_fpr.to_le_bytes());
        out.extend_from_slice(&self.m.to_le_bytes());
        out.push(self.k);
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 17 {
            return Err(GraphError::Fatal(format!(
                "bloom filter truncated: {} bytes",
                bytes.len()
            )));
        }
        let capacity = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let target_fpr = f32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let m = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let k = bytes[12];
        let count = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        let bit_bytes = m.div_ceil(8) as usize;
        if bytes.len() != 17 + bit_bytes {
            return Err(GraphError::Fatal(format!(
                "bloom filter corrupt: expected {} bit bytes, got {}",
                bit_bytes,
                bytes.len() - 17
            )));
        }
        Ok(BloomFilter {
            capacity,
            target_fpr,
            m,
            k,
            count,
            bits: bytes[17..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        let items: Vec<String> = (0..500)
            .map(|i| format!("https://example.com/people/user{i}"))
            .collect();
        for item in &items {
            filter.add(item.as_bytes());
        }
        for item in &items {
            assert!(filter.might_exist(item.as_bytes()), "false negative for {item}");
        }
        assert_eq!(filter.count(), 500);
    }

    #[test]
    fn test_absent_items_mostly_rejected() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.add(format!("https://example.com/a/{i}").as_bytes());
        }
        let false_positives = (0..1000)
            .filter(|i| filter.might_exist(format!("https://example.com/b/{i}").as_bytes()))
            .count();
        // 1% target; allow generous slack.
        assert!(false_positives < 100, "{false_positives} false positives");
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut filter = BloomFilter::new(64, 0.001);
        filter.add_many(
            ["https://a.example.com/x", "https://b.example.com/y"]
                .iter()
                .map(|s| s.as_bytes()),
        );
        let bytes = filter.serialize();
        let back = BloomFilter::deserialize(&bytes).unwrap();
        assert_eq!(back, filter);
        assert!(back.might_exist(b"https://a.example.com/x"));
    }

    #[test]
    fn test_deserialize_rejects_truncated() {
        let filter = BloomFilter::new(64, 0.01);
        let mut bytes = filter.serialize();
        bytes.truncate(bytes.len() - 1);
        assert!(BloomFilter::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_count_decrement_keeps_membership() {
        let mut filter = BloomFilter::new(16, 0.01);
        filter.add(b"https://example.com/x");
        filter.decrement_count();
        assert_eq!(filter.count(), 0);
        assert!(filter.might_exist(b"https://example.com/x"));
    }
}
