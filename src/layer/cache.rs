//! Fixed-capacity key/value cache for one layer

use crate::{Error, Result};

/// Keys and values for every position of one layer
///
/// Both arenas are `max_seq_len * kv_dim` floats. Position `p` occupies
/// `[p * kv_dim, (p + 1) * kv_dim)`; positions are written in order and
/// rewriting an earlier position discards everything after it.
#[derive(Debug, Clone)]
pub struct KvCache {
    keys: Vec<f32>,
    values: Vec<f32>,
    kv_dim: usize,
    max_seq_len: usize,
    /// Number of filled positions
    len: usize,
}

impl KvCache {
    pub fn new(max_seq_len: usize, kv_dim: usize) -> Self {
        Self {
            keys: vec![0.0; max_seq_len * kv_dim],
            values: vec![0.0; max_seq_len * kv_dim],
            kv_dim,
            max_seq_len,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_seq_len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kv_dim(&self) -> usize {
        self.kv_dim
    }

    /// Can `pos` be written next?
    pub fn check_position(&self, pos: usize) -> Result<()> {
        if pos >= self.max_seq_len {
            return Err(Error::Generation(format!(
                "position {} exceeds context length {}",
                pos, self.max_seq_len
            )));
        }
        if pos > self.len {
            return Err(Error::Generation(format!(
                "position {} skips ahead of {} cached positions",
                pos, self.len
            )));
        }
        Ok(())
    }

    /// Store the key and value vectors for `pos`
    pub fn write(&mut self, pos: usize, key: &[f32], value: &[f32]) -> Result<()> {
        self.check_position(pos)?;
        debug_assert_eq!(key.len(), self.kv_dim);
        debug_assert_eq!(value.len(), self.kv_dim);

        let slot = pos * self.kv_dim..(pos + 1) * self.kv_dim;
        self.keys[slot.clone()].copy_from_slice(key);
        self.values[slot].copy_from_slice(value);
        self.len = pos + 1;
        Ok(())
    }

    /// Key vector at `pos`
    pub fn key(&self, pos: usize) -> &[f32] {
        &self.keys[pos * self.kv_dim..(pos + 1) * self.kv_dim]
    }

    /// Value vector at `pos`
    pub fn value(&self, pos: usize) -> &[f32] {
        &self.values[pos * self.kv_dim..(pos + 1) * self.kv_dim]
    }

    /// Copy one head's keys for positions `0..positions` into contiguous
    /// `[positions, head_dim]` rows
    pub fn gather_keys(&self, kv_head: usize, head_dim: usize, positions: usize, out: &mut [f32]) {
        gather(&self.keys, self.kv_dim, kv_head, head_dim, positions, out);
    }

    /// Value counterpart of [`KvCache::gather_keys`]
    pub fn gather_values(&self, kv_head: usize, head_dim: usize, positions: usize, out: &mut [f32]) {
        gather(&self.values, self.kv_dim, kv_head, head_dim, positions, out);
    }

    /// Forget all positions
    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn size_in_bytes(&self) -> usize {
        (self.keys.len() + self.values.len()) * std::mem::size_of::<f32>()
    }
}

fn gather(arena: &[f32], kv_dim: usize, kv_head: usize, head_dim: usize, positions: usize, out: &mut [f32]) {
    let offset = kv_head * head_dim;
    for (t, row) in out[..positions * head_dim].chunks_exact_mut(head_dim).enumerate() {
        let start = t * kv_dim + offset;
        row.copy_from_slice(&arena[start..start + head_dim]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_layout() {
        let mut cache = KvCache::new(4, 6);
        let k0: Vec<f32> = (0..6).map(|i| i as f32).collect();
        let k1: Vec<f32> = (10..16).map(|i| i as f32).collect();
        cache.write(0, &k0, &k0).unwrap();
        cache.write(1, &k1, &k1).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.key(1), &k1[..]);
        assert_eq!(&cache.keys[6..12], &k1[..]);

        // head 1 of width 3 covers channels 3..6 of each slot
        let mut rows = vec![0.0; 6];
        cache.gather_keys(1, 3, 2, &mut rows);
        assert_eq!(rows, vec![3.0, 4.0, 5.0, 13.0, 14.0, 15.0]);
        cache.gather_values(0, 3, 1, &mut rows);
        assert_eq!(&rows[..3], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_position_bounds() {
        let mut cache = KvCache::new(2, 1);
        assert!(cache.write(1, &[1.0], &[1.0]).is_err());
        cache.write(0, &[1.0], &[1.0]).unwrap();
        cache.write(1, &[2.0], &[2.0]).unwrap();
        assert!(matches!(
            cache.write(2, &[3.0], &[3.0]),
            Err(Error::Generation(_))
        ));

        // rewriting position 0 truncates
        cache.write(0, &[5.0], &[5.0]).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.value(0), &[5.0]);

        cache.clear();
        assert!(cache.is_empty());
    }
}
