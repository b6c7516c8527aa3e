use std::iter::FusedIterator;

use dyn_bits::BitsUsed;

use crate::{check_range, BucketedSeq, Error, MonotoneSeq, MAX_VALUE};

/// Initial bucket size used by [`AdaptiveSeq::new`].
const DEFAULT_BUCKET_SIZE: usize = 32;

/// Smallest allowed initial bucket size.
const MIN_BUCKET_SIZE: usize = 16;

/// Number of in-place bucket-size doublings before the first chunk is closed.
const MAX_DOUBLINGS: u32 = 7;

#[derive(Clone)]
struct Chunk {
    seq: BucketedSeq,
    /// Last value of the preceding chunk; chunk values are stored relative to it.
    prev_upper: u64,
}

impl BitsUsed for Chunk {
    fn bits_used_dyn(&self) -> u64 { self.seq.bits_used_dyn() }
    const USES_DYN_MEM: bool = true;
}

/// Append-only monotone sequence over a geometric schedule of Elias-Fano
/// chunks, so that no bucket size has to be tuned up front.
///
/// While the sequence is short, a single chunk is kept and its bucket size is
/// doubled (with an in-place rebuild) each time the length crosses
/// `bucket_size²/8`. After [`MAX_DOUBLINGS`] rebuilds every further threshold
/// breach closes the current chunk and opens a new one holding as many items
/// as everything before it, with bucket size `⌊√(4·threshold)⌋`. Each chunk
/// stores its values relative to the last value of the preceding chunk.
#[derive(Clone)]
pub struct AdaptiveSeq {
    len: usize,
    last: u64,
    threshold: usize,
    doublings: u32,
    initial_bucket_size: usize,
    /// Length at which the first chunk is closed; later chunk k covers
    /// indices `(n0·2^(k-1), n0·2^k]`.
    n0: usize,
    msb_n0: u32,
    chunks: Vec<Chunk>,
}

impl AdaptiveSeq {
    /// Returns an empty sequence with the default initial bucket size of 32.
    pub fn new() -> Self {
        Self::with_valid_bucket_size(DEFAULT_BUCKET_SIZE)
    }

    /// Returns an empty sequence with the given initial bucket size,
    /// which must be at least 16.
    pub fn with_bucket_size(initial_bucket_size: usize) -> Result<Self, Error> {
        if initial_bucket_size < MIN_BUCKET_SIZE {
            return Err(Error::BucketSizeTooSmall { bucket_size: initial_bucket_size, min: MIN_BUCKET_SIZE });
        }
        Ok(Self::with_valid_bucket_size(initial_bucket_size))
    }

    fn with_valid_bucket_size(initial_bucket_size: usize) -> Self {
        let n0 = {
            let scaled = initial_bucket_size << MAX_DOUBLINGS;
            scaled * scaled / 8
        };
        Self {
            len: 0,
            last: 0,
            threshold: initial_bucket_size * initial_bucket_size / 8,
            doublings: 0,
            initial_bucket_size,
            n0,
            msb_n0: n0.ilog2(),
            chunks: vec![Chunk {
                seq: BucketedSeq::with_valid_bucket_size(initial_bucket_size),
                prev_upper: 0,
            }],
        }
    }

    /// Returns the number of stored values.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Returns whether the sequence is empty.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns the value of the last item, or 0 if the sequence is empty.
    #[inline] pub fn last(&self) -> u64 { self.last }

    /// Returns the current bucket size.
    #[inline] pub fn bucket_size(&self) -> usize {
        self.chunks[self.chunks.len() - 1].seq.bucket_size()
    }

    /// Appends `value`, which must not be less than the current last item.
    /// Panics if `value` exceeds [`MAX_VALUE`].
    pub fn push(&mut self, value: u64) -> Result<(), Error> {
        assert!(value <= MAX_VALUE,
            "cannot push value {value} outside the supported universe (<= {MAX_VALUE})");
        if value < self.last {
            return Err(Error::NotMonotone { last: self.last, value });
        }
        let current = self.chunks.len() - 1;
        let chunk = &mut self.chunks[current];
        chunk.seq.push(value - chunk.prev_upper)?;
        self.len += 1;
        self.last = value;
        if self.len > self.threshold {
            self.breach()?;
        }
        Ok(())
    }

    /// Reacts to the length crossing the threshold: doubles the bucket size of
    /// the only chunk (rebuilding it), or closes the current chunk.
    fn breach(&mut self) -> Result<(), Error> {
        if self.doublings < MAX_DOUBLINGS {
            let chunk = &mut self.chunks[0];
            let bucket_size = chunk.seq.bucket_size() * 2;
            let mut rebuilt = BucketedSeq::with_capacity(bucket_size, 2 * self.len)?;
            for value in chunk.seq.iter() {
                rebuilt.push(value)?;
            }
            chunk.seq = rebuilt;
            self.doublings += 1;
            self.threshold = bucket_size * bucket_size / 8;
        } else {
            self.threshold *= 2;
            let bucket_size = (4 * self.threshold).isqrt();
            self.chunks.push(Chunk {
                seq: BucketedSeq::with_capacity(bucket_size, self.threshold / 2)?,
                prev_upper: self.last,
            });
        }
        Ok(())
    }

    /// Returns the chunk that holds item `index`; branch-free.
    fn chunk_of(&self, index: usize) -> usize {
        let d = (index | 1).ilog2().saturating_sub(self.msb_n0) as usize;
        d + (index > (self.n0 << d)) as usize
    }

    /// Returns the index of the first item of chunk `chunk`.
    #[inline] fn chunk_offset(&self, chunk: usize) -> usize {
        if chunk == 0 { 0 } else { (self.n0 << (chunk - 1)) + 1 }
    }

    /// Returns the value at `index`, or [`None`] if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len { return None; }
        let at = self.chunk_of(index);
        let chunk = &self.chunks[at];
        chunk.seq.get(index - self.chunk_offset(at)).map(|v| v + chunk.prev_upper)
    }

    /// Returns the smallest stored value greater than or equal to `value`,
    /// or [`None`] if there is no such value.
    #[inline] pub fn next_geq(&self, value: u64) -> Option<u64> {
        self.next_geq_entry(value).map(|(_, v)| v)
    }

    /// Returns the index of the first item with value greater than or equal
    /// to `value`, or [`None`] if there is no such item.
    #[inline] pub fn next_geq_index(&self, value: u64) -> Option<usize> {
        self.next_geq_entry(value).map(|(index, _)| index)
    }

    /// Returns the index of the first occurrence of `value`, or [`None`] if
    /// the sequence does not contain `value`.
    pub fn index_of(&self, value: u64) -> Option<usize> {
        self.next_geq_entry(value).and_then(|(index, v)| (v == value).then_some(index))
    }

    fn next_geq_entry(&self, value: u64) -> Option<(usize, u64)> {
        if self.len == 0 || value > self.last { return None; }
        if value == 0 { return Some((0, self.get(0)?)); }
        // the first chunk that can hold a value >= `value` is the last one
        // anchored below it; for value == last this picks the final chunk and
        // the inner search decides
        let index = self.chunks.partition_point(|chunk| chunk.prev_upper < value) - 1;
        let chunk = &self.chunks[index];
        let (offset, v) = chunk.seq.next_geq_entry(value - chunk.prev_upper)?;
        Some((self.chunk_offset(index) + offset, v + chunk.prev_upper))
    }

    /// Returns an iterator over all values.
    pub fn iter(&self) -> Iter {
        Iter { chunks: &self.chunks, chunk: 0, inner: None }
    }

    /// Copies the values at indices `from..=to` by iterating the sequence.
    pub fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> {
        check_range(from, to, self.len)?;
        Ok(self.iter().skip(from).take(to - from + 1).collect())
    }

    /// Removes all values and releases the backing storage.
    pub fn clear(&mut self) {
        *self = Self::with_valid_bucket_size(self.initial_bucket_size);
    }

    /// Reduces the backing capacity of all chunks to their current content.
    pub fn trim_to_size(&mut self) {
        for chunk in &mut self.chunks {
            chunk.seq.trim_to_size();
        }
        self.chunks.shrink_to_fit();
    }
}

impl Default for AdaptiveSeq {
    fn default() -> Self { Self::new() }
}

impl BitsUsed for AdaptiveSeq {
    fn bits_used_dyn(&self) -> u64 { self.chunks.bits_used_dyn() }
    const USES_DYN_MEM: bool = true;
}

impl MonotoneSeq for AdaptiveSeq {
    #[inline] fn len(&self) -> usize { self.len }
    #[inline] fn last(&self) -> u64 { self.last }
    #[inline] fn push(&mut self, value: u64) -> Result<(), Error> { AdaptiveSeq::push(self, value) }
    #[inline] fn get(&self, index: usize) -> Option<u64> { AdaptiveSeq::get(self, index) }
    #[inline] fn next_geq(&self, value: u64) -> Option<u64> { AdaptiveSeq::next_geq(self, value) }
    #[inline] fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> { AdaptiveSeq::sub_list(self, from, to) }
    #[inline] fn clear(&mut self) { AdaptiveSeq::clear(self) }
    #[inline] fn trim_to_size(&mut self) { AdaptiveSeq::trim_to_size(self) }
}

impl<'a> IntoIterator for &'a AdaptiveSeq {
    type Item = u64;
    type IntoIter = Iter<'a>;
    #[inline] fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Iterator over [`AdaptiveSeq`] values, chaining the chunks in order.
pub struct Iter<'a> {
    chunks: &'a [Chunk],
    chunk: usize,
    inner: Option<(crate::bucketed::Iter<'a>, u64)>,
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if let Some((inner, prev_upper)) = &mut self.inner {
                if let Some(value) = inner.next() { return Some(value + *prev_upper); }
                self.inner = None;
            }
            let chunk = self.chunks.get(self.chunk)?;
            self.inner = Some((chunk.seq.iter(), chunk.prev_upper));
            self.chunk += 1;
        }
    }
}

impl FusedIterator for Iter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction() {
        assert_eq!(AdaptiveSeq::with_bucket_size(15).err(),
            Some(Error::BucketSizeTooSmall { bucket_size: 15, min: 16 }));
        let seq = AdaptiveSeq::new();
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.bucket_size(), 32);
        assert_eq!(seq.n0, 2_097_152);
    }

    #[test]
    fn doubling_keeps_contents() {
        // thresholds for the initial bucket size 16: 32, 128, 512, ...
        let mut seq = AdaptiveSeq::with_bucket_size(16).unwrap();
        let values: Vec<u64> = (0..2000u64).map(|v| v * 7 % 5 + v * 3).collect();
        for &value in &values { seq.push(value).unwrap(); }
        assert!(seq.bucket_size() > 16);
        assert_eq!(seq.len(), values.len());
        for (index, value) in values.iter().enumerate() {
            assert_eq!(seq.get(index), Some(*value), "get({index})");
        }
        assert_eq!(seq.iter().collect::<Vec<_>>(), values);
    }

    #[test]
    fn not_monotone() {
        let mut seq = AdaptiveSeq::new();
        seq.push(10).unwrap();
        assert_eq!(seq.push(9), Err(Error::NotMonotone { last: 10, value: 9 }));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn search_small() {
        let mut seq = AdaptiveSeq::new();
        for value in [0u64, 1, 801, 920, 920, 999] { seq.push(value).unwrap(); }
        assert_eq!(seq.next_geq(0), Some(0));
        assert_eq!(seq.next_geq(2), Some(801));
        assert_eq!(seq.next_geq(801), Some(801));
        assert_eq!(seq.next_geq(920), Some(920));
        assert_eq!(seq.next_geq_index(920), Some(3));
        assert_eq!(seq.next_geq(999), Some(999));
        assert_eq!(seq.next_geq(1000), None);
        assert_eq!(seq.index_of(920), Some(3));
        assert_eq!(seq.index_of(2), None);
        assert_eq!(seq.sub_list(1, 3).unwrap(), [1, 801, 920]);
    }

    #[test]
    fn chunk_locator() {
        let seq = AdaptiveSeq::new();
        let n0 = seq.n0;
        assert_eq!(seq.chunk_of(0), 0);
        assert_eq!(seq.chunk_of(1), 0);
        assert_eq!(seq.chunk_of(n0 - 1), 0);
        assert_eq!(seq.chunk_of(n0), 0);
        assert_eq!(seq.chunk_of(n0 + 1), 1);
        assert_eq!(seq.chunk_of(2 * n0 - 1), 1);
        assert_eq!(seq.chunk_of(2 * n0), 1);
        assert_eq!(seq.chunk_of(2 * n0 + 1), 2);
        assert_eq!(seq.chunk_of(4 * n0), 2);
        assert_eq!(seq.chunk_of(4 * n0 + 1), 3);
        assert_eq!(seq.chunk_of(8 * n0), 3);
        assert_eq!(seq.chunk_offset(1), n0 + 1);
        assert_eq!(seq.chunk_offset(2), 2 * n0 + 1);
        assert_eq!(seq.chunk_offset(3), 4 * n0 + 1);
    }

    #[test]
    fn crosses_into_second_chunk() {
        // the smallest allowed initial bucket size keeps n0 at 2^19
        let mut seq = AdaptiveSeq::with_bucket_size(16).unwrap();
        let count = seq.n0 + seq.n0 / 2;
        let mut value = 0u64;
        let mut values = Vec::with_capacity(count);
        for step in 0..count {
            value += (step as u64 * 31) % 101 + 1;
            values.push(value);
            seq.push(value).unwrap();
        }
        assert_eq!(seq.chunks.len(), 2);
        assert_eq!(seq.len(), count);
        for index in (0..count).step_by(1013) {
            assert_eq!(seq.get(index), Some(values[index]), "get({index})");
        }
        assert_eq!(seq.get(seq.n0), Some(values[seq.n0]));
        assert_eq!(seq.get(seq.n0 + 1), Some(values[seq.n0 + 1]));
        for probe_index in (0..count).step_by(9973) {
            let probe = values[probe_index];
            assert_eq!(seq.next_geq(probe), Some(probe), "next_geq({probe})");
            assert_eq!(seq.get(seq.next_geq_index(probe).unwrap()), Some(probe));
        }
        assert_eq!(seq.next_geq(values[count - 1] + 1), None);
        let copied = seq.sub_list(seq.n0 - 2, seq.n0 + 2).unwrap();
        assert_eq!(copied, &values[seq.n0 - 2..=seq.n0 + 2]);
    }

    #[test]
    fn clear_and_reuse() {
        let mut seq = AdaptiveSeq::new();
        for value in 0..1000u64 { seq.push(value).unwrap(); }
        seq.clear();
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.bucket_size(), 32);
        seq.push(3).unwrap();
        assert_eq!(seq.get(0), Some(3));
    }

    #[test]
    #[ignore = "uses much memory and time"]
    fn multi_million_random_gaps() {
        use rand::{rngs::SmallRng, Rng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(11870);
        let mut seq = AdaptiveSeq::new();
        let count = 3_000_000usize;
        let mut values = Vec::with_capacity(count);
        let mut value = 0u64;
        for _ in 0..count {
            value += rng.random_range(1..=2000);
            values.push(value);
            seq.push(value).unwrap();
        }
        assert!(seq.chunks.len() > 1);
        for index in (0..count).step_by(4999) {
            assert_eq!(seq.get(index), Some(values[index]));
        }
        let top = *values.last().unwrap();
        for _ in 0..10_000 {
            let probe = rng.random_range(0..=top);
            let found = seq.next_geq(probe).unwrap();
            let index = seq.next_geq_index(probe).unwrap();
            assert_eq!(seq.get(index), Some(found));
            assert!(found >= probe);
            if index > 0 {
                assert!(seq.get(index - 1).unwrap() < probe);
            }
        }
    }
}
