use std::iter::FusedIterator;

use bitv::{n_lowest_bits, BitVector, PackedVector, SampledSelect};
use dyn_bits::BitsUsed;

/// One Elias-Fano encoded bucket: packed low bits, unary-coded upper bits and
/// a select index over them. The lower-bit width and the `prev_upper` anchor
/// are kept by the owner, in its info vector, and passed back for decoding.
#[derive(Clone)]
pub(crate) struct EncodedBucket {
    pub(crate) low: PackedVector,
    pub(crate) high: BitVector,
    pub(crate) select: SampledSelect,
}

/// Encodes `values` (non-decreasing, all at least `prev_upper`) as a bucket
/// anchored at `prev_upper`. Returns the bucket and its lower-bit width.
pub(crate) fn encode_bucket(values: &[u64], prev_upper: u64) -> (EncodedBucket, u8) {
    debug_assert!(values.windows(2).all(|w| w[0] <= w[1]));
    debug_assert!(values.first().map_or(true, |&v| v >= prev_upper));
    if values.is_empty() {
        let high = BitVector::with_len(1);
        let select = SampledSelect::build(&high);
        return (EncodedBucket { low: PackedVector::new(0), high, select }, 0);
    }
    let universe = values[values.len() - 1] - prev_upper;
    let low_width = (universe / values.len() as u64).checked_ilog2().unwrap_or(0) as u8;
    let mut low = PackedVector::with_capacity(low_width, values.len());
    let mut high = BitVector::with_len(values.len() + (universe >> low_width) as usize + 1);
    for (index, value) in values.iter().enumerate() {
        let diff = value - prev_upper;
        high.set((diff >> low_width) as usize + index);
        low.push(diff & n_lowest_bits(low_width));
    }
    let select = SampledSelect::build(&high);
    (EncodedBucket { low, high, select }, low_width)
}

impl EncodedBucket {
    /// Returns the number of encoded values.
    #[inline] pub(crate) fn len(&self) -> usize { self.low.len() }

    /// Decodes the value at `index`, or [`None`] if `index` is out of bounds.
    pub(crate) fn get(&self, index: usize, low_width: u8, prev_upper: u64) -> Option<u64> {
        let position = self.select.select1(&self.high, index)?;
        let upper = (position - index) as u64;
        Some(((upper << low_width) | self.low.try_get(index)?) + prev_upper)
    }

    /// Sequential decoder over the first `limit` values.
    pub(crate) fn iter(&self, low_width: u8, prev_upper: u64, limit: usize) -> BucketIter {
        BucketIter {
            bucket: self,
            low_width,
            prev_upper,
            index: 0,
            cursor: 0,
            limit: limit.min(self.len()),
        }
    }

    /// Sequential decoder starting at item `from`, with the upper-bits cursor
    /// seeded by a select query.
    pub(crate) fn iter_from(&self, low_width: u8, prev_upper: u64, from: usize) -> BucketIter {
        let cursor = self.select.select1(&self.high, from).unwrap_or(0);
        BucketIter {
            bucket: self,
            low_width,
            prev_upper,
            index: from,
            cursor,
            limit: self.len(),
        }
    }
}

impl BitsUsed for EncodedBucket {
    fn bits_used_dyn(&self) -> u64 {
        self.low.bits_used_dyn() + self.high.bits_used_dyn() + self.select.bits_used_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

/// Decodes the values of one bucket in sequence, keeping a running next-one
/// cursor over the upper-bits bitmap.
pub(crate) struct BucketIter<'a> {
    bucket: &'a EncodedBucket,
    low_width: u8,
    prev_upper: u64,
    index: usize,
    cursor: usize,
    limit: usize,
}

impl Iterator for BucketIter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.index == self.limit { return None; }
        let position = self.bucket.high.next_one(self.cursor)?;
        let upper = (position - self.index) as u64;
        let value = ((upper << self.low_width) | self.bucket.low.try_get(self.index)?) + self.prev_upper;
        self.index += 1;
        self.cursor = position + 1;
        Some(value)
    }
}

impl FusedIterator for BucketIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_round_trip(values: &[u64], prev_upper: u64) {
        let (bucket, low_width) = encode_bucket(values, prev_upper);
        assert_eq!(bucket.len(), values.len());
        assert_eq!(bucket.high.count_ones(), values.len(), "one bit per encoded value");
        for (index, value) in values.iter().enumerate() {
            assert_eq!(bucket.get(index, low_width, prev_upper), Some(*value), "get({index})");
        }
        assert_eq!(bucket.get(values.len(), low_width, prev_upper), None);
        let decoded: Vec<u64> = bucket.iter(low_width, prev_upper, values.len()).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn dense() {
        check_round_trip(&[0, 1, 3, 3, 5], 0);
    }

    #[test]
    fn sparse() {
        check_round_trip(&[0, 1, 801, 920, 999], 0);
    }

    #[test]
    fn anchored() {
        check_round_trip(&[1000, 1000, 1024, 1963, 2001], 1000);
    }

    #[test]
    fn single_and_empty() {
        check_round_trip(&[42], 40);
        check_round_trip(&[], 7);
    }

    #[test]
    fn low_width_bound() {
        for (values, prev_upper) in [
            (vec![5u64, 6, 7, 8], 5),
            (vec![0, 1 << 20, 1 << 21, 1 << 22], 0),
            (vec![100, 100, 100, 100], 100),
        ] {
            let universe = values[values.len() - 1] - prev_upper;
            let (_, low_width) = encode_bucket(&values, prev_upper);
            assert!(low_width as u32 <= universe.checked_ilog2().unwrap_or(0),
                "low width {low_width} for universe {universe}");
        }
    }

    #[test]
    fn iter_from_mid_bucket() {
        let values = [10u64, 11, 50, 90, 91, 200, 333, 334];
        let (bucket, low_width) = encode_bucket(&values, 10);
        let tail: Vec<u64> = bucket.iter_from(low_width, 10, 3).collect();
        assert_eq!(tail, &values[3..]);
        assert_eq!(bucket.iter_from(low_width, 10, 8).count(), 0);
    }

    #[test]
    fn iter_limit() {
        let values = [3u64, 4, 5, 6];
        let (bucket, low_width) = encode_bucket(&values, 0);
        let head: Vec<u64> = bucket.iter(low_width, 0, 2).collect();
        assert_eq!(head, &[3, 4]);
    }
}
