use std::iter::FusedIterator;

use dyn_bits::BitsUsed;

use crate::bucket::{encode_bucket, BucketIter};
use crate::bucketed::{info_upper, info_width, info_word};
use crate::{check_range, BucketedSeq, Error, MonotoneSeq, PrefixSumVec, ResizableVec, MAX_VALUE};

/// Smallest usable per-bucket edit log.
const MIN_LOG_CAP: usize = 2;

/// Edit-capable monotone sequence: a bucketed Elias-Fano backbone with
/// per-bucket sorted logs of pending additions and deletions that are folded
/// into the compressed form whenever a log fills.
///
/// Created by [`BucketedSeq::dynamize`]. Reads reconcile each compressed
/// bucket with its pending edits through a three-way merge; folding a full
/// log splits the bucket, merges it with its successor or rebuilds it in
/// place, depending on the resulting size. Values in the uncompressed tail
/// buffer are edited directly.
#[derive(Clone)]
pub struct DynamicSeq {
    seq: BucketedSeq,
    adds: Vec<ResizableVec<u64>>,
    dels: Vec<ResizableVec<u64>>,
    /// Logical (post-edit) length of every bucket, tail included, as prefix sums.
    sizes: PrefixSumVec,
    log_cap: usize,
}

impl DynamicSeq {
    pub(crate) fn new(seq: BucketedSeq) -> Result<Self, Error> {
        let bucket_size = seq.bucket_size;
        if bucket_size < 2 * MIN_LOG_CAP {
            return Err(Error::EditLogTooSmall { bucket_size });
        }
        let log2_len = seq.len.max(2).ilog2() as usize;
        let log_cap = (bucket_size / (2 * log2_len)).div_ceil(2).max(MIN_LOG_CAP);
        let flushed = seq.buckets.len();
        let mut sizes = PrefixSumVec::new(bucket_size as u64, flushed);
        sizes.add_int(flushed, seq.buffer.len() as u64);
        Ok(Self {
            adds: vec![ResizableVec::with_max_capacity(log_cap); flushed],
            dels: vec![ResizableVec::with_max_capacity(log_cap); flushed],
            sizes,
            log_cap,
            seq,
        })
    }

    /// Returns the number of stored values.
    #[inline] pub fn len(&self) -> usize { self.seq.len }

    /// Returns whether the sequence is empty.
    #[inline] pub fn is_empty(&self) -> bool { self.seq.len == 0 }

    /// Returns the value of the last item, or 0 if the sequence is empty.
    #[inline] pub fn last(&self) -> u64 { self.seq.last }

    /// Returns the bucket size.
    #[inline] pub fn bucket_size(&self) -> usize { self.seq.bucket_size }

    /// Inserts `value` at its sorted position; equal values are kept
    /// (multiset semantics). Panics if `value` exceeds [`MAX_VALUE`].
    pub fn add(&mut self, value: u64) {
        assert!(value <= MAX_VALUE,
            "cannot add value {value} outside the supported universe (<= {MAX_VALUE})");
        let flushed = self.seq.buckets.len();
        if flushed == 0 || value > self.seq.tail_upper {
            let at = self.seq.buffer.partition_point(|&v| v <= value);
            self.seq.buffer.insert(at, value);
            self.seq.len += 1;
            self.sizes.incr(flushed);
            if value >= self.seq.last {
                self.seq.set_last(value);
            }
            if self.seq.buffer.len() == self.seq.bucket_size {
                self.flush_tail();
            }
        } else {
            // when deletions have dragged the last value below `tail_upper`,
            // the search runs past the end; such values belong to the final bucket
            let bucket = self.seq.search_bucket(value).min(flushed - 1);
            let log = &mut self.adds[bucket];
            let at = log.partition_point(|&v| v <= value);
            log.insert(at, value);
            self.seq.len += 1;
            self.sizes.incr(bucket);
            if value > self.seq.last {
                self.seq.set_last(value);
            }
            if self.adds[bucket].len() == self.log_cap {
                self.flush_bucket(bucket);
            }
        }
    }

    /// Removes one occurrence of `value`. Returns whether it was present.
    pub fn remove(&mut self, value: u64) -> bool {
        if self.seq.len == 0 || value > self.seq.last { return false; }
        let flushed = self.seq.buckets.len();
        if flushed == 0 || value > self.seq.tail_upper {
            let at = self.seq.buffer.partition_point(|&v| v < value);
            if self.seq.buffer.get(at) != Some(&value) { return false; }
            self.seq.buffer.remove(at);
            self.seq.len -= 1;
            self.sizes.decr(flushed);
            if value == self.seq.last { self.update_last(); }
        } else {
            let bucket = self.seq.search_bucket(value);
            if !self.bucket_contains(bucket, value) { return false; }
            let log = &mut self.dels[bucket];
            let at = log.partition_point(|&v| v <= value);
            log.insert(at, value);
            self.seq.len -= 1;
            self.sizes.decr(bucket);
            if value == self.seq.last { self.update_last(); }
            if self.dels[bucket].len() == self.log_cap {
                self.flush_bucket(bucket);
            }
        }
        true
    }

    /// Appends `value`, which must not be less than the current last item.
    pub fn push(&mut self, value: u64) -> Result<(), Error> {
        if value < self.seq.last {
            return Err(Error::NotMonotone { last: self.seq.last, value });
        }
        self.add(value);
        Ok(())
    }

    fn update_last(&mut self) {
        if self.seq.len == 0 {
            self.seq.set_last(0);
        } else if let Some(value) = self.get(self.seq.len - 1) {
            self.seq.set_last(value);
        }
    }

    /// Whether the logical content of flushed bucket `bucket` holds `value`:
    /// live copies are the compressed ones plus pending additions, minus
    /// pending deletions.
    fn bucket_contains(&self, bucket: usize, value: u64) -> bool {
        let added = count_in_sorted(&self.adds[bucket], value);
        let deleted = count_in_sorted(&self.dels[bucket], value);
        if added > deleted { return true; }
        let mut compressed = 0;
        for v in self.seq.bucket_iter(bucket, self.seq.buckets[bucket].len()) {
            if v > value { break; }
            if v == value { compressed += 1; }
        }
        compressed + added > deleted
    }

    /// Returns the slot (flushed bucket, or the tail) holding logical `index`,
    /// and the index local to it.
    fn locate(&self, index: usize) -> (usize, usize) {
        let bucket = self.sizes.as_slice().partition_point(|&sum| sum <= index as u64);
        let offset = if bucket == 0 { 0 } else { self.sizes.get(bucket - 1) as usize };
        (bucket, index - offset)
    }

    /// Returns the value at logical `index`, or [`None`] if out of bounds.
    ///
    /// A direct read of the compressed bucket is used when it can be
    /// certified against the edit logs; otherwise the bucket is decoded
    /// through the three-way merge.
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.seq.len { return None; }
        let (bucket, local) = self.locate(index);
        if bucket == self.seq.buckets.len() {
            return self.seq.buffer.get(local).copied();
        }
        let adds = &self.adds[bucket];
        let dels = &self.dels[bucket];
        let info = self.seq.info[bucket];
        if adds.is_empty() && dels.is_empty() {
            return self.seq.buckets[bucket].get(local, info_width(info), info_upper(info));
        }
        if local < self.seq.buckets[bucket].len() {
            // a decoded prefix strictly below every pending edit is untouched
            let decoded = self.seq.buckets[bucket].get(local, info_width(info), info_upper(info))?;
            let first_add = adds.first().copied().unwrap_or(u64::MAX);
            let first_del = dels.first().copied().unwrap_or(u64::MAX);
            if decoded < first_add && decoded < first_del {
                return Some(decoded);
            }
        }
        Iter::starting_at(self, bucket).nth(local)
    }

    /// Returns the value at logical `index` or panics if out of bounds.
    pub fn get_or_panic(&self, index: usize) -> u64 {
        self.get(index).expect("attempt to retrieve value for an index out of bounds of the sequence")
    }

    /// Returns the smallest stored value greater than or equal to `value`,
    /// or [`None`] if there is no such value.
    pub fn next_geq(&self, value: u64) -> Option<u64> {
        if self.seq.len == 0 || value > self.seq.last { return None; }
        if value == 0 { return self.get(0); }
        let flushed = self.seq.buckets.len();
        let bucket = if flushed == 0 || value > self.seq.tail_upper {
            flushed
        } else {
            self.seq.search_bucket(value)
        };
        Iter::starting_at(self, bucket).find(|&v| v >= value)
    }

    /// Whether the sequence contains `value`.
    pub fn contains(&self, value: u64) -> bool {
        self.next_geq(value) == Some(value)
    }

    /// Returns an iterator over the logical content, in sorted order.
    pub fn iter(&self) -> Iter {
        Iter::starting_at(self, 0)
    }

    /// Copies the values at indices `from..=to`.
    pub fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> {
        check_range(from, to, self.seq.len)?;
        let (bucket, local) = self.locate(from);
        Ok(Iter::starting_at(self, bucket).skip(local).take(to - from + 1).collect())
    }

    /// Compresses the full tail buffer into a new bucket with empty logs and
    /// opens a fresh tail slot.
    fn flush_tail(&mut self) {
        let flushed = self.seq.buckets.len();
        self.seq.flush_buffer();
        self.adds.push(ResizableVec::with_max_capacity(self.log_cap));
        self.dels.push(ResizableVec::with_max_capacity(self.log_cap));
        self.sizes.add_int(flushed + 1, 0);
    }

    /// Folds the pending logs of flushed bucket `bucket` into its compressed
    /// form: splits it, merges it with its successor, or rebuilds it in
    /// place, depending on the resulting size.
    fn flush_bucket(&mut self, bucket: usize) {
        let fused = self.fused_bucket(bucket);
        self.adds[bucket].clear();
        self.dels[bucket].clear();
        debug_assert_eq!(fused.len() as u64, self.sizes.get_int(bucket));
        let bucket_size = self.seq.bucket_size;
        let prev_upper = info_upper(self.seq.info[bucket]);
        let flushed = self.seq.buckets.len();
        if fused.len() >= 2 * bucket_size {
            let (left, right) = fused.split_at(bucket_size);
            let (left_bucket, left_width) = encode_bucket(left, prev_upper);
            let right_upper = left[bucket_size - 1];
            let (right_bucket, right_width) = encode_bucket(right, right_upper);
            self.seq.buckets.set(bucket, left_bucket);
            self.seq.buckets.insert(bucket + 1, right_bucket);
            self.seq.info.set(bucket, info_word(prev_upper, left_width));
            self.seq.info.insert(bucket + 1, info_word(right_upper, right_width));
            self.sizes.set_int(bucket, bucket_size as u64);
            self.sizes.add_int(bucket + 1, (fused.len() - bucket_size) as u64);
            self.adds.insert(bucket + 1, ResizableVec::with_max_capacity(self.log_cap));
            self.dels.insert(bucket + 1, ResizableVec::with_max_capacity(self.log_cap));
        } else if fused.len() <= bucket_size / 2
            && bucket + 1 < flushed
            && self.sizes.get_int(bucket + 1) > 0
            && fused.len() + (self.sizes.get_int(bucket + 1) as usize) < 2 * bucket_size
        {
            let mut combined = fused;
            combined.extend(self.fused_bucket(bucket + 1));
            let (merged, width) = encode_bucket(&combined, prev_upper);
            self.seq.buckets.set(bucket, merged);
            self.seq.buckets.remove(bucket + 1);
            self.seq.info.set(bucket, info_word(prev_upper, width));
            self.seq.info.remove(bucket + 1);
            self.sizes.set_int(bucket, combined.len() as u64);
            self.sizes.remove_int(bucket + 1);
            self.adds.remove(bucket + 1);
            self.dels.remove(bucket + 1);
        } else {
            let (rebuilt, width) = encode_bucket(&fused, prev_upper);
            self.seq.buckets.set(bucket, rebuilt);
            self.seq.info.set(bucket, info_word(prev_upper, width));
        }
    }

    /// Sorted logical content of flushed bucket `bucket`: its compressed
    /// values fused with the pending additions and deletions.
    fn fused_bucket(&self, bucket: usize) -> Vec<u64> {
        three_way_merge(
            self.seq.bucket_iter(bucket, self.seq.buckets[bucket].len()),
            &self.adds[bucket],
            &self.dels[bucket],
        )
    }

    /// Removes all values, releasing the backing storage but keeping the
    /// bucket size and log capacity.
    pub fn clear(&mut self) {
        self.seq.clear();
        self.adds.clear();
        self.adds.shrink_to_fit();
        self.dels.clear();
        self.dels.shrink_to_fit();
        self.sizes = PrefixSumVec::new(0, 0);
        self.sizes.add_int(0, 0);
    }

    /// Reduces the backing capacity of all owned storage to its current content.
    pub fn trim_to_size(&mut self) {
        self.seq.trim_to_size();
        for log in self.adds.iter_mut().chain(self.dels.iter_mut()) {
            log.trim_to_size();
        }
        self.adds.shrink_to_fit();
        self.dels.shrink_to_fit();
        self.sizes.trim_to_size();
    }
}

/// Number of occurrences of `value` in the sorted slice `log`.
fn count_in_sorted(log: &[u64], value: u64) -> usize {
    log.partition_point(|&v| v <= value) - log.partition_point(|&v| v < value)
}

/// Merges the values of a compressed bucket with its sorted addition and
/// deletion logs into a sorted vector. An addition ties before an equal
/// compressed value; each deletion cancels one equal addition or compressed
/// value.
fn three_way_merge(mut compressed: impl Iterator<Item = u64>, adds: &[u64], dels: &[u64]) -> Vec<u64> {
    let mut result = Vec::new();
    let mut head = compressed.next();
    let (mut add_at, mut del_at) = (0, 0);
    loop {
        let a = head.unwrap_or(u64::MAX);
        let add = adds.get(add_at).copied().unwrap_or(u64::MAX);
        let del = dels.get(del_at).copied().unwrap_or(u64::MAX);
        if a == u64::MAX && add == u64::MAX && del == u64::MAX {
            return result;
        }
        if a < add && a < del {
            result.push(a);
            head = compressed.next();
        } else if add <= a && add < del {
            result.push(add);
            add_at += 1;
        } else if add == del {
            add_at += 1;
            del_at += 1;
        } else if del == a {
            head = compressed.next();
            del_at += 1;
        } else {
            del_at += 1;
        }
    }
}

impl BitsUsed for DynamicSeq {
    fn bits_used_dyn(&self) -> u64 {
        self.seq.bits_used_dyn()
            + self.adds.bits_used_dyn()
            + self.dels.bits_used_dyn()
            + self.sizes.bits_used_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

impl MonotoneSeq for DynamicSeq {
    #[inline] fn len(&self) -> usize { self.seq.len }
    #[inline] fn last(&self) -> u64 { self.seq.last }
    #[inline] fn push(&mut self, value: u64) -> Result<(), Error> { DynamicSeq::push(self, value) }
    #[inline] fn get(&self, index: usize) -> Option<u64> { DynamicSeq::get(self, index) }
    #[inline] fn next_geq(&self, value: u64) -> Option<u64> { DynamicSeq::next_geq(self, value) }
    #[inline] fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> { DynamicSeq::sub_list(self, from, to) }
    #[inline] fn clear(&mut self) { DynamicSeq::clear(self) }
    #[inline] fn trim_to_size(&mut self) { DynamicSeq::trim_to_size(self) }
}

impl<'a> IntoIterator for &'a DynamicSeq {
    type Item = u64;
    type IntoIter = Iter<'a>;
    #[inline] fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Three-way interleaved iterator over a [`DynamicSeq`]: fuses each
/// compressed bucket with its pending additions and deletions, in sorted
/// order, and advances to the next bucket (finally the tail buffer) when all
/// three sources of the current one are exhausted.
pub struct Iter<'a> {
    seq: &'a DynamicSeq,
    /// Current slot; the value `buckets.len()` denotes the tail buffer.
    bucket: usize,
    compressed: Option<BucketIter<'a>>,
    head: Option<u64>,
    add_at: usize,
    del_at: usize,
    buffer_at: usize,
}

impl<'a> Iter<'a> {
    fn starting_at(seq: &'a DynamicSeq, bucket: usize) -> Self {
        let mut iter = Self {
            seq,
            bucket,
            compressed: None,
            head: None,
            add_at: 0,
            del_at: 0,
            buffer_at: 0,
        };
        iter.open(bucket);
        iter
    }

    fn open(&mut self, bucket: usize) {
        self.bucket = bucket;
        self.add_at = 0;
        self.del_at = 0;
        if bucket < self.seq.seq.buckets.len() {
            let mut inner = self.seq.seq.bucket_iter(bucket, self.seq.seq.buckets[bucket].len());
            self.head = inner.next();
            self.compressed = Some(inner);
        } else {
            self.head = None;
            self.compressed = None;
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let flushed = self.seq.seq.buckets.len();
        loop {
            if self.bucket == flushed {
                let value = self.seq.seq.buffer.get(self.buffer_at).copied();
                if value.is_some() { self.buffer_at += 1; }
                return value;
            }
            let adds = &self.seq.adds[self.bucket];
            let dels = &self.seq.dels[self.bucket];
            let a = self.head.unwrap_or(u64::MAX);
            let add = adds.get(self.add_at).copied().unwrap_or(u64::MAX);
            let del = dels.get(self.del_at).copied().unwrap_or(u64::MAX);
            if a == u64::MAX && add == u64::MAX && del == u64::MAX {
                let next = self.bucket + 1;
                self.open(next);
                continue;
            }
            if a < add && a < del {
                self.head = self.compressed.as_mut().and_then(|it| it.next());
                return Some(a);
            } else if add <= a && add < del {
                self.add_at += 1;
                return Some(add);
            } else if add == del {
                self.add_at += 1;
                self.del_at += 1;
            } else if del == a {
                self.head = self.compressed.as_mut().and_then(|it| it.next());
                self.del_at += 1;
            } else {
                self.del_at += 1;
            }
        }
    }
}

impl FusedIterator for Iter<'_> {}
