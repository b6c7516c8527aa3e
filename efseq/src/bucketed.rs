use std::iter::FusedIterator;

use dyn_bits::BitsUsed;

use crate::bucket::{encode_bucket, BucketIter, EncodedBucket};
use crate::{check_range, DynamicSeq, Error, MonotoneSeq, ResizableVec};

/// Number of low bits of an info word holding the bucket's lower-bit width.
pub(crate) const INFO_WIDTH_BITS: u32 = 6;

/// The largest value the sequences can store: `prev_upper` shares an info
/// word with the 6-bit width field.
pub const MAX_VALUE: u64 = (1u64 << (64 - INFO_WIDTH_BITS)) - 1;

#[inline(always)]
pub(crate) fn info_word(prev_upper: u64, low_width: u8) -> u64 {
    (prev_upper << INFO_WIDTH_BITS) | low_width as u64
}

#[inline(always)]
pub(crate) fn info_upper(word: u64) -> u64 { word >> INFO_WIDTH_BITS }

#[inline(always)]
pub(crate) fn info_width(word: u64) -> u8 { (word & ((1 << INFO_WIDTH_BITS) - 1)) as u8 }

/// Append-only monotone sequence compressed as fixed-size Elias-Fano buckets.
///
/// Values are grouped in buckets of `bucket_size` items. Each bucket is
/// encoded relative to `prev_upper`, the last value of the preceding bucket,
/// so every bucket spans a small universe of its own. One info word per
/// bucket packs `(prev_upper << 6) | low_width`; a trailing info slot holds
/// the current last value and terminates search ranges. Values appended
/// since the last flush wait, uncompressed, in a tail buffer of at most
/// `bucket_size` items.
///
/// A good bucket size for a sequence of n items is about √(8n).
#[derive(Clone)]
pub struct BucketedSeq {
    pub(crate) bucket_size: usize,
    pub(crate) len: usize,
    pub(crate) last: u64,
    /// Anchor for the tail buffer: the last value of the last flushed bucket.
    pub(crate) tail_upper: u64,
    pub(crate) info: ResizableVec<u64>,
    pub(crate) buckets: ResizableVec<EncodedBucket>,
    pub(crate) buffer: ResizableVec<u64>,
}

impl BucketedSeq {
    /// Returns an empty sequence with the given bucket size.
    pub fn new(bucket_size: usize) -> Result<Self, Error> {
        if bucket_size == 0 {
            return Err(Error::BucketSizeTooSmall { bucket_size, min: 1 });
        }
        Ok(Self::with_valid_bucket_size(bucket_size))
    }

    /// Returns an empty sequence with room for `capacity` items already
    /// allocated. `capacity` must not be less than `bucket_size`.
    pub fn with_capacity(bucket_size: usize, capacity: usize) -> Result<Self, Error> {
        if bucket_size == 0 {
            return Err(Error::BucketSizeTooSmall { bucket_size, min: 1 });
        }
        if capacity < bucket_size {
            return Err(Error::CapacityTooSmall { capacity, bucket_size });
        }
        let buckets_hint = capacity / bucket_size + 1;
        let mut info = ResizableVec::with_capacity(buckets_hint + 1);
        info.push(0);
        Ok(Self {
            bucket_size,
            len: 0,
            last: 0,
            tail_upper: 0,
            info,
            buckets: ResizableVec::with_capacity(buckets_hint),
            buffer: ResizableVec::with_max_capacity(bucket_size),
        })
    }

    pub(crate) fn with_valid_bucket_size(bucket_size: usize) -> Self {
        let mut info = ResizableVec::new();
        info.push(0);
        Self {
            bucket_size,
            len: 0,
            last: 0,
            tail_upper: 0,
            info,
            buckets: ResizableVec::new(),
            buffer: ResizableVec::with_max_capacity(bucket_size),
        }
    }

    /// Returns the number of stored values.
    #[inline] pub fn len(&self) -> usize { self.len }

    /// Returns whether the sequence is empty.
    #[inline] pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Returns the value of the last item, or 0 if the sequence is empty.
    #[inline] pub fn last(&self) -> u64 { self.last }

    /// Returns the bucket size.
    #[inline] pub fn bucket_size(&self) -> usize { self.bucket_size }

    /// Updates the last value and the trailing info slot.
    pub(crate) fn set_last(&mut self, value: u64) {
        self.last = value;
        let slot = self.info.len() - 1;
        self.info.set(slot, info_word(value, 0));
    }

    /// Appends `value`, which must not be less than the current last item.
    /// Panics if `value` exceeds [`MAX_VALUE`].
    pub fn push(&mut self, value: u64) -> Result<(), Error> {
        assert!(value <= MAX_VALUE,
            "cannot push value {value} outside the supported universe (<= {MAX_VALUE})");
        if value < self.last {
            return Err(Error::NotMonotone { last: self.last, value });
        }
        self.buffer.push(value);
        self.len += 1;
        self.set_last(value);
        if self.buffer.len() == self.bucket_size {
            self.flush_buffer();
        }
        Ok(())
    }

    /// Compresses the full tail buffer into a new bucket.
    pub(crate) fn flush_buffer(&mut self) {
        let (bucket, low_width) = encode_bucket(&self.buffer, self.tail_upper);
        let slot = self.info.len() - 1;
        self.info.set(slot, info_word(self.tail_upper, low_width));
        self.info.push(info_word(self.last, 0));
        self.buckets.push(bucket);
        self.tail_upper = self.buffer[self.buffer.len() - 1];
        self.buffer.clear();
    }

    /// Returns the value at `index`, or [`None`] if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Option<u64> {
        if index >= self.len { return None; }
        let bucket = index / self.bucket_size;
        let offset = index % self.bucket_size;
        if bucket == self.buckets.len() {
            self.buffer.get(offset).copied()
        } else {
            let info = self.info[bucket];
            self.buckets[bucket].get(offset, info_width(info), info_upper(info))
        }
    }

    /// Returns the value at `index` or panics if `index` is out of bounds.
    pub fn get_or_panic(&self, index: usize) -> u64 {
        self.get(index).expect("attempt to retrieve value for an index out of bounds of the sequence")
    }

    /// Returns the first flushed bucket whose last value is at least `value`.
    /// With `value` not greater than the last flushed value, this is the only
    /// bucket that can hold the first item greater than or equal to `value`;
    /// with `value` beyond it, the count of flushed buckets is returned.
    pub(crate) fn search_bucket(&self, value: u64) -> usize {
        self.info[1..].partition_point(|&word| info_upper(word) < value)
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

    pub(crate) fn next_geq_entry(&self, value: u64) -> Option<(usize, u64)> {
        if self.len == 0 || value > self.last { return None; }
        if value == 0 { return Some((0, self.get(0)?)); }
        if value > self.tail_upper {
            let first = self.buckets.len() * self.bucket_size;
            let offset = self.buffer.partition_point(|&v| v < value);
            return self.buffer.get(offset).map(|&v| (first + offset, v));
        }
        let bucket = self.search_bucket(value);
        self.bucket_iter(bucket, self.bucket_size)
            .enumerate()
            .find(|&(_, v)| v >= value)
            .map(|(offset, v)| (bucket * self.bucket_size + offset, v))
    }

    /// Decoding iterator over up to `limit` values of flushed bucket `bucket`.
    pub(crate) fn bucket_iter(&self, bucket: usize, limit: usize) -> BucketIter {
        let info = self.info[bucket];
        self.buckets[bucket].iter(info_width(info), info_upper(info), limit)
    }

    /// Returns an iterator over all values.
    pub fn iter(&self) -> Iter {
        Iter { seq: self, bucket: 0, inner: None, buffer_index: 0 }
    }

    /// Returns an iterator over the values starting at `index`.
    pub fn iter_from(&self, index: usize) -> Iter {
        let flushed = self.buckets.len();
        let bucket = index / self.bucket_size;
        if bucket >= flushed {
            Iter { seq: self, bucket: flushed, inner: None, buffer_index: index - flushed * self.bucket_size }
        } else {
            let info = self.info[bucket];
            let inner = self.buckets[bucket].iter_from(info_width(info), info_upper(info), index % self.bucket_size);
            Iter { seq: self, bucket: bucket + 1, inner: Some(inner), buffer_index: 0 }
        }
    }

    /// Copies the values at indices `from..=to`.
    pub fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> {
        check_range(from, to, self.len)?;
        Ok(self.iter_from(from).take(to - from + 1).collect())
    }

    /// Switches the sequence to the edit-capable mode by attaching per-bucket
    /// edit logs. Fails with [`Error::EditLogTooSmall`] if the bucket size
    /// cannot host them.
    pub fn dynamize(self) -> Result<DynamicSeq, Error> {
        DynamicSeq::new(self)
    }

    /// Removes all values and releases the backing storage.
    pub fn clear(&mut self) {
        self.len = 0;
        self.last = 0;
        self.tail_upper = 0;
        self.buckets.clear();
        self.buckets.trim_to_size();
        self.buffer.clear();
        self.buffer.trim_to_size();
        self.info.clear();
        self.info.trim_to_size();
        self.info.push(0);
    }

    /// Reduces the backing capacity of all owned vectors to their current content.
    pub fn trim_to_size(&mut self) {
        self.info.trim_to_size();
        self.buckets.trim_to_size();
        self.buffer.trim_to_size();
    }
}

impl BitsUsed for BucketedSeq {
    fn bits_used_dyn(&self) -> u64 {
        self.info.bits_used_dyn() + self.buckets.bits_used_dyn() + self.buffer.bits_used_dyn()
    }
    const USES_DYN_MEM: bool = true;
}

impl MonotoneSeq for BucketedSeq {
    #[inline] fn len(&self) -> usize { self.len }
    #[inline] fn last(&self) -> u64 { self.last }
    #[inline] fn push(&mut self, value: u64) -> Result<(), Error> { BucketedSeq::push(self, value) }
    #[inline] fn get(&self, index: usize) -> Option<u64> { BucketedSeq::get(self, index) }
    #[inline] fn next_geq(&self, value: u64) -> Option<u64> { BucketedSeq::next_geq(self, value) }
    #[inline] fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error> { BucketedSeq::sub_list(self, from, to) }
    #[inline] fn clear(&mut self) { BucketedSeq::clear(self) }
    #[inline] fn trim_to_size(&mut self) { BucketedSeq::trim_to_size(self) }
}

impl<'a> IntoIterator for &'a BucketedSeq {
    type Item = u64;
    type IntoIter = Iter<'a>;
    #[inline] fn into_iter(self) -> Self::IntoIter { self.iter() }
}

/// Iterator over [`BucketedSeq`] values: decodes the flushed buckets in turn,
/// then reads the tail buffer.
pub struct Iter<'a> {
    seq: &'a BucketedSeq,
    bucket: usize,
    inner: Option<BucketIter<'a>>,
    buffer_index: usize,
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if let Some(inner) = &mut self.inner {
                if let Some(value) = inner.next() { return Some(value); }
                self.inner = None;
            }
            if self.bucket < self.seq.buckets.len() {
                self.inner = Some(self.seq.bucket_iter(self.bucket, self.seq.bucket_size));
                self.bucket += 1;
            } else {
                let value = self.seq.buffer.get(self.buffer_index).copied();
                if value.is_some() { self.buffer_index += 1; }
                return value;
            }
        }
    }
}

impl FusedIterator for Iter<'_> {}
