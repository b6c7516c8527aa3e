use dyn_bits::BitsUsed;

use crate::Error;

/// Read/write contract shared by the monotone sequence variants.
///
/// Only operations compatible with the non-decreasing invariant appear here;
/// positional writes and other collection-style mutators are deliberately
/// absent. Removal and insertion by value are specific to [`DynamicSeq`]
/// (see [`crate::DynamicSeq::add`] and [`crate::DynamicSeq::remove`]).
/// Sizes in bits are reported through the [`BitsUsed`] supertrait.
///
/// [`DynamicSeq`]: crate::DynamicSeq
pub trait MonotoneSeq: BitsUsed {
    /// Returns the number of stored values.
    fn len(&self) -> usize;

    /// Returns whether the sequence is empty.
    #[inline] fn is_empty(&self) -> bool { self.len() == 0 }

    /// Returns the value of the last item, or 0 if the sequence is empty.
    fn last(&self) -> u64;

    /// Appends `value`, which must not be less than [`Self::last`].
    fn push(&mut self, value: u64) -> Result<(), Error>;

    /// Appends a value that is `diff` greater than the last one
    /// (or than 0 when the sequence is empty).
    fn push_diff(&mut self, diff: u64) -> Result<(), Error> {
        self.push(self.last().saturating_add(diff))
    }

    /// Returns the value at `index`, or [`None`] if `index` is out of bounds.
    fn get(&self, index: usize) -> Option<u64>;

    /// Returns the value at `index` or panics if `index` is out of bounds.
    fn get_or_panic(&self, index: usize) -> u64 {
        self.get(index).expect("attempt to retrieve value for an index out of bounds of the sequence")
    }

    /// Returns the smallest stored value greater than or equal to `value`,
    /// or [`None`] if there is no such value.
    fn next_geq(&self, value: u64) -> Option<u64>;

    /// Copies the values at indices `from..=to`.
    fn sub_list(&self, from: usize, to: usize) -> Result<Vec<u64>, Error>;

    /// Removes all values and releases the backing storage.
    fn clear(&mut self);

    /// Reduces the backing capacity of all owned storage to its current content.
    fn trim_to_size(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AdaptiveSeq, BucketedSeq};

    fn exercise<S: MonotoneSeq>(seq: &mut S) {
        assert!(seq.is_empty());
        for value in [2u64, 3, 5, 8, 13, 21, 34, 55, 89, 144] {
            seq.push(value).unwrap();
        }
        assert_eq!(seq.len(), 10);
        assert_eq!(seq.last(), 144);
        assert_eq!(seq.get(4), Some(13));
        assert_eq!(seq.get_or_panic(0), 2);
        assert_eq!(seq.next_geq(14), Some(21));
        assert_eq!(seq.sub_list(1, 3).unwrap(), [3, 5, 8]);
        seq.push_diff(6).unwrap();
        assert_eq!(seq.last(), 150);
        assert_eq!(seq.len(), 11);
        assert_eq!(seq.push(1), Err(Error::NotMonotone { last: 150, value: 1 }));
        assert!(seq.bits_used() > 0);
        seq.trim_to_size();
        seq.clear();
        assert_eq!(seq.len(), 0);
    }

    #[test]
    fn all_variants_honor_the_contract() {
        exercise(&mut BucketedSeq::new(4).unwrap());
        exercise(&mut AdaptiveSeq::new());
        exercise(&mut BucketedSeq::new(4).unwrap().dynamize().unwrap());
    }
}
