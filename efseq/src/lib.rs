#![doc = include_str!("../README.md")]

mod error;
pub use error::Error;
pub(crate) use error::check_range;

mod vecs;
pub use vecs::{PrefixSumVec, ResizableVec};

mod bucket;

mod bucketed;
pub use bucketed::{BucketedSeq, MAX_VALUE};

mod adaptive;
pub use adaptive::AdaptiveSeq;

mod dynamic;
pub use dynamic::DynamicSeq;

mod seq;
pub use seq::MonotoneSeq;
