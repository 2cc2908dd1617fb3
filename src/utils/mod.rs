//! Small shared data structures and byte-level helpers.

mod bitset;
pub(crate) mod io;

pub use bitset::BitSet;
