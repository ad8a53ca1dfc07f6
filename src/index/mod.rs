mod b_plus_tree;
mod index_iterator;
mod key_comparator;

pub use b_plus_tree::*;
pub use index_iterator::*;
pub use key_comparator::*;
