//! Secondary index support. [`btree::BPlusTree`] is the only index body this
//! core builds; `Hash` and `Fulltext` kinds are recognized by the catalog
//! but have no implementation here.

pub mod btree;

pub use btree::{BPlusTree, BPlusTreeHeader, BTreeNodeType};
